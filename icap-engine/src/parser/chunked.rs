//! Chunked body decoding with the ICAP preview extensions.
//!
//! The decoder is a small state machine fed one byte at a time from any
//! [`AsyncRead`] source, so it can be driven by a socket or by a byte slice.
//! Chunk payloads themselves are copied in bulk.
//!
//! ```text
//!   Size ──';'──▶ Extension
//!    │              │
//!    └────'\r'──────┴──▶ LineEnd ──'\n'──▶ (dispatch chunk) ──▶ Size
//! ```
//!
//! On top of standard framing it recognises the `ieof` chunk extension:
//! `0; ieof\r\n\r\n` means the bytes sent so far are the whole body.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{trace, warn};

use crate::error::{Error, IcapResult};

/// Longest accepted chunk-size field (16 hex digits fill a `u64`).
const MAX_SIZE_DIGITS: usize = 16;
/// Longest accepted chunk-extension text.
const MAX_EXTENSION_LEN: usize = 1024;
const IEOF: &str = "ieof";

/// Which phase of a body the decoder is reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    /// Preview phase; the declared size is advisory only.
    Preview(usize),
    /// Remainder of the body, or the whole body when no preview was negotiated.
    Full,
}

/// How a decode call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEnd {
    /// `0; ieof`: no further bytes will be sent for this body.
    Ieof,
    /// Standard terminal chunk (or an empty size line). After a preview the
    /// client is waiting for `100 Continue` to send the rest.
    Terminated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Extension,
    LineEnd,
}

/// Decoder for one chunked body.
pub struct ChunkedBodyDecoder {
    mode: DecodeMode,
    state: State,
    size_hex: String,
    extension: String,
    delivered: usize,
}

impl ChunkedBodyDecoder {
    pub fn new(mode: DecodeMode) -> Self {
        Self {
            mode,
            state: State::Size,
            size_hex: String::new(),
            extension: String::new(),
            delivered: 0,
        }
    }

    /// Decode chunks from `reader`, appending payload bytes to `out`, until a
    /// terminal chunk (or `ieof`) is seen.
    pub async fn decode<R>(&mut self, reader: &mut R, out: &mut Vec<u8>) -> IcapResult<BodyEnd>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let byte = next_byte(reader).await?;
            match (self.state, byte) {
                (State::Size | State::Extension, b'\r') => self.state = State::LineEnd,
                (State::Size, b';') => self.state = State::Extension,
                (State::Size, b' ' | b'\t') => {}
                (State::Size, b) if b.is_ascii_hexdigit() => {
                    if self.size_hex.len() == MAX_SIZE_DIGITS {
                        return Err(Error::framing("chunk size field too long"));
                    }
                    self.size_hex.push(b as char);
                }
                (State::Size, b) => {
                    return Err(Error::framing(format!(
                        "invalid byte 0x{b:02X} in chunk size"
                    )));
                }
                (State::Extension, b) => {
                    if self.extension.len() == MAX_EXTENSION_LEN {
                        return Err(Error::framing("chunk extension too long"));
                    }
                    self.extension.push(b as char);
                }
                (State::LineEnd, b'\n') => {
                    if let Some(end) = self.finish_line(reader, out).await? {
                        self.check_preview();
                        return Ok(end);
                    }
                }
                (State::LineEnd, b) => {
                    return Err(Error::framing(format!(
                        "expected LF after CR in chunk size line, got 0x{b:02X}"
                    )));
                }
            }
        }
    }

    /// A full size line was read: either consume one data chunk or finish.
    async fn finish_line<R>(&mut self, reader: &mut R, out: &mut Vec<u8>) -> IcapResult<Option<BodyEnd>>
    where
        R: AsyncRead + Unpin,
    {
        self.state = State::Size;
        let size_hex = std::mem::take(&mut self.size_hex);
        let extension = std::mem::take(&mut self.extension);

        if size_hex.is_empty() {
            if extension.trim().is_empty() {
                trace!("empty chunk size line, body ends");
                return Ok(Some(BodyEnd::Terminated));
            }
            return Err(Error::framing(format!(
                "chunk extension without size: {extension}"
            )));
        }

        let size = u64::from_str_radix(&size_hex, 16)
            .map_err(|_| Error::framing(format!("invalid chunk size: {size_hex}")))?;

        if size > 0 {
            let read = (&mut *reader).take(size).read_to_end(out).await?;
            if (read as u64) < size {
                return Err(Error::framing(format!(
                    "unexpected EOF inside chunk: got {read} of {size} bytes"
                )));
            }
            self.delivered += read;
            expect_crlf(reader, "end of chunk").await?;
            trace!(size, "chunk read");
            return Ok(None);
        }

        expect_crlf(reader, "end of last chunk").await?;
        let ieof = extension
            .split(';')
            .any(|token| token.trim().eq_ignore_ascii_case(IEOF));
        trace!(ieof, delivered = self.delivered, "last chunk read");
        Ok(Some(if ieof { BodyEnd::Ieof } else { BodyEnd::Terminated }))
    }

    fn check_preview(&self) {
        if let DecodeMode::Preview(declared) = self.mode {
            if self.delivered > declared {
                warn!(
                    declared,
                    delivered = self.delivered,
                    "client sent more preview bytes than declared"
                );
            }
        }
    }
}

impl fmt::Debug for ChunkedBodyDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkedBodyDecoder")
            .field("mode", &self.mode)
            .field("state", &self.state)
            .field("delivered", &self.delivered)
            .finish()
    }
}

async fn next_byte<R>(reader: &mut R) -> IcapResult<u8>
where
    R: AsyncRead + Unpin,
{
    reader.read_u8().await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::framing("unexpected EOF inside chunked body")
        } else {
            Error::Network(e)
        }
    })
}

async fn expect_crlf<R>(reader: &mut R, what: &str) -> IcapResult<()>
where
    R: AsyncRead + Unpin,
{
    let cr = next_byte(reader).await?;
    let lf = next_byte(reader).await?;
    if cr != b'\r' || lf != b'\n' {
        return Err(Error::framing(format!("Error reading {what}")));
    }
    Ok(())
}
