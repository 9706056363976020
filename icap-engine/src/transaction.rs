//! One inbound ICAP transaction: parsed head plus the encapsulated payload.
//!
//! Reading happens in two steps so the session can reject an unknown service
//! before touching the body:
//!
//! 1. [`IcapTransaction::parse_head`] validates the request line and the ICAP
//!    headers of an already-read header block.
//! 2. [`IcapTransaction::read_encapsulated`] pulls the embedded HTTP header
//!    segments and the (possibly previewed) chunked body off the stream.

use tokio::io::{AsyncBufRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::{Error, IcapResult};
use crate::parser::chunked::{BodyEnd, ChunkedBodyDecoder, DecodeMode};
use crate::parser::icap::{Encapsulated, SegmentLabel};
use crate::parser::split_lines;
use crate::parser::wire::read_segment;
use crate::request::{HeaderTable, Method, RequestLine};
use crate::response::{Response, Segments};

/// A parsed request and its encapsulated HTTP message parts.
#[derive(Debug, Clone)]
pub struct IcapTransaction {
    pub line: RequestLine,
    pub headers: HeaderTable,
    /// Absent only for OPTIONS requests sent without the header.
    pub encapsulated: Option<Encapsulated>,
    /// Declared `Preview` size in bytes.
    pub preview: Option<usize>,
    /// `req-hdr`, `req-body`, `res-hdr` and `res-body` as received.
    pub segments: Segments,
}

impl IcapTransaction {
    /// Parse a header block as returned by the header line splitter.
    pub fn parse_head(block: &[u8]) -> IcapResult<Self> {
        let text = std::str::from_utf8(block)
            .map_err(|_| Error::malformed("ICAP header block is not valid UTF-8"))?;
        let lines = split_lines(text);
        let first = lines.first().copied().unwrap_or_default();

        let line = RequestLine::parse(first)?;
        let headers = HeaderTable::from_lines(lines.iter().skip(1).copied());

        let encapsulated = match headers.get("Encapsulated") {
            Some(v) => Some(Encapsulated::parse(v)?),
            None if line.method.is_mod() => {
                return Err(Error::malformed(
                    "Invalid ICAP Syntax: Encapsulated Header missing",
                ));
            }
            None => None,
        };

        let preview = headers
            .get("Preview")
            .map(|v| {
                v.parse::<usize>().map_err(|_| {
                    Error::malformed("Invalid ICAP Syntax: Preview Header not numeric")
                })
            })
            .transpose()?;

        debug!(
            method = %line.method,
            service = %line.service,
            encapsulated = ?encapsulated.as_ref().map(ToString::to_string),
            ?preview,
            "ICAP request head parsed"
        );

        Ok(Self {
            line,
            headers,
            encapsulated,
            preview,
            segments: Segments::default(),
        })
    }

    pub fn method(&self) -> Method {
        self.line.method
    }

    pub fn service(&self) -> &str {
        &self.line.service
    }

    /// Whether the client accepts `204 No Content` instead of an echoed message.
    pub fn allows_204(&self) -> bool {
        self.headers.allows("204") || self.preview.is_some()
    }

    /// Read every part announced by `Encapsulated`, in table order.
    ///
    /// Header segments are read by their computed length. The body is decoded
    /// as chunked data; with a preview, `100 Continue` is written to `stream`
    /// and flushed before the remainder is read.
    pub async fn read_encapsulated<S>(&mut self, stream: &mut S) -> IcapResult<()>
    where
        S: AsyncBufRead + AsyncWrite + Unpin,
    {
        let Some(enc) = self.encapsulated.clone() else {
            return Ok(());
        };

        for entry in enc.entries() {
            match entry.label {
                SegmentLabel::ReqHdr => {
                    self.segments.req_hdr = read_segment(stream, enc.req_hdr_len()).await?;
                    trace!(len = self.segments.req_hdr.len(), "req-hdr read");
                }
                SegmentLabel::ResHdr => {
                    self.segments.res_hdr = read_segment(stream, enc.res_hdr_len()).await?;
                    trace!(len = self.segments.res_hdr.len(), "res-hdr read");
                }
                SegmentLabel::ReqBody => {
                    read_body(stream, self.preview, &mut self.segments.req_body).await?;
                }
                SegmentLabel::ResBody => {
                    read_body(stream, self.preview, &mut self.segments.res_body).await?;
                }
                SegmentLabel::NullBody | SegmentLabel::OptBody => {}
            }
        }
        Ok(())
    }
}

/// Decode one body, running the preview exchange when a preview was declared.
pub(crate) async fn read_body<S>(
    stream: &mut S,
    preview: Option<usize>,
    out: &mut Vec<u8>,
) -> IcapResult<()>
where
    S: AsyncBufRead + AsyncWrite + Unpin,
{
    let Some(size) = preview else {
        ChunkedBodyDecoder::new(DecodeMode::Full)
            .decode(stream, out)
            .await?;
        return Ok(());
    };

    match ChunkedBodyDecoder::new(DecodeMode::Preview(size))
        .decode(stream, out)
        .await?
    {
        BodyEnd::Ieof => {
            trace!(len = out.len(), "preview holds the whole body");
        }
        BodyEnd::Terminated => {
            debug!(preview = size, received = out.len(), "sending 100 Continue");
            stream.write_all(&Response::continue_100().to_raw()).await?;
            stream.flush().await?;
            ChunkedBodyDecoder::new(DecodeMode::Full)
                .decode(stream, out)
                .await?;
        }
    }
    Ok(())
}
