use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::MAX_HDR_BYTES;
use crate::error::{Error, IcapResult};
use crate::parser::icap::find_double_crlf;

/// Read one header block, up to and including the first CRLFCRLF.
///
/// Returns `Ok(None)` when the peer closed the stream before sending anything.
/// EOF after a partial block is [`Error::UnexpectedEof`]; a block larger than
/// [`MAX_HDR_BYTES`] is rejected as malformed.
pub async fn read_header_block<R>(reader: &mut R) -> IcapResult<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut block = Vec::with_capacity(512);
    loop {
        // at most one byte past the cap, so a line without LF cannot grow the block
        let limit = (MAX_HDR_BYTES + 1 - block.len()) as u64;
        let n = (&mut *reader)
            .take(limit)
            .read_until(b'\n', &mut block)
            .await?;
        if n == 0 {
            return if block.is_empty() {
                Ok(None)
            } else {
                Err(Error::UnexpectedEof("EOF before complete ICAP headers"))
            };
        }
        // only the tail can complete the terminator
        let tail = block.len().saturating_sub(n + 3);
        if find_double_crlf(&block[tail..]).is_some() {
            trace!(len = block.len(), "header block read");
            return Ok(Some(block));
        }
        if block.len() > MAX_HDR_BYTES {
            return Err(Error::malformed(format!(
                "ICAP header block exceeds {MAX_HDR_BYTES} bytes"
            )));
        }
    }
}

/// Read exactly `len` bytes of a known-length segment (encapsulated HTTP headers).
pub async fn read_segment<R>(reader: &mut R, len: usize) -> IcapResult<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::malformed(format!("encapsulated header segment shorter than {len} bytes"))
        } else {
            Error::Network(e)
        }
    })?;
    Ok(buf)
}

/// Write one chunk into already-assembled buffer.
pub fn write_chunk_into(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(format!("{:X}\r\n", data.len()).as_bytes());
    if !data.is_empty() {
        out.extend_from_slice(data);
    }
    out.extend_from_slice(b"\r\n");
}
