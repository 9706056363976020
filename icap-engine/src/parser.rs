pub(crate) mod chunked;
pub(crate) mod http_embed;
pub(crate) mod icap;
pub(crate) mod wire;

pub(crate) use icap::http_version_str;
pub(crate) use wire::{read_header_block, write_chunk_into};

/// Split a header block on bare CRLF, dropping the empty tail produced by the
/// terminating CRLFCRLF.
pub(crate) fn split_lines(block: &str) -> Vec<&str> {
    let mut lines: Vec<&str> = block.split("\r\n").collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines
}
