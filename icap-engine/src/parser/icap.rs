use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use http::Version;

use crate::MAX_ENCAPSULATED_HDR_BYTES;
use crate::error::{Error, IcapResult};

/// Find end of ICAP header block (position after CRLFCRLF).
#[inline]
pub(crate) fn find_double_crlf(buf: &[u8]) -> Option<usize> {
    memchr::memmem::find(buf, b"\r\n\r\n").map(|i| i + 4)
}

/// Labels allowed in the `Encapsulated` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentLabel {
    ReqHdr,
    ResHdr,
    ReqBody,
    ResBody,
    NullBody,
    OptBody,
}

impl SegmentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentLabel::ReqHdr => "req-hdr",
            SegmentLabel::ResHdr => "res-hdr",
            SegmentLabel::ReqBody => "req-body",
            SegmentLabel::ResBody => "res-body",
            SegmentLabel::NullBody => "null-body",
            SegmentLabel::OptBody => "opt-body",
        }
    }

    pub fn is_body(&self) -> bool {
        !matches!(self, SegmentLabel::ReqHdr | SegmentLabel::ResHdr)
    }
}

impl fmt::Display for SegmentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentLabel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "req-hdr" => SegmentLabel::ReqHdr,
            "res-hdr" => SegmentLabel::ResHdr,
            "req-body" => SegmentLabel::ReqBody,
            "res-body" => SegmentLabel::ResBody,
            "null-body" => SegmentLabel::NullBody,
            "opt-body" => SegmentLabel::OptBody,
            _ => {
                return Err(Error::malformed(format!(
                    "invalid Encapsulated part name: {}",
                    s.trim()
                )));
            }
        })
    }
}

/// One `label=offset` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetEntry {
    pub label: SegmentLabel,
    pub offset: usize,
}

/// Offsets parsed from the `Encapsulated` header, in wire order.
///
/// Offsets are **relative to the start of the encapsulated area**
/// (i.e., immediately after the ICAP headers CRLFCRLF).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Encapsulated {
    entries: Vec<OffsetEntry>,
}

impl Encapsulated {
    /// Parse only the value of the `Encapsulated:` header (right side).
    ///
    /// Rejects unknown or duplicate labels, decreasing offsets, header labels
    /// after a body label, and tables that do not end with a body label.
    pub fn parse(val: &str) -> IcapResult<Self> {
        if val.trim().is_empty() {
            return Err(Error::malformed("empty Encapsulated header"));
        }

        let mut entries: Vec<OffsetEntry> = Vec::new();
        for part in val.split(',') {
            let p = part.trim();
            let (name_raw, off_raw) = p
                .split_once('=')
                .ok_or_else(|| Error::malformed(format!("invalid Encapsulated token: {p}")))?;

            let label: SegmentLabel = name_raw.parse()?;
            let offset: usize = off_raw.trim().parse().map_err(|_| {
                Error::malformed(format!("invalid Encapsulated offset: {}", off_raw.trim()))
            })?;

            if entries.iter().any(|e| e.label == label) {
                return Err(Error::malformed(format!(
                    "duplicate Encapsulated part name: {label}"
                )));
            }
            if let Some(prev) = entries.last() {
                if offset < prev.offset {
                    return Err(Error::malformed(format!(
                        "Encapsulated offsets not monotonic: {} -> {}",
                        prev.offset, offset
                    )));
                }
                if prev.label.is_body() {
                    return Err(Error::malformed(format!(
                        "Encapsulated part {label} follows body part {}",
                        prev.label
                    )));
                }
            }
            entries.push(OffsetEntry { label, offset });
        }

        if entries.last().is_some_and(|e| !e.label.is_body()) {
            return Err(Error::malformed(
                "Encapsulated header must end with a body part",
            ));
        }

        let enc = Self { entries };
        for len in [enc.req_hdr_len(), enc.res_hdr_len()] {
            if len > MAX_ENCAPSULATED_HDR_BYTES {
                return Err(Error::malformed(format!(
                    "encapsulated header segment too large: {len} bytes"
                )));
            }
        }
        Ok(enc)
    }

    pub fn entries(&self) -> &[OffsetEntry] {
        &self.entries
    }

    /// Length of the `req-hdr` segment: next offset minus its own offset.
    pub fn req_hdr_len(&self) -> usize {
        self.segment_len(SegmentLabel::ReqHdr)
    }

    /// Length of the `res-hdr` segment: next offset minus its own offset.
    pub fn res_hdr_len(&self) -> usize {
        self.segment_len(SegmentLabel::ResHdr)
    }

    fn segment_len(&self, label: SegmentLabel) -> usize {
        self.entries
            .windows(2)
            .find(|w| w[0].label == label)
            .map(|w| w[1].offset - w[0].offset)
            .unwrap_or(0)
    }

    /// Label of the last entry; decides which body (if any) follows.
    pub fn body_label(&self) -> Option<SegmentLabel> {
        self.entries.last().map(|e| e.label)
    }
}

impl fmt::Display for Encapsulated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, e) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", e.label, e.offset)?;
        }
        Ok(())
    }
}

impl FromIterator<OffsetEntry> for Encapsulated {
    fn from_iter<I: IntoIterator<Item = OffsetEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

pub fn http_version_str(v: Version) -> &'static str {
    match v {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_11 => "HTTP/1.1",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}

/// Return canonical ICAP header name (title-cased, with special-cases).
/// Input should be lowercased (http::HeaderName::as_str() already is).
pub fn canon_icap_header(name: &str) -> Cow<'_, str> {
    match name {
        "methods" => Cow::Borrowed("Methods"),
        "istag" => Cow::Borrowed("ISTag"),
        "encapsulated" => Cow::Borrowed("Encapsulated"),
        "service" => Cow::Borrowed("Service"),
        "max-connections" => Cow::Borrowed("Max-Connections"),
        "preview" => Cow::Borrowed("Preview"),
        "allow" => Cow::Borrowed("Allow"),
        "transfer-complete" => Cow::Borrowed("Transfer-Complete"),
        "date" => Cow::Borrowed("Date"),
        "server" => Cow::Borrowed("Server"),
        "connection" => Cow::Borrowed("Connection"),
        // Fallback: Title-Case each hyphen-separated token.
        _ => {
            let mut out = String::with_capacity(name.len());
            for (i, seg) in name.split('-').enumerate() {
                if i > 0 {
                    out.push('-');
                }
                let mut chars = seg.chars();
                if let Some(c0) = chars.next() {
                    out.extend(c0.to_uppercase());
                    for c in chars {
                        out.extend(c.to_lowercase());
                    }
                }
            }
            Cow::Owned(out)
        }
    }
}
