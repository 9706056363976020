//! ICAP response types and the response encoder.
//!
//! This module defines:
//! - [`StatusCode`]: the ICAP status codes this server emits (RFC 3507).
//! - [`Segments`]: the four encapsulated HTTP parts of a response and their
//!   wire encoding (offset table + chunked bodies).
//! - [`Response`]: status line, ICAP headers and payload; [`Response::to_raw`]
//!   is the encoder, [`Response::read_from`] the matching parser.
//!
//! # Examples
//!
//! ```rust
//! use icap_engine::{Response, Segments, StatusCode};
//!
//! let resp = Response::new(StatusCode::Ok200, "OK").with_segments(Segments {
//!     req_hdr: b"GET / HTTP/1.1\r\nHost: a\r\n\r\n".to_vec(),
//!     req_body: b"hello".to_vec(),
//!     ..Segments::default()
//! });
//! let raw = String::from_utf8(resp.to_raw()).unwrap();
//! assert!(raw.contains("Encapsulated: req-hdr=0, req-body=27\r\n"));
//! assert!(raw.ends_with("5\r\nhello\r\n0\r\n\r\n"));
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use http::{HeaderMap, HeaderName, HeaderValue};
use tokio::io::{AsyncBufRead, AsyncRead};
use tracing::{debug, trace, warn};

use crate::ICAP_VERSION;
use crate::config::ServerIdentity;
use crate::error::{Error, IcapResult};
use crate::parser::chunked::{ChunkedBodyDecoder, DecodeMode};
use crate::parser::icap::{Encapsulated, OffsetEntry, SegmentLabel, canon_icap_header};
use crate::parser::wire::read_segment;
use crate::parser::{read_header_block, split_lines, write_chunk_into};

const LAST_CHUNK: &[u8] = b"0\r\n\r\n";

/// ICAP status codes as defined in RFC 3507.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Continue100,
    Ok200,
    NoContent204,
    BadRequest400,
    NotFound404,
    MethodNotAllowed405,
    InternalServerError500,
    ServiceUnavailable503,
}

impl StatusCode {
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::Continue100 => 100,
            StatusCode::Ok200 => 200,
            StatusCode::NoContent204 => 204,
            StatusCode::BadRequest400 => 400,
            StatusCode::NotFound404 => 404,
            StatusCode::MethodNotAllowed405 => 405,
            StatusCode::InternalServerError500 => 500,
            StatusCode::ServiceUnavailable503 => 503,
        }
    }

    /// Reason phrase used on the status line.
    pub fn reason(&self) -> &'static str {
        match self {
            StatusCode::Continue100 => "Continue",
            StatusCode::Ok200 => "OK",
            StatusCode::NoContent204 => "No Content",
            StatusCode::BadRequest400 => "Bad Request",
            StatusCode::NotFound404 => "Service Not Found",
            StatusCode::MethodNotAllowed405 => "Method Not Allowed",
            StatusCode::InternalServerError500 => "Server Error",
            StatusCode::ServiceUnavailable503 => "Service Unavailable",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u16())
    }
}

impl TryFrom<u16> for StatusCode {
    type Error = &'static str;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        Ok(match v {
            100 => StatusCode::Continue100,
            200 => StatusCode::Ok200,
            204 => StatusCode::NoContent204,
            400 => StatusCode::BadRequest400,
            404 => StatusCode::NotFound404,
            405 => StatusCode::MethodNotAllowed405,
            500 => StatusCode::InternalServerError500,
            503 => StatusCode::ServiceUnavailable503,
            _ => return Err("Invalid ICAP status code"),
        })
    }
}

impl FromStr for StatusCode {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code: u16 = s.trim().parse().map_err(|_| "Invalid status code")?;
        StatusCode::try_from(code)
    }
}

/// Encapsulated HTTP parts of a message, in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Segments {
    pub req_hdr: Vec<u8>,
    pub req_body: Vec<u8>,
    pub res_hdr: Vec<u8>,
    pub res_body: Vec<u8>,
}

impl Segments {
    pub fn is_empty(&self) -> bool {
        self.req_hdr.is_empty()
            && self.req_body.is_empty()
            && self.res_hdr.is_empty()
            && self.res_body.is_empty()
    }

    pub fn has_body(&self) -> bool {
        !self.req_body.is_empty() || !self.res_body.is_empty()
    }

    /// Build the offset table and payload bytes.
    ///
    /// Only non-empty parts are emitted; offsets are cumulative lengths of the
    /// parts before them (bodies counted in their chunked form). Without a
    /// body the table ends with `null-body`. Each body is a single chunk and
    /// the payload ends with the last chunk when a body was written.
    pub fn encode(&self) -> (Encapsulated, Vec<u8>) {
        let mut entries = Vec::with_capacity(4);
        let mut payload = Vec::new();

        let parts: [(SegmentLabel, &[u8]); 4] = [
            (SegmentLabel::ReqHdr, &self.req_hdr),
            (SegmentLabel::ReqBody, &self.req_body),
            (SegmentLabel::ResHdr, &self.res_hdr),
            (SegmentLabel::ResBody, &self.res_body),
        ];
        for (label, bytes) in parts {
            if bytes.is_empty() {
                continue;
            }
            entries.push(OffsetEntry {
                label,
                offset: payload.len(),
            });
            if label.is_body() {
                write_chunk_into(&mut payload, bytes);
            } else {
                payload.extend_from_slice(bytes);
            }
        }

        if self.has_body() {
            payload.extend_from_slice(LAST_CHUNK);
        } else {
            entries.push(OffsetEntry {
                label: SegmentLabel::NullBody,
                offset: payload.len(),
            });
        }

        (entries.into_iter().collect(), payload)
    }
}

/// Representation of an ICAP response.
#[derive(Debug, Clone)]
pub struct Response {
    /// ICAP protocol version (usually `"ICAP/1.0"`).
    pub version: String,
    pub status_code: StatusCode,
    /// Human-readable status text (e.g. `"OK"`, `"No Content"`).
    pub status_text: String,
    /// ICAP headers in emission order; `Encapsulated` is computed by [`Response::to_raw`].
    pub headers: HeaderMap,
    pub segments: Segments,
    /// Error cause sent as `opt-body`; takes precedence over `segments`.
    pub opt_body: Option<Vec<u8>>,
}

impl Response {
    /// Create a new ICAP response with the given status code and status text.
    pub fn new(status_code: StatusCode, status_text: &str) -> Self {
        Self {
            version: ICAP_VERSION.to_string(),
            status_code,
            status_text: status_text.to_string(),
            headers: HeaderMap::new(),
            segments: Segments::default(),
            opt_body: None,
        }
    }

    /// Response starting with the `Date` and `Server` headers.
    pub fn from_server(status_code: StatusCode, identity: &ServerIdentity) -> Self {
        Self::new(status_code, status_code.reason())
            .add_header("date", &http_date())
            .add_header("server", &identity.name)
    }

    /// Error response; always closes the connection.
    pub fn error(status_code: StatusCode, identity: &ServerIdentity) -> Self {
        Self::from_server(status_code, identity).add_header("connection", "close")
    }

    /// `ICAP/1.0 100 Continue` interim response.
    pub fn continue_100() -> Self {
        Self::new(StatusCode::Continue100, StatusCode::Continue100.reason())
    }

    /// Add or overwrite a header. `name` must be lower-case; an invalid value is skipped.
    pub fn add_header(mut self, name: &'static str, value: &str) -> Self {
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.headers.insert(HeaderName::from_static(name), v);
            }
            Err(_) => warn!(header = name, "dropping invalid ICAP header value"),
        }
        self
    }

    pub fn with_segments(mut self, segments: Segments) -> Self {
        self.segments = segments;
        self
    }

    pub fn with_opt_body(mut self, body: &[u8]) -> Self {
        self.opt_body = Some(body.to_vec());
        self
    }

    /// Get a header value by name.
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Whether the connection must be closed after this response.
    pub fn closes_connection(&self) -> bool {
        self.get_header("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }

    /// Value of the `Encapsulated` header and the payload that follows the header block.
    pub fn encapsulation(&self) -> (Encapsulated, Vec<u8>) {
        match &self.opt_body {
            Some(body) => {
                let mut payload = Vec::with_capacity(body.len() + 16);
                write_chunk_into(&mut payload, body);
                payload.extend_from_slice(LAST_CHUNK);
                let enc = [OffsetEntry {
                    label: SegmentLabel::OptBody,
                    offset: 0,
                }]
                .into_iter()
                .collect();
                (enc, payload)
            }
            None => self.segments.encode(),
        }
    }

    /// Serialize into raw ICAP bytes.
    pub fn to_raw(&self) -> Vec<u8> {
        let mut out = format!(
            "{} {} {}\r\n",
            self.version, self.status_code, self.status_text
        )
        .into_bytes();

        for (name, value) in self.headers.iter() {
            out.extend_from_slice(canon_icap_header(name.as_str()).as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }

        if self.status_code == StatusCode::Continue100 {
            out.extend_from_slice(b"\r\n");
            return out;
        }

        let (enc, payload) = self.encapsulation();
        out.extend_from_slice(format!("Encapsulated: {enc}\r\n\r\n").as_bytes());
        out.extend_from_slice(&payload);
        out
    }

    /// Read one encoded response from a stream.
    ///
    /// Header segments are read by the lengths in `Encapsulated`, bodies are
    /// de-chunked; the `Encapsulated` header itself is not kept in `headers`.
    pub async fn read_from<R>(reader: &mut R) -> IcapResult<Self>
    where
        R: AsyncBufRead + AsyncRead + Unpin,
    {
        let block = read_header_block(reader)
            .await?
            .ok_or(Error::UnexpectedEof("no ICAP response"))?;
        let head = std::str::from_utf8(&block)
            .map_err(|_| Error::malformed("ICAP response head is not UTF-8"))?;
        let lines = split_lines(head);
        let status_line = lines.first().ok_or_else(|| Error::malformed("empty response"))?;

        let parts: Vec<&str> = status_line.split_whitespace().collect();
        if parts.len() < 2 {
            return Err(Error::malformed("Invalid status line format"));
        }
        if parts[0] != ICAP_VERSION {
            return Err(Error::malformed(format!("Invalid version: {}", parts[0])));
        }
        let status_code = StatusCode::from_str(parts[1])
            .map_err(|e| Error::malformed(format!("{e}: {}", parts[1])))?;
        let status_text = parts[2..].join(" ");
        debug!(status = %status_code, %status_text, "response head parsed");

        let mut resp = Response::new(status_code, &status_text);
        let mut encapsulated = None;
        for line in &lines[1..] {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            if name.trim().eq_ignore_ascii_case("Encapsulated") {
                encapsulated = Some(Encapsulated::parse(value)?);
                continue;
            }
            let name = HeaderName::from_bytes(name.trim().as_bytes())
                .map_err(|_| Error::malformed(format!("invalid header name: {name}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::malformed(format!("invalid header value for {name}")))?;
            resp.headers.insert(name, value);
        }

        let Some(enc) = encapsulated else {
            return Ok(resp);
        };

        for entry in enc.entries() {
            match entry.label {
                SegmentLabel::ReqHdr => {
                    resp.segments.req_hdr = read_segment(reader, enc.req_hdr_len()).await?;
                }
                SegmentLabel::ResHdr => {
                    resp.segments.res_hdr = read_segment(reader, enc.res_hdr_len()).await?;
                }
                SegmentLabel::ReqBody => {
                    read_body(reader, &mut resp.segments.req_body).await?;
                }
                SegmentLabel::ResBody => {
                    read_body(reader, &mut resp.segments.res_body).await?;
                }
                SegmentLabel::OptBody => {
                    let mut body = Vec::new();
                    read_body(reader, &mut body).await?;
                    resp.opt_body = Some(body);
                }
                SegmentLabel::NullBody => {}
            }
        }
        trace!(segments = ?resp.segments, "response payload read");
        Ok(resp)
    }
}

async fn read_body<R>(reader: &mut R, out: &mut Vec<u8>) -> IcapResult<()>
where
    R: AsyncRead + Unpin,
{
    ChunkedBodyDecoder::new(DecodeMode::Full)
        .decode(reader, out)
        .await
        .map(|_| ())
}

impl fmt::Display for Response {
    /// Formats the ICAP response for debugging: status line and headers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} {} {}",
            self.version, self.status_code, self.status_text
        )?;
        for (name, value) in self.headers.iter() {
            writeln!(
                f,
                "{}: {}",
                canon_icap_header(name.as_str()),
                value.to_str().unwrap_or_default()
            )?;
        }
        Ok(())
    }
}

/// Current time in the RFC 1123 form used by HTTP `Date` headers.
pub fn http_date() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
