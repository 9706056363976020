//! ICAP request line and header table.
//!
//! This module defines:
//! - [`Method`]: the three ICAP methods (`OPTIONS`, `REQMOD`, `RESPMOD`).
//! - [`RequestLine`]: the validated `METHOD icap://authority/service ICAP/1.0` line.
//! - [`HeaderTable`]: ordered ICAP headers with case-insensitive lookup.
//!
//! # Example
//! ```rust
//! use icap_engine::{Method, RequestLine};
//!
//! let line = RequestLine::parse("reqmod icap://proxy.local/echo ICAP/1.0").unwrap();
//! assert_eq!(line.method, Method::ReqMod);
//! assert_eq!(line.authority, "proxy.local");
//! assert_eq!(line.service, "echo");
//! ```

use std::fmt;
use std::str::FromStr;

use tracing::trace;

use crate::error::{Error, IcapResult};

const ICAP_SCHEME: &str = "icap://";

/// ICAP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Method {
    Options,
    ReqMod,
    RespMod,
}

impl Method {
    pub const ALL: [Method; 3] = [Method::Options, Method::ReqMod, Method::RespMod];

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::ReqMod => "REQMOD",
            Method::RespMod => "RESPMOD",
        }
    }

    /// True for REQMOD/RESPMOD.
    #[inline]
    pub fn is_mod(&self) -> bool {
        matches!(self, Method::ReqMod | Method::RespMod)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim();
        Method::ALL
            .into_iter()
            .find(|m| t.eq_ignore_ascii_case(m.as_str()))
            .ok_or_else(|| Error::UnsupportedMethod(t.to_string()))
    }
}

/// Validated request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    /// Everything between `icap://` and the last `/`.
    pub authority: String,
    /// Service path without the leading `/`; empty when the URI has no path.
    pub service: String,
    pub version: String,
}

impl RequestLine {
    /// Validate the first line of a request.
    ///
    /// Checks run in a fixed order and the first failure wins:
    /// unknown method → 405, method not followed by a space → 400,
    /// not exactly three fields → 400, bad `icap://` URI → 400.
    pub fn parse(line: &str) -> IcapResult<Self> {
        let upper = line.to_ascii_uppercase();

        let method = Method::ALL
            .into_iter()
            .find(|m| upper.starts_with(m.as_str()))
            .ok_or_else(|| {
                Error::UnsupportedMethod(line.split_whitespace().next().unwrap_or("").to_string())
            })?;

        if !upper.starts_with(&format!("{method} ")) {
            return Err(Error::malformed("Invalid ICAP Method Syntax"));
        }

        let mut fields: Vec<&str> = line.split(char::is_whitespace).collect();
        while fields.last() == Some(&"") {
            fields.pop();
        }
        if fields.len() != 3 {
            return Err(Error::malformed("Invalid ICAP Method Syntax"));
        }

        let (authority, service) =
            split_icap_uri(fields[1]).ok_or_else(|| Error::malformed("Invalid ICAP URI"))?;
        trace!(%method, authority, service, "request line parsed");

        Ok(Self {
            method,
            authority: authority.to_string(),
            service: service.to_string(),
            version: fields[2].to_string(),
        })
    }
}

/// Split `icap://<authority>/<service>` at the **last** slash.
fn split_icap_uri(uri: &str) -> Option<(&str, &str)> {
    let scheme = uri.get(..ICAP_SCHEME.len())?;
    if !scheme.eq_ignore_ascii_case(ICAP_SCHEME) {
        return None;
    }
    let rest = &uri[ICAP_SCHEME.len()..];
    match rest.rfind('/') {
        Some(pos) => Some((&rest[..pos], &rest[pos + 1..])),
        None => Some((rest, "")),
    }
}

/// Ordered ICAP headers.
///
/// Duplicates are kept in arrival order; [`HeaderTable::get`] returns the last one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderTable {
    entries: Vec<(String, String)>,
}

impl HeaderTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw header lines; lines without a colon are skipped.
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>) -> Self {
        let mut table = Self::new();
        for line in lines {
            if let Some((name, value)) = line.split_once(':') {
                table.append(name.trim(), value.trim());
            }
        }
        table
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Whether `Allow:` lists the given capability (e.g. `"204"`).
    pub fn allows(&self, capability: &str) -> bool {
        self.get_all("Allow")
            .flat_map(|v| v.split(','))
            .any(|t| t.trim() == capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("OPTIONS icap://localhost/echo ICAP/1.0", Method::Options, "localhost", "echo")]
    #[case("reqmod icap://10.0.0.1:1344/virus_scan ICAP/1.0", Method::ReqMod, "10.0.0.1:1344", "virus_scan")]
    #[case("RespMod icap://h/a/info ICAP/1.0", Method::RespMod, "h/a", "info")]
    #[case("OPTIONS icap://localhost/ ICAP/1.0", Method::Options, "localhost", "")]
    #[case("OPTIONS icap://localhost ICAP/1.0", Method::Options, "localhost", "")]
    #[case("OPTIONS icap://h/echo ICAP/1.0 ", Method::Options, "h", "echo")]
    #[case("REQMOD icap://h/echo ICAP/1.0 \t", Method::ReqMod, "h", "echo")]
    fn parses_valid_lines(
        #[case] line: &str,
        #[case] method: Method,
        #[case] authority: &str,
        #[case] service: &str,
    ) {
        let parsed = RequestLine::parse(line).expect("valid line");
        assert_eq!(parsed.method, method);
        assert_eq!(parsed.authority, authority);
        assert_eq!(parsed.service, service);
        assert_eq!(parsed.version, "ICAP/1.0");
    }

    #[rstest]
    #[case("GET http://x/ HTTP/1.1")]
    #[case("FOO icap://localhost/echo ICAP/1.0")]
    #[case("")]
    fn unknown_method_is_405(#[case] line: &str) {
        let err = RequestLine::parse(line).unwrap_err();
        assert!(matches!(err, Error::UnsupportedMethod(_)), "{err:?}");
    }

    #[rstest]
    #[case("REQMODX icap://localhost/echo ICAP/1.0")]
    #[case("OPTIONS icap://localhost/echo")]
    #[case("OPTIONS  icap://localhost/echo ICAP/1.0")]
    #[case("OPTIONS icap://localhost/echo ICAP/1.0 extra")]
    fn bad_syntax_is_400(#[case] line: &str) {
        let err = RequestLine::parse(line).unwrap_err();
        assert!(
            matches!(err, Error::MalformedRequest(ref m) if m.contains("Method Syntax")),
            "{err:?}"
        );
    }

    #[rstest]
    #[case("OPTIONS http://localhost/echo ICAP/1.0")]
    #[case("REQMOD localhost/echo ICAP/1.0")]
    #[case("RESPMOD icap:/localhost/echo ICAP/1.0")]
    fn bad_uri_is_400(#[case] line: &str) {
        let err = RequestLine::parse(line).unwrap_err();
        assert!(
            matches!(err, Error::MalformedRequest(ref m) if m == "Invalid ICAP URI"),
            "{err:?}"
        );
    }

    #[test]
    fn header_table_lookup_is_case_insensitive_and_last_wins() {
        let t = HeaderTable::from_lines([
            "Host: localhost",
            "encapsulated: req-hdr=0, null-body=10",
            "no colon here",
            "Allow: 204",
            "ENCAPSULATED: null-body=0",
        ]);
        assert_eq!(t.len(), 4);
        assert_eq!(t.get("Encapsulated"), Some("null-body=0"));
        assert_eq!(t.get_all("encapsulated").count(), 2);
        assert!(t.allows("204"));
        assert!(!t.allows("206"));
        assert!(t.get("Preview").is_none());
    }

    #[test]
    fn method_from_str() {
        assert_eq!("respmod".parse::<Method>().unwrap(), Method::RespMod);
        assert!(" Options ".parse::<Method>().is_ok());
        assert!("PUT".parse::<Method>().is_err());
    }
}
