use http::{HeaderMap, Response as HttpResponse, StatusCode, Version};

use crate::error::{Error, IcapResult};
use crate::parser::http_version_str;
use crate::parser::icap::canon_icap_header;

/// Start an embedded HTTP response head.
pub(crate) fn http_head(status: StatusCode) -> http::response::Builder {
    HttpResponse::builder()
        .status(status)
        .version(Version::HTTP_11)
}

/// Serialize an HTTP response head for a `res-hdr` segment.
///
/// Header names are title-cased; the block ends with the empty line.
pub(crate) fn serialize_http_response_head(builder: http::response::Builder) -> IcapResult<Vec<u8>> {
    let resp = builder
        .body(())
        .map_err(|e| Error::Unexpected(format!("invalid embedded HTTP header: {e}")))?;
    let code = resp.status();
    let mut out = format!(
        "{} {} {}\r\n",
        http_version_str(resp.version()),
        code.as_u16(),
        code.canonical_reason().unwrap_or("")
    );
    write_headers(&mut out, resp.headers());
    out.push_str("\r\n");
    Ok(out.into_bytes())
}

fn write_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers.iter() {
        out.push_str(&canon_icap_header(name.as_str()));
        out.push_str(": ");
        out.push_str(value.to_str().unwrap_or_default());
        out.push_str("\r\n");
    }
}
