//! Error type shared by the whole engine.
//!
//! Every variant knows which ICAP status it is surfaced as (see [`Error::status`]).
//! Parse-time rejections are answered by the session with [`Error::to_response`];
//! stream-level failures ([`Error::Network`], [`Error::UnexpectedEof`]) simply
//! end the session because no response can be framed anymore.

use crate::config::ServerIdentity;
use crate::request::Method;
use crate::response::{Response, StatusCode};
use crate::scanner::ScannerError;
use thiserror::Error;

/// Main error type of the ICAP engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Socket level failure (broken pipe, reset, ...).
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// The peer closed the stream in the middle of an ICAP header block.
    #[error("Unexpected EOF: {0}")]
    UnexpectedEof(&'static str),

    /// Unparsable request line, headers, URI or `Encapsulated` table.
    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    /// The request line does not start with a supported method.
    #[error("Unsupported method: {0}")]
    UnsupportedMethod(String),

    /// The service path is not served for this method.
    #[error("Unknown service '{service}' for {method}")]
    UnknownService { method: Method, service: String },

    /// Broken chunked framing inside an encapsulated body.
    #[error("Chunk framing error: {0}")]
    ChunkFraming(String),

    /// The threat scanner collaborator failed.
    #[error("Scanner failure: {0}")]
    Scanner(#[from] ScannerError),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl Error {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest(message.into())
    }

    pub fn framing(message: impl Into<String>) -> Self {
        Self::ChunkFraming(message.into())
    }

    /// ICAP status this error is answered with, `None` when the stream is unusable.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Error::Network(_) | Error::UnexpectedEof(_) => None,
            Error::MalformedRequest(_) => Some(StatusCode::BadRequest400),
            Error::UnsupportedMethod(_) => Some(StatusCode::MethodNotAllowed405),
            Error::UnknownService { method, .. } => Some(match method {
                Method::Options => StatusCode::NotFound404,
                Method::ReqMod | Method::RespMod => StatusCode::MethodNotAllowed405,
            }),
            Error::ChunkFraming(_) | Error::Scanner(_) | Error::Unexpected(_) => {
                Some(StatusCode::InternalServerError500)
            }
        }
    }

    /// Build the wire response for this error.
    ///
    /// 400 and 500 carry a human readable cause as `opt-body`; 404/405 only close.
    pub fn to_response(&self, identity: &ServerIdentity) -> Option<Response> {
        let status = self.status()?;
        let resp = Response::error(status, identity);
        Some(match self {
            Error::MalformedRequest(cause) => resp.with_opt_body(cause.as_bytes()),
            Error::ChunkFraming(_) | Error::Scanner(_) | Error::Unexpected(_) => {
                resp.with_opt_body(self.to_string().as_bytes())
            }
            _ => resp,
        })
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::Unexpected(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::Unexpected(err.to_string())
    }
}

/// Result of ICAP operations.
pub type IcapResult<T> = Result<T, Error>;
