#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

pub mod config;
pub mod error;
mod parser;
pub mod request;
pub mod response;
pub mod scanner;
pub mod server;
pub mod service;
pub mod session;
pub mod transaction;

pub use config::{EngineConfig, ServerIdentity};
pub use parser::chunked::{BodyEnd, ChunkedBodyDecoder, DecodeMode};
pub use parser::icap::{Encapsulated, OffsetEntry, SegmentLabel};
pub use request::{HeaderTable, Method, RequestLine};
pub use response::{Response, Segments, StatusCode};
pub use scanner::{ScanResult, ThreatScanner};
pub use server::{Server, ServerBuilder};
pub use service::Service;
pub use session::{ConnectionSession, EngineContext};
pub use transaction::IcapTransaction;

///Lib version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
///Max Header size
pub const MAX_HDR_BYTES: usize = 64 * 1024;
/// Largest encapsulated HTTP header segment accepted from a client.
pub const MAX_ENCAPSULATED_HDR_BYTES: usize = 1024 * 1024;
/// Supported ICAP protocol version.
pub const ICAP_VERSION: &str = "ICAP/1.0";
