#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use icap_engine::scanner::{ScanResult, ScannerError};
use icap_engine::{
    ConnectionSession, EngineConfig, EngineContext, Response, ServerIdentity, ThreatScanner,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

pub const EICAR: &[u8] = b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";
pub const EICAR_NAME: &str = "Win.Test.EICAR_HDB-1";

/// Reports EICAR for any content containing the EICAR marker.
#[derive(Debug, Default)]
pub struct FakeScanner;

#[async_trait]
impl ThreatScanner for FakeScanner {
    async fn scan(&self, content: &[u8]) -> Result<ScanResult, ScannerError> {
        let infected = memchr::memmem::find(content, b"EICAR").is_some();
        Ok(ScanResult {
            threats: if infected {
                vec![EICAR_NAME.to_string()]
            } else {
                Vec::new()
            },
        })
    }
}

/// Always fails like a missing scanner binary.
#[derive(Debug, Default)]
pub struct BrokenScanner;

#[async_trait]
impl ThreatScanner for BrokenScanner {
    async fn scan(&self, _content: &[u8]) -> Result<ScanResult, ScannerError> {
        Err(ScannerError::Failed {
            program: "clamscan".into(),
            status: "exit status: 2".into(),
            stderr: "database missing".into(),
        })
    }
}

/// Route engine logs to the test harness output.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn test_config() -> EngineConfig {
    EngineConfig::new(ServerIdentity::new("ICAP-Server/1.0").with_istag("TESTTAG"))
}

/// Send `request` on a fresh session, half-close, and collect everything the server wrote.
pub async fn exchange_with(
    request: &[u8],
    config: EngineConfig,
    scanner: Arc<dyn ThreatScanner>,
) -> Vec<u8> {
    init_tracing();
    let (mut client, server) = duplex(256 * 1024);
    let ctx = Arc::new(EngineContext::new(config, scanner));
    let session = tokio::spawn(ConnectionSession::new(server, ctx).run());

    client.write_all(request).await.expect("write request");
    client.shutdown().await.expect("half-close");
    let mut out = Vec::new();
    client.read_to_end(&mut out).await.expect("read responses");
    let _ = session.await.expect("session task");
    out
}

pub async fn exchange(request: &[u8]) -> Vec<u8> {
    exchange_with(request, test_config(), Arc::new(FakeScanner)).await
}

/// Parse every response in `raw`, in order.
pub async fn parse_all(raw: &[u8]) -> Vec<Response> {
    let mut src = raw;
    let mut out = Vec::new();
    while !src.is_empty() {
        out.push(Response::read_from(&mut src).await.expect("well-formed response"));
    }
    out
}
