// Development ICAP server on 127.0.0.1:1344 that needs no antivirus installed:
// - info, echo:  built-in services
// - virus_scan:  flags any body containing the word "EICAR"

use std::sync::Arc;

use async_trait::async_trait;
use icap_engine::scanner::{ScanResult, ScannerError, ThreatScanner};
use icap_engine::{Server, ServerIdentity};
use tracing::info;

#[derive(Debug)]
struct KeywordScanner(&'static [u8]);

#[async_trait]
impl ThreatScanner for KeywordScanner {
    async fn scan(&self, content: &[u8]) -> Result<ScanResult, ScannerError> {
        let found = memchr::memmem::find(content, self.0).is_some();
        Ok(ScanResult {
            threats: if found {
                vec!["Keyword.Test.EICAR".to_string()]
            } else {
                Vec::new()
            },
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let server = Server::builder()
        .bind("127.0.0.1:1344")
        .identity(ServerIdentity::new("icap-engine-demo/0.1"))
        .scanner(Arc::new(KeywordScanner(b"EICAR")))
        .with_max_connections(64)
        .build()
        .await?;
    info!(addr = %server.local_addr()?, "try: OPTIONS icap://127.0.0.1:1344/echo");

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
