//! Per-connection driver.
//!
//! A [`ConnectionSession`] owns one buffered stream and serves transactions
//! on it one at a time:
//!
//! ```text
//! Idle ─▶ ParsingHeaders ─┬─▶ Rejected ───────────────────────▶ Closed
//!                         └─▶ DispatchingBody ─▶ ResponseWritten ─┬─▶ Idle (OPTIONS)
//!                                                                 └─▶ Closed
//! ```
//!
//! Only a successful OPTIONS keeps the connection open, and at most
//! `max_options_per_connection` times.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::IcapResult;
use crate::parser::read_header_block;
use crate::request::Method;
use crate::response::Response;
use crate::scanner::ThreatScanner;
use crate::service::Service;
use crate::transaction::IcapTransaction;

/// Shared, read-only state every session needs.
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub config: EngineConfig,
    pub scanner: Arc<dyn ThreatScanner>,
}

impl EngineContext {
    pub fn new(config: EngineConfig, scanner: Arc<dyn ThreatScanner>) -> Self {
        Self { config, scanner }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Idle,
    Close,
}

/// Serves ICAP transactions on one connection.
pub struct ConnectionSession<S> {
    stream: BufReader<S>,
    ctx: Arc<EngineContext>,
    options_served: usize,
}

impl<S> ConnectionSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, ctx: Arc<EngineContext>) -> Self {
        Self {
            stream: BufReader::new(stream),
            ctx,
            options_served: 0,
        }
    }

    /// Serve until the connection is closed.
    ///
    /// Rejections and failures that can still be framed are answered before
    /// closing; stream-level failures are returned without a response.
    pub async fn run(mut self) -> IcapResult<()> {
        loop {
            match self.serve_one().await {
                Ok(Next::Idle) => continue,
                Ok(Next::Close) => break,
                Err(e) => {
                    let Some(resp) = e.to_response(&self.ctx.config.identity) else {
                        debug!(error = %e, "session ended without response");
                        return Err(e);
                    };
                    warn!(status = %resp.status_code, error = %e, "rejecting request");
                    self.write_response(&resp).await?;
                    break;
                }
            }
        }
        if let Err(e) = self.stream.get_mut().shutdown().await {
            trace!(error = %e, "shutdown after close");
        }
        Ok(())
    }

    async fn serve_one(&mut self) -> IcapResult<Next> {
        let Some(block) = read_header_block(&mut self.stream).await? else {
            trace!("peer closed connection");
            return Ok(Next::Close);
        };

        let mut txn = IcapTransaction::parse_head(&block)?;
        let service = Service::resolve(txn.method(), txn.service())?;
        txn.read_encapsulated(&mut self.stream).await?;

        let method = txn.method();
        let ctx = Arc::clone(&self.ctx);
        let resp = service
            .dispatch(txn, &ctx.config, ctx.scanner.as_ref())
            .await?;
        self.write_response(&resp).await?;
        debug!(%method, %service, status = %resp.status_code, "response written");

        if method != Method::Options || resp.closes_connection() {
            return Ok(Next::Close);
        }
        self.options_served += 1;
        if self.options_served >= ctx.config.max_options_per_connection {
            info!(
                served = self.options_served,
                "OPTIONS limit reached, closing connection"
            );
            return Ok(Next::Close);
        }
        Ok(Next::Idle)
    }

    async fn write_response(&mut self, resp: &Response) -> IcapResult<()> {
        self.stream.write_all(&resp.to_raw()).await?;
        self.stream.flush().await?;
        Ok(())
    }
}
