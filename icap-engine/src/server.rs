//! # ICAP server.
//!
//! Accepts TCP connections and runs one [`ConnectionSession`] per connection
//! on its own tokio task. The server:
//!
//! - Serves the built-in `info`, `echo` and `virus_scan` services;
//! - Limits concurrent connections with a semaphore and answers
//!   `503 Service Unavailable` when the pool is full;
//! - Shares one immutable [`EngineContext`] (identity, limits, scanner) with
//!   every session;
//! - Shuts down gracefully: stops accepting, waits for in-flight sessions up
//!   to a drain timeout, then aborts the rest.
//!
//! ## Quick example
//!
//! ```rust,no_run
//! use icap_engine::{Server, ServerIdentity};
//! use icap_engine::error::IcapResult;
//!
//! #[tokio::main]
//! async fn main() -> IcapResult<()> {
//!     let server = Server::builder()
//!         .bind("127.0.0.1:1344")
//!         .identity(ServerIdentity::new("ICAP-Server/1.0"))
//!         .with_max_connections(128)
//!         .build()
//!         .await?;
//!
//!     server
//!         .run_until(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{Instrument, debug, error, info, info_span, trace, warn};

use crate::config::{EngineConfig, ServerIdentity};
use crate::error::IcapResult;
use crate::response::{Response, StatusCode};
use crate::scanner::{ClamScan, ThreatScanner, platform_default};
use crate::session::{ConnectionSession, EngineContext};

/// Default wait for in-flight sessions on shutdown.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// ICAP server.
///
/// Use [`Server::builder`] to construct and run an instance.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<EngineContext>,
    conn_limit: Arc<Semaphore>,
    drain_timeout: Duration,
}

impl Server {
    /// Create a new [`ServerBuilder`].
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn local_addr(&self) -> IcapResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    /// Serve forever.
    pub async fn run(self) -> IcapResult<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept loop; returns once `shutdown` resolves and sessions are drained.
    ///
    /// - Each accepted connection takes a semaphore permit that moves into its
    ///   task. Without a free permit the client gets `503` with
    ///   `Connection: close` and the socket is dropped.
    /// - On shutdown the listener is closed first, then sessions get
    ///   `drain_timeout` to finish before being aborted.
    pub async fn run_until<F>(self, shutdown: F) -> IcapResult<()>
    where
        F: Future<Output = ()>,
    {
        let local_addr = self.listener.local_addr()?;
        info!(addr = %local_addr, "ICAP server started");

        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(active = sessions.len(), "shutdown requested");
                    break;
                }
                accepted = self.listener.accept() => {
                    let (socket, addr) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    trace!(client = %addr, "new connection");

                    let Ok(permit) = Arc::clone(&self.conn_limit).try_acquire_owned() else {
                        refuse(socket, addr, &self.ctx.config.identity).await;
                        continue;
                    };
                    let ctx = Arc::clone(&self.ctx);
                    sessions.spawn(
                        serve(socket, addr, ctx, permit).instrument(info_span!("conn", client = %addr)),
                    );
                }
                Some(done) = sessions.join_next(), if !sessions.is_empty() => {
                    log_join(done);
                }
            }
        }

        drop(self.listener);
        let drained = tokio::time::timeout(self.drain_timeout, async {
            while let Some(done) = sessions.join_next().await {
                log_join(done);
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = sessions.len(),
                timeout = ?self.drain_timeout,
                "drain timeout elapsed, aborting sessions"
            );
            sessions.abort_all();
            while sessions.join_next().await.is_some() {}
        }
        info!("ICAP server stopped");
        Ok(())
    }
}

async fn serve(
    socket: TcpStream,
    addr: SocketAddr,
    ctx: Arc<EngineContext>,
    _permit: OwnedSemaphorePermit,
) {
    if let Err(e) = socket.set_nodelay(true) {
        trace!(error = %e, "set_nodelay failed");
    }
    match ConnectionSession::new(socket, ctx).run().await {
        Ok(()) => trace!(client = %addr, "connection closed"),
        Err(e) => warn!(client = %addr, error = %e, "connection ended abruptly"),
    }
}

async fn refuse(mut socket: TcpStream, addr: SocketAddr, identity: &ServerIdentity) {
    warn!(client = %addr, "refusing connection: too many concurrent connections");
    let resp = Response::error(StatusCode::ServiceUnavailable503, identity);
    if let Err(e) = socket.write_all(&resp.to_raw()).await {
        warn!(client = %addr, error = %e, "failed to send 503");
        return;
    }
    if let Err(e) = socket.shutdown().await {
        trace!(client = %addr, error = %e, "shutdown after 503");
    }
}

fn log_join(done: Result<(), tokio::task::JoinError>) {
    if let Err(e) = done {
        if e.is_panic() {
            error!(error = %e, "session task panicked");
        } else {
            debug!(error = %e, "session task cancelled");
        }
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    bind_addr: Option<String>,
    config: EngineConfig,
    scanner: Option<Arc<dyn ThreatScanner>>,
    drain_timeout: Duration,
}

impl ServerBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bind_addr: None,
            config: EngineConfig::default(),
            scanner: None,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }

    /// Set the bind address, e.g. `"127.0.0.1:1344"`.
    pub fn bind(mut self, addr: &str) -> Self {
        self.bind_addr = Some(addr.to_string());
        self
    }

    /// Limit the number of concurrent connections accepted by the server.
    ///
    /// The value is also advertised in `OPTIONS` as `Max-Connections`.
    pub fn with_max_connections(mut self, n: usize) -> Self {
        self.config = self.config.with_max_connections(n);
        self
    }

    pub fn identity(mut self, identity: ServerIdentity) -> Self {
        self.config.identity = identity;
        self
    }

    /// Cap of consecutive OPTIONS transactions on one connection.
    pub fn max_options(mut self, n: usize) -> Self {
        self.config = self.config.with_max_options_per_connection(n);
        self
    }

    /// Scanner used by `virus_scan`; defaults to [`platform_default`].
    pub fn scanner(mut self, scanner: Arc<dyn ThreatScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Bind the listener and create a [`Server`].
    pub async fn build(self) -> IcapResult<Server> {
        let bind_addr = self
            .bind_addr
            .unwrap_or_else(|| "127.0.0.1:1344".to_string());
        let listener = TcpListener::bind(&bind_addr).await?;

        let scanner = self
            .scanner
            .unwrap_or_else(|| platform_default(ClamScan::DEFAULT_PATH));
        let conn_limit = Arc::new(Semaphore::new(self.config.max_connections));
        debug!(
            addr = %bind_addr,
            max_connections = self.config.max_connections,
            istag = %self.config.identity.istag,
            "server configured"
        );

        Ok(Server {
            listener,
            ctx: Arc::new(EngineContext::new(self.config, scanner)),
            conn_limit,
            drain_timeout: self.drain_timeout,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
