use std::num::NonZeroUsize;
use std::time::Duration;

use clap::Parser;
use icap_engine::config::DEFAULT_MAX_OPTIONS;
use icap_engine::error::IcapResult;
use icap_engine::scanner::{ClamScan, platform_default};
use icap_engine::{Server, ServerIdentity};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "rs-icap-server",
    about = "Rust ICAP server",
    long_about = "ICAP/1.0 (RFC 3507) server exposing the info, echo and virus_scan services"
)]
struct Args {
    /// TCP port to listen on
    #[arg(short = 'p', long, env = "ICAP_SERVER_PORT", default_value_t = 1344)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Value of the Server/Service headers
    #[arg(long, env = "ICAP_SERVER_NAME", default_value = "ICAP-Server/1.0")]
    server_name: String,

    /// Concurrent connections (default: CPUs x 100)
    #[arg(long, env = "ICAP_WORKER_POOL_SIZE")]
    max_connections: Option<usize>,

    /// OPTIONS requests served on one connection before it is closed
    #[arg(long, default_value_t = DEFAULT_MAX_OPTIONS)]
    max_options: usize,

    /// Host shown in the info service listing (default: request authority)
    #[arg(long)]
    advertised_host: Option<String>,

    /// Fixed ISTag (default: random per start)
    #[arg(long)]
    istag: Option<String>,

    /// Path of the clamscan binary
    #[arg(long, default_value = ClamScan::DEFAULT_PATH)]
    clamscan: String,

    /// Seconds to wait for open connections on shutdown
    #[arg(long, default_value_t = 5)]
    drain_timeout_secs: u64,

    /// Debug level 1..5 (ERROR..TRACE), default INFO
    #[arg(short = 'd', long)]
    debug_level: Option<u8>,
}

fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
        * 100
}

#[tokio::main]
async fn main() -> IcapResult<()> {
    let args = Args::parse();

    // logging
    tracing_subscriber::fmt()
        .with_max_level(match args.debug_level.unwrap_or(3) {
            0 | 1 => tracing::Level::ERROR,
            2 => tracing::Level::WARN,
            3 => tracing::Level::INFO,
            4 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        })
        .init();

    let mut identity = ServerIdentity::new(args.server_name);
    if let Some(istag) = args.istag {
        identity = identity.with_istag(istag);
    }
    if let Some(host) = args.advertised_host {
        identity = identity.with_advertised_host(host);
    }
    let max_connections = args.max_connections.unwrap_or_else(default_pool_size);

    let server = Server::builder()
        .bind(&format!("{}:{}", args.host, args.port))
        .identity(identity)
        .with_max_connections(max_connections)
        .max_options(args.max_options)
        .scanner(platform_default(args.clamscan))
        .drain_timeout(Duration::from_secs(args.drain_timeout_secs))
        .build()
        .await?;
    info!(
        addr = %server.local_addr()?,
        max_connections,
        istag = %server.context().config.identity.istag,
        "listening"
    );

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
}
