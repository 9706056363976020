//! Service selection and the three built-in services.
//!
//! Services are looked up from a static table of `(name prefix, methods)`.
//! The service name from the URI is matched case-insensitively by prefix, so
//! `echo`, `ECHO` and `echo2` all select [`Service::Echo`].

pub mod options;

use std::fmt;

use http::StatusCode as HttpStatus;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, IcapResult};
use crate::parser::http_embed::{http_head, serialize_http_response_head};
use crate::request::Method;
use crate::response::{Response, Segments, StatusCode, http_date};
use crate::scanner::ThreatScanner;
use crate::transaction::IcapTransaction;

pub use options::ServiceOptions;

/// Built-in ICAP services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Lists the endpoints of this server.
    Info,
    /// Returns the received message unchanged.
    Echo,
    /// Scans the message body for threats.
    VirusScan,
}

struct Route {
    prefix: &'static str,
    service: Service,
    methods: &'static [Method],
}

static ROUTES: [Route; 3] = [
    Route {
        prefix: "info",
        service: Service::Info,
        methods: &[Method::Options, Method::RespMod],
    },
    Route {
        prefix: "echo",
        service: Service::Echo,
        methods: &Method::ALL,
    },
    Route {
        prefix: "virus_scan",
        service: Service::VirusScan,
        methods: &Method::ALL,
    },
];

impl Service {
    /// Select the service for `name`, checking that it accepts `method`.
    ///
    /// Fails with [`Error::UnknownService`] (404 for OPTIONS, 405 otherwise).
    pub fn resolve(method: Method, name: &str) -> IcapResult<Self> {
        let lower = name.to_ascii_lowercase();
        ROUTES
            .iter()
            .find(|r| lower.starts_with(r.prefix))
            .filter(|r| r.methods.contains(&method))
            .map(|r| r.service)
            .ok_or_else(|| Error::UnknownService {
                method,
                service: name.to_string(),
            })
    }

    pub fn name(&self) -> &'static str {
        self.route().prefix
    }

    pub fn allowed_methods(&self) -> &'static [Method] {
        self.route().methods
    }

    /// Adaptation methods (REQMOD/RESPMOD) this service accepts.
    pub fn mod_methods(&self) -> SmallVec<[Method; 2]> {
        self.allowed_methods()
            .iter()
            .copied()
            .filter(Method::is_mod)
            .collect()
    }

    fn route(&self) -> &'static Route {
        match self {
            Service::Info => &ROUTES[0],
            Service::Echo => &ROUTES[1],
            Service::VirusScan => &ROUTES[2],
        }
    }

    /// Produce the response for a fully read transaction.
    pub async fn dispatch(
        &self,
        txn: IcapTransaction,
        config: &EngineConfig,
        scanner: &dyn ThreatScanner,
    ) -> IcapResult<Response> {
        if txn.method() == Method::Options {
            return Ok(ServiceOptions::for_service(*self, config).build_response(config));
        }
        match self {
            Service::Info => info(&txn, config),
            Service::Echo => Ok(echo(txn, config)),
            Service::VirusScan => virus_scan(&txn, config, scanner).await,
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// REQMOD/RESPMOD response carrying `ISTag` and `Connection: close`.
fn adaptation_response(status: StatusCode, config: &EngineConfig) -> Response {
    Response::from_server(status, &config.identity)
        .add_header("istag", &config.identity.istag_header())
        .add_header("connection", "close")
}

fn info(txn: &IcapTransaction, config: &EngineConfig) -> IcapResult<Response> {
    let identity = &config.identity;
    let host = identity
        .advertised_host
        .as_deref()
        .unwrap_or(txn.line.authority.as_str());

    let mut body = String::new();
    for method in Method::ALL {
        for route in ROUTES.iter().filter(|r| r.methods.contains(&method)) {
            body.push_str(&format!("{method} icap://{host}/{} ICAP/1.0\r\n", route.prefix));
        }
    }
    body.push_str("\r\n");

    let res_hdr = serialize_http_response_head(
        http_head(HttpStatus::OK)
            .header("date", http_date())
            .header("server", identity.name.as_str())
            .header("content-type", "text/plain")
            .header("content-length", body.len())
            .header("via", identity.name.as_str()),
    )?;

    Ok(adaptation_response(StatusCode::Ok200, config).with_segments(Segments {
        res_hdr,
        res_body: body.into_bytes(),
        ..Segments::default()
    }))
}

fn echo(txn: IcapTransaction, config: &EngineConfig) -> Response {
    if !txn.segments.has_body() && txn.allows_204() {
        debug!("empty body, answering 204");
        return adaptation_response(StatusCode::NoContent204, config);
    }

    let seg = &txn.segments;
    debug!(
        req_hdr = %String::from_utf8_lossy(&seg.req_hdr),
        req_body = %String::from_utf8_lossy(&seg.req_body),
        res_hdr = %String::from_utf8_lossy(&seg.res_hdr),
        res_body = %String::from_utf8_lossy(&seg.res_body),
        "echoing message"
    );
    adaptation_response(StatusCode::Ok200, config).with_segments(txn.segments)
}

async fn virus_scan(
    txn: &IcapTransaction,
    config: &EngineConfig,
    scanner: &dyn ThreatScanner,
) -> IcapResult<Response> {
    let seg = &txn.segments;
    let content = if !seg.req_body.is_empty() {
        &seg.req_body
    } else {
        &seg.res_body
    };

    let threat = if content.is_empty() {
        debug!("empty body, nothing to scan");
        None
    } else {
        scanner.scan(content).await?.threat_name().map(str::to_string)
    };

    let name = config.identity.name.as_str();
    let segments = match threat {
        Some(threat) => {
            warn!(%threat, service = %txn.line.service, "threat found");
            let body = format!("Virus Found: {threat}\n");
            let res_hdr = serialize_http_response_head(
                http_head(HttpStatus::FORBIDDEN)
                    .header("server", name)
                    .header("content-type", "text/plain")
                    .header("content-length", body.len())
                    .header("via", name)
                    .header("x-threat-description", threat.as_str())
                    .header("x-threat-resolution", "None")
                    .header("x-threat-type", "Threat"),
            )?;
            Segments {
                res_hdr,
                res_body: body.into_bytes(),
                ..Segments::default()
            }
        }
        None => {
            info!(len = content.len(), "content is clean");
            Segments {
                res_hdr: serialize_http_response_head(
                    http_head(HttpStatus::OK)
                        .header("server", name)
                        .header("via", name),
                )?,
                ..Segments::default()
            }
        }
    };

    Ok(adaptation_response(StatusCode::Ok200, config).with_segments(segments))
}
