//! ICAP `OPTIONS` response for one service.
//!
//! [`ServiceOptions`] collects what a service advertises and serializes it
//! into a [`Response`]:
//!
//! ```text
//! ICAP/1.0 200 OK
//! Date: ...
//! Server: ICAP-Server/1.0
//! Methods: REQMOD, RESPMOD
//! Service: ICAP-Server/1.0
//! ISTag: "5BDEEEA9E1A04F36B0D3F8B1E3A3C6B2"
//! Allow: 204
//! Preview: 0
//! Max-Connections: 1024
//! Transfer-Complete: *
//! Encapsulated: null-body=0
//! ```

use smallvec::SmallVec;

use crate::config::EngineConfig;
use crate::request::Method;
use crate::response::{Response, StatusCode};
use crate::service::Service;

/// What an `OPTIONS` response advertises for a service.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Adaptation methods, listed in `Methods`.
    pub methods: SmallVec<[Method; 2]>,
    /// `Service` header value.
    pub service: String,
    /// ISTag without quotes.
    pub istag: String,
    /// Capabilities advertised in `Allow`, e.g. `"204"`.
    pub allow: Vec<String>,
    /// `Preview` size in bytes.
    pub preview: usize,
    pub max_connections: usize,
    /// Extensions sent whole without preview; `*` for all.
    pub transfer_complete: Vec<String>,
}

impl ServiceOptions {
    /// Options advertised for `service` under the given configuration.
    pub fn for_service(service: Service, config: &EngineConfig) -> Self {
        Self {
            methods: service.mod_methods(),
            service: config.identity.name.clone(),
            istag: config.identity.istag.clone(),
            allow: vec!["204".to_string()],
            preview: 0,
            max_connections: config.max_connections,
            transfer_complete: vec!["*".to_string()],
        }
    }

    /// Build the `200 OK` response; `Encapsulated: null-body=0` is added on encoding.
    pub fn build_response(&self, config: &EngineConfig) -> Response {
        let methods = self
            .methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");

        let mut response = Response::from_server(StatusCode::Ok200, &config.identity)
            .add_header("methods", &methods)
            .add_header("service", &self.service)
            .add_header("istag", &format!("\"{}\"", self.istag));
        if !self.allow.is_empty() {
            response = response.add_header("allow", &self.allow.join(", "));
        }
        response = response
            .add_header("preview", &self.preview.to_string())
            .add_header("max-connections", &self.max_connections.to_string());
        if !self.transfer_complete.is_empty() {
            response = response.add_header("transfer-complete", &self.transfer_complete.join(", "));
        }
        response
    }
}
