//! Immutable server identity and engine limits.
//!
//! Values are built once (by the binary or by tests) and shared by every
//! connection through an `Arc`; nothing here is mutated after start-up.

use uuid::Uuid;

/// Default `Server`/`Service` header value.
pub const DEFAULT_SERVER_NAME: &str = "ICAP-Server/1.0";
/// Default cap of consecutive OPTIONS transactions on one connection.
pub const DEFAULT_MAX_OPTIONS: usize = 32;
/// Default value advertised in `Max-Connections`.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;

/// Who this server says it is on the wire.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    /// Used for the ICAP `Server`/`Service` headers and the embedded HTTP `Server`/`Via`.
    pub name: String,
    /// ISTag value without quotes.
    pub istag: String,
    /// Host used in the `info` endpoint listing; the request authority when `None`.
    pub advertised_host: Option<String>,
}

impl ServerIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            istag: random_istag(),
            advertised_host: None,
        }
    }

    pub fn with_istag(mut self, istag: impl Into<String>) -> Self {
        self.istag = istag.into();
        self
    }

    pub fn with_advertised_host(mut self, host: impl Into<String>) -> Self {
        self.advertised_host = Some(host.into());
        self
    }

    /// ISTag header value (quoted, as RFC 3507 requires).
    pub fn istag_header(&self) -> String {
        format!("\"{}\"", self.istag)
    }
}

impl Default for ServerIdentity {
    fn default() -> Self {
        Self::new(DEFAULT_SERVER_NAME)
    }
}

/// 32 upper-case hex characters.
pub fn random_istag() -> String {
    Uuid::new_v4().simple().to_string().to_ascii_uppercase()
}

/// Everything a [`ConnectionSession`](crate::session::ConnectionSession) needs
/// besides its stream and scanner.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub identity: ServerIdentity,
    /// After this many OPTIONS on one connection the server closes it.
    pub max_options_per_connection: usize,
    /// Advertised in OPTIONS as `Max-Connections`.
    pub max_connections: usize,
}

impl EngineConfig {
    pub fn new(identity: ServerIdentity) -> Self {
        Self {
            identity,
            max_options_per_connection: DEFAULT_MAX_OPTIONS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn with_max_options_per_connection(mut self, n: usize) -> Self {
        self.max_options_per_connection = n.max(1);
        self
    }

    pub fn with_max_connections(mut self, n: usize) -> Self {
        self.max_connections = n.max(1);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(ServerIdentity::default())
    }
}
