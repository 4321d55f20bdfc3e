//! Transport and projection settings.
//!
//! Settings can be built in code with the `with_*` setters or read from the
//! environment. Environment variables follow `{PREFIX}_{SETTING}`, with the
//! default prefix `CHOREO`:
//!
//! ```bash
//! export CHOREO_QUEUE_CAPACITY=8
//! export CHOREO_RECEIVE_TIMEOUT_MS=5000
//! export CHOREO_LISTEN_ADDR=127.0.0.1:8080
//! export CHOREO_RENDEZVOUS_URL=http://127.0.0.1:8080
//! export CHOREO_REQUEST_TIMEOUT_MS=2000
//! ```

use std::env::VarError;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Default prefix for environment variables.
pub const DEFAULT_ENV_PREFIX: &str = "CHOREO";

/// Default number of messages buffered per queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Reads `{PREFIX}_{NAME}` variables.
#[derive(Debug, Clone)]
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    /// Create a source with a custom prefix.
    ///
    /// The prefix must be non-empty ASCII alphanumerics or underscores.
    pub fn new(prefix: impl Into<String>) -> Result<Self, ConfigError> {
        let prefix = prefix.into();
        if prefix.is_empty() {
            return Err(ConfigError::EmptyPrefix);
        }
        if !prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidPrefixChars);
        }
        Ok(Self { prefix })
    }

    #[must_use]
    pub fn with_default_prefix() -> Self {
        Self {
            prefix: DEFAULT_ENV_PREFIX.to_string(),
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Environment variable name for a setting.
    #[must_use]
    pub fn var_name(&self, setting: &str) -> String {
        format!("{}_{}", self.prefix, setting.to_uppercase().replace('-', "_"))
    }

    fn parse<T>(&self, setting: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let var = self.var_name(setting);
        match std::env::var(&var) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    var,
                    details: e.to_string(),
                }),
            Err(VarError::NotPresent) => Ok(None),
            Err(VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
                var,
                details: "value is not valid unicode".to_string(),
            }),
        }
    }

    fn millis(&self, setting: &str) -> Result<Option<Duration>, ConfigError> {
        Ok(self.parse::<u64>(setting)?.map(Duration::from_millis))
    }
}

/// Settings shared by every backend and by projectors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    queue_capacity: usize,
    receive_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            receive_timeout: None,
        }
    }
}

impl TransportConfig {
    /// Messages buffered per queue before `send` waits.
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Upper bound on a single `receive`; `None` waits forever.
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        self.queue_capacity = capacity;
        Ok(self)
    }

    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = Some(timeout);
        self
    }

    /// Read settings from `CHOREO_*` variables, keeping defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&EnvSource::with_default_prefix())
    }

    pub fn from_source(source: &EnvSource) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(capacity) = source.parse::<usize>("QUEUE_CAPACITY")? {
            config = config.with_queue_capacity(capacity)?;
        }
        if let Some(timeout) = source.millis("RECEIVE_TIMEOUT_MS")? {
            config = config.with_receive_timeout(timeout);
        }
        Ok(config)
    }
}

/// Settings for the HTTP rendezvous backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    listen_addr: SocketAddr,
    rendezvous_url: Option<String>,
    request_timeout: Duration,
    transport: TransportConfig,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            rendezvous_url: None,
            request_timeout: Duration::from_secs(10),
            transport: TransportConfig::default(),
        }
    }
}

impl HttpTransportConfig {
    /// Address the rendezvous server binds to. Port 0 picks a free port.
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Self::default()
        }
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Base URL envelopes are posted to, when it differs from the listener.
    ///
    /// Receives are served from the queues of the process that called
    /// [`HttpTransport::bind`](crate::HttpTransport::bind), so this URL has to
    /// reach that same listener (for example through a proxy or a public
    /// address). Pointing it at another rendezvous leaves receives waiting.
    pub fn rendezvous_url(&self) -> Option<&str> {
        self.rendezvous_url.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn transport(&self) -> &TransportConfig {
        &self.transport
    }

    #[must_use]
    pub fn with_rendezvous_url(mut self, url: impl Into<String>) -> Self {
        self.rendezvous_url = Some(url.into().trim_end_matches('/').to_string());
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Read settings from `CHOREO_*` variables, keeping defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_source(&EnvSource::with_default_prefix())
    }

    pub fn from_source(source: &EnvSource) -> Result<Self, ConfigError> {
        let mut config = Self::default().with_transport(TransportConfig::from_source(source)?);
        if let Some(addr) = source.parse::<SocketAddr>("LISTEN_ADDR")? {
            config.listen_addr = addr;
        }
        if let Some(url) = source.parse::<String>("RENDEZVOUS_URL")? {
            config = config.with_rendezvous_url(url);
        }
        if let Some(timeout) = source.millis("REQUEST_TIMEOUT_MS")? {
            config = config.with_request_timeout(timeout);
        }
        Ok(config)
    }
}
