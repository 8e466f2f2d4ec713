//! Connection configuration for a session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Port the policy responder listens on unless configured otherwise.
pub const DEFAULT_POLICY_PORT: u16 = 9999;

/// Which side of the connection a session plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Listen and accept many clients.
    Server,
    /// Connect to a single server.
    Client,
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Connection parameters, fixed for the lifetime of one endpoint instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    /// Host to bind (server) or connect to (client).
    pub host: String,
    /// Port to bind (server) or connect to (client). 0 binds an ephemeral port.
    pub port: u16,
    /// Identity a client announces to the server; defaults to the session uuid.
    pub identity: Option<String>,
    /// Maximum simultaneous clients before new ones are rejected.
    pub max_connections: usize,
    /// Port for the policy responder; `None` disables it.
    pub policy_port: Option<u16>,
    /// Upper bound on a client connect attempt.
    pub connect_timeout_ms: u64,
    /// Cadence of the fallback ticker thread.
    pub tick_interval_ms: u64,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7000,
            identity: None,
            max_connections: 32,
            policy_port: Some(DEFAULT_POLICY_PORT),
            connect_timeout_ms: 5000,
            tick_interval_ms: 16,
        }
    }
}

impl SessionParams {
    /// Create params for a host and port with defaults elsewhere.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Parse params from JSON; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns error if the JSON is malformed or the params are invalid.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let params: Self = serde_json::from_str(json)?;
        params.validate()?;
        Ok(params)
    }

    #[must_use]
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    #[must_use]
    pub fn with_policy_port(mut self, policy_port: Option<u16>) -> Self {
        self.policy_port = policy_port;
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Host and port joined for socket APIs.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    #[must_use]
    pub const fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Check the params describe a usable endpoint.
    ///
    /// # Errors
    /// Returns error naming the first invalid field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid("host must not be empty".into()));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be at least 1".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "connect_timeout_ms must be positive".into(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be positive".into(),
            ));
        }
        Ok(())
    }
}
