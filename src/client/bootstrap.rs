//! Client configuration and environment bootstrap.
//!
//! Handles the settings needed before the first connect:
//! - Endpoint selection (`LDT_URL`, or `LDT_HOST` plus `LDT_PORT`)
//! - Cooldown and connect timeout
//! - TLS mode, server name override and extra trust anchors

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::core::{
    ConnectionError, DEFAULT_CONNECT_TIMEOUT, DEFAULT_COOLDOWN, DEFAULT_MAX_BUFFERED_BYTES,
    DEFAULT_READ_CHUNK_SIZE, Endpoint, TlsOptions,
};
use crate::transport::{SupervisorConfig, TlsMode, TransportConfig};

/// Environment variables read by [`ClientConfig::from_env`].
pub mod env {
    /// Full endpoint URL, e.g. `ldt://live.example.com:7000`. Wins over host/port.
    pub const URL: &str = "LDT_URL";
    /// Endpoint host.
    pub const HOST: &str = "LDT_HOST";
    /// Endpoint port.
    pub const PORT: &str = "LDT_PORT";
    /// Cooldown between automatic attempts, in seconds.
    pub const COOLDOWN_SECS: &str = "LDT_COOLDOWN_SECS";
    /// Connect timeout, in seconds.
    pub const CONNECT_TIMEOUT_SECS: &str = "LDT_CONNECT_TIMEOUT_SECS";
    /// `on` or `off`.
    pub const TLS: &str = "LDT_TLS";
    /// TLS server name override.
    pub const TLS_SERVER_NAME: &str = "LDT_TLS_SERVER_NAME";
    /// PEM bundle with extra trust anchors.
    pub const TLS_CA_FILE: &str = "LDT_TLS_CA_FILE";
}

/// Errors while assembling a [`ClientConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable that another one depends on is missing.
    #[error("{0} is required")]
    Missing(&'static str),

    /// A variable holds an unusable value.
    #[error("invalid {var}={value:?}: {reason}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
        /// What is wrong with it.
        reason: String,
    },

    /// The endpoint could not be built.
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] ConnectionError),
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Endpoint to connect to on `start`; `None` until one is set.
    pub endpoint: Option<Endpoint>,

    /// Minimum spacing between automatic connection attempts.
    pub cooldown: Duration,

    /// Connection timeout.
    pub connect_timeout: Duration,

    /// Whether connections are upgraded to TLS.
    pub tls: TlsMode,

    /// Server name override and extra roots for the TLS upgrade.
    pub tls_options: TlsOptions,

    /// Inbound buffering limit while waiting for a frame boundary.
    pub max_buffered_bytes: usize,

    /// Size of a single socket read.
    pub read_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            cooldown: DEFAULT_COOLDOWN,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            tls: TlsMode::Enabled,
            tls_options: TlsOptions::default(),
            max_buffered_bytes: DEFAULT_MAX_BUFFERED_BYTES,
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    /// Load the configuration from `LDT_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load the configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |var: &str| lookup(var).filter(|value| !value.trim().is_empty());

        let port = get(env::PORT).map(|value| parse_port(&value)).transpose()?;
        config.endpoint = match (get(env::URL), get(env::HOST)) {
            (Some(url), _) => Some(Endpoint::from_url(&url, port)?),
            (None, Some(host)) => {
                let port = port.ok_or(ConfigError::Missing(env::PORT))?;
                Some(Endpoint::new(host, port)?)
            }
            (None, None) => None,
        };

        if let Some(value) = get(env::COOLDOWN_SECS) {
            config.cooldown = parse_secs(env::COOLDOWN_SECS, &value)?;
        }
        if let Some(value) = get(env::CONNECT_TIMEOUT_SECS) {
            config.connect_timeout = parse_secs(env::CONNECT_TIMEOUT_SECS, &value)?;
        }
        if let Some(value) = get(env::TLS) {
            config.tls = parse_tls(&value)?;
        }
        config.tls_options.server_name = get(env::TLS_SERVER_NAME);
        config.tls_options.ca_file = get(env::TLS_CA_FILE).map(PathBuf::from);

        Ok(config)
    }

    /// Reject settings the client cannot run with.
    ///
    /// A zero cooldown would let a flapping server be retried in a tight
    /// loop, and a zero connect timeout fails every attempt.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("cooldown", self.cooldown),
            ("connect_timeout", self.connect_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(field, &format!("{value:?}"), NOT_ZERO.into()));
            }
        }
        if self.read_chunk_size == 0 {
            return Err(invalid("read_chunk_size", "0", NOT_ZERO.into()));
        }
        Ok(())
    }

    /// Sans-IO subset handed to the supervisor.
    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            cooldown: self.cooldown,
            tls: self.tls_options.clone(),
            max_buffered_bytes: self.max_buffered_bytes,
        }
    }

    /// Socket settings handed to the transport.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls,
            connect_timeout: self.connect_timeout,
            read_chunk_size: self.read_chunk_size,
        }
    }
}

const NOT_ZERO: &str = "must be greater than zero";

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value
        .trim()
        .parse::<u16>()
        .map_err(|e| invalid(env::PORT, value, e.to_string()))
}

fn parse_secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    let secs = value
        .trim()
        .parse::<f64>()
        .map_err(|e| invalid(var, value, e.to_string()))?;
    let duration =
        Duration::try_from_secs_f64(secs).map_err(|e| invalid(var, value, e.to_string()))?;
    if duration.is_zero() {
        return Err(invalid(var, value, NOT_ZERO.into()));
    }
    Ok(duration)
}

fn parse_tls(value: &str) -> Result<TlsMode, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(TlsMode::Enabled),
        "off" | "false" | "0" => Ok(TlsMode::Disabled),
        _ => Err(invalid(env::TLS, value, "expected on or off".into())),
    }
}

fn invalid(var: &'static str, value: &str, reason: String) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_owned(),
        reason,
    }
}
