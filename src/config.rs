//! Global configuration parsing, validation, and credential loading.
//!
//! Every field carries a serde default so an empty file (or no file at all)
//! yields a working stdio server. Command-line flags are applied on top of
//! the parsed file by the binary.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use tracing::warn;

use crate::{AppError, Result};

/// Environment variable consulted for auth tokens when `[auth] tokens` is empty.
pub const AUTH_TOKENS_ENV: &str = "MCP_AUTH_TOKENS";

/// Protocol version advertised when a client omits `protocolVersion`.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// Which transport the server listens on.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Newline-delimited JSON over stdin/stdout.
    #[default]
    Stdio,
    /// One JSON message per WebSocket text frame.
    Websocket,
}

/// Identity reported by `initialize`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ServerConfig {
    /// Server name reported in `serverInfo.name`.
    #[serde(default = "default_server_name")]
    pub name: String,
    /// Server version reported in `serverInfo.version`.
    #[serde(default = "default_server_version")]
    pub version: String,
    /// Protocol version used when the client does not send one.
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

fn default_server_name() -> String {
    env!("CARGO_PKG_NAME").into()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").into()
}

fn default_protocol_version() -> String {
    DEFAULT_PROTOCOL_VERSION.into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            version: default_server_version(),
            protocol_version: default_protocol_version(),
        }
    }
}

/// Transport selection and listener settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TransportConfig {
    /// Transport to serve.
    #[serde(default)]
    pub kind: TransportKind,
    /// WebSocket bind host.
    #[serde(default = "default_host")]
    pub host: String,
    /// WebSocket bind port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// WebSocket upgrade path.
    #[serde(default = "default_path")]
    pub path: String,
    /// Idle interval after which the stdio reader logs a quiet peer.
    #[serde(default = "default_stdio_read_timeout")]
    pub stdio_read_timeout_seconds: u64,
    /// Largest inbound stdio line accepted, in bytes.
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

fn default_host() -> String {
    "localhost".into()
}

fn default_port() -> u16 {
    8080
}

fn default_path() -> String {
    "/mcp".into()
}

fn default_stdio_read_timeout() -> u64 {
    60
}

fn default_max_line_bytes() -> usize {
    1_048_576
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::default(),
            host: default_host(),
            port: default_port(),
            path: default_path(),
            stdio_read_timeout_seconds: default_stdio_read_timeout(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

/// Admission and timeout limits.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConcurrencyConfig {
    /// Maximum number of requests executing at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Default per-request timeout.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Per-method timeout overrides, in milliseconds.
    #[serde(default)]
    pub method_timeouts_ms: HashMap<String, u64>,
}

fn default_max_concurrent() -> usize {
    10
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            request_timeout_seconds: default_request_timeout(),
            method_timeouts_ms: HashMap::new(),
        }
    }
}

/// Token-bucket parameters for one method.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct BucketConfig {
    /// Refill rate in tokens per second.
    pub rate: f64,
    /// Maximum burst size.
    pub capacity: f64,
}

/// Per-method rate limiting.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct RateLimitConfig {
    /// Whether the rate-limit middleware is installed.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Default refill rate in tokens per second.
    #[serde(default = "default_rate")]
    pub rate: f64,
    /// Default bucket capacity.
    #[serde(default = "default_capacity")]
    pub capacity: f64,
    /// Overrides keyed by method name.
    #[serde(default)]
    pub methods: HashMap<String, BucketConfig>,
}

fn default_true() -> bool {
    true
}

fn default_rate() -> f64 {
    100.0
}

fn default_capacity() -> f64 {
    200.0
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rate: default_rate(),
            capacity: default_capacity(),
            methods: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Bucket parameters for `method`, falling back to the defaults.
    #[must_use]
    pub fn bucket_for(&self, method: &str) -> BucketConfig {
        self.methods.get(method).copied().unwrap_or(BucketConfig {
            rate: self.rate,
            capacity: self.capacity,
        })
    }
}

/// Bounded admission queue used instead of immediate rejection.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BackpressureConfig {
    /// Queue admissions instead of rejecting them at capacity.
    #[serde(default)]
    pub enabled: bool,
    /// Maximum number of waiting requests.
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    /// How long an enqueue may wait for a free queue slot.
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
}

fn default_max_queue_size() -> usize {
    100
}

fn default_queue_timeout_ms() -> u64 {
    5_000
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_queue_size: default_max_queue_size(),
            queue_timeout_ms: default_queue_timeout_ms(),
        }
    }
}

/// Shared-token authentication.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AuthConfig {
    /// Whether the auth middleware is installed.
    #[serde(default)]
    pub enabled: bool,
    /// Allowed tokens. Loaded from [`AUTH_TOKENS_ENV`] when empty.
    #[serde(default)]
    pub tokens: Vec<String>,
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Identity reported to clients.
    #[serde(default)]
    pub server: ServerConfig,
    /// Transport selection.
    #[serde(default)]
    pub transport: TransportConfig,
    /// Admission and timeouts.
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Per-method rate limiting.
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    /// Optional bounded queue.
    #[serde(default)]
    pub backpressure: BackpressureConfig,
    /// Optional token auth.
    #[serde(default)]
    pub auth: AuthConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Fill `[auth] tokens` from [`AUTH_TOKENS_ENV`] when the file left it empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if auth is enabled and no token is
    /// available from either source.
    pub fn load_credentials(&mut self) -> Result<()> {
        if self.auth.tokens.is_empty() {
            match env::var(AUTH_TOKENS_ENV) {
                Ok(raw) => {
                    self.auth.tokens = raw
                        .split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_owned)
                        .collect();
                }
                Err(_) if self.auth.enabled => {
                    warn!(env = AUTH_TOKENS_ENV, "auth enabled but env var not set");
                }
                Err(_) => {}
            }
        }

        if self.auth.enabled && self.auth.tokens.is_empty() {
            return Err(AppError::Config(format!(
                "auth is enabled but no tokens configured in [auth] or {AUTH_TOKENS_ENV}"
            )));
        }
        Ok(())
    }

    /// Default request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.concurrency.request_timeout_seconds)
    }

    /// Per-method timeout overrides.
    #[must_use]
    pub fn method_timeouts(&self) -> HashMap<String, Duration> {
        self.concurrency
            .method_timeouts_ms
            .iter()
            .map(|(method, ms)| (method.clone(), Duration::from_millis(*ms)))
            .collect()
    }

    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.max_concurrent == 0 {
            return Err(AppError::Config(
                "max_concurrent must be greater than zero".into(),
            ));
        }
        if self.concurrency.request_timeout_seconds == 0 {
            return Err(AppError::Config(
                "request_timeout_seconds must be greater than zero".into(),
            ));
        }
        if !self.transport.path.starts_with('/') {
            return Err(AppError::Config(format!(
                "transport path must start with '/': {}",
                self.transport.path
            )));
        }
        if self.transport.stdio_read_timeout_seconds == 0 {
            return Err(AppError::Config(
                "stdio_read_timeout_seconds must be greater than zero".into(),
            ));
        }
        if self.transport.max_line_bytes == 0 {
            return Err(AppError::Config(
                "max_line_bytes must be greater than zero".into(),
            ));
        }

        let buckets = std::iter::once((
            "default",
            BucketConfig {
                rate: self.rate_limit.rate,
                capacity: self.rate_limit.capacity,
            },
        ))
        .chain(
            self.rate_limit
                .methods
                .iter()
                .map(|(method, bucket)| (method.as_str(), *bucket)),
        );
        for (method, bucket) in buckets {
            if !(bucket.rate > 0.0 && bucket.capacity >= 1.0) {
                return Err(AppError::Config(format!(
                    "rate limit for {method} needs rate > 0 and capacity >= 1"
                )));
            }
        }

        if self.backpressure.enabled && self.backpressure.max_queue_size == 0 {
            return Err(AppError::Config(
                "max_queue_size must be greater than zero when backpressure is enabled".into(),
            ));
        }

        Ok(())
    }
}
