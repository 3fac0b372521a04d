//! Configuration loading from TOML files and environment variables.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ServerError;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub demo: DemoConfig,
    pub metrics: MetricsConfig,
    pub logging: LoggingConfig,
}

/// Demo HTTP host configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP address to listen on.
    pub listen_addr: String,

    /// Request path serving the event stream.
    pub path: String,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Time allowed for a client to send its request head (seconds).
    pub request_timeout_secs: u64,

    /// Read buffer for request heads; longer heads are rejected. Raised to 8192 if
    /// smaller.
    pub max_request_bytes: usize,

    /// Graceful shutdown timeout (seconds).
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:8080".to_string(),
            path: "/".to_string(),
            max_connections: 1024,
            request_timeout_secs: 5,
            max_request_bytes: 8192,
            shutdown_timeout_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Per-stream engine settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Timeout for individual writes to the client (seconds).
    pub write_timeout_secs: u64,

    /// Keep-alive comment interval while the producer is idle (seconds, 0 = off).
    pub heartbeat_interval_secs: u64,

    /// Echo buffered engine log lines to the client as comments.
    pub log_echo: bool,

    /// Number of log lines kept for the echo.
    pub log_echo_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            write_timeout_secs: 30,
            heartbeat_interval_secs: 0,
            log_echo: false,
            log_echo_buffer: 10,
        }
    }
}

impl StreamConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs > 0).then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

/// What every client is sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemoProducer {
    /// A welcome comment, then the fixture entries.
    #[default]
    Fixture,
    /// Numbered `tick` events.
    Ticker,
}

impl FromStr for DemoProducer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixture" => Ok(DemoProducer::Fixture),
            "ticker" => Ok(DemoProducer::Ticker),
            other => Err(format!("unknown demo producer: {}", other)),
        }
    }
}

/// Demo producer settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    pub producer: DemoProducer,

    /// JSON fixture replayed after the welcome message; the bundled one if unset.
    pub fixture_path: Option<PathBuf>,

    /// Pause between entries (seconds); `?wait=` overrides it per request.
    pub wait_secs: u64,

    /// Ticks sent before the ticker ends; unlimited if unset.
    pub tick_limit: Option<u64>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            producer: DemoProducer::Fixture,
            fixture_path: None,
            wait_secs: 1,
            tick_limit: None,
        }
    }
}

impl DemoConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

/// Metrics/Prometheus configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug").
    pub level: String,

    /// Output format: "pretty" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ServerError::Config(format!(
                "Failed to read config file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        toml::from_str(&content)
            .map_err(|e| ServerError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load configuration from file (or defaults), then apply environment overrides.
    pub fn load<P: AsRef<Path>>(path: Option<P>) -> Result<Self, ServerError> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());

        Ok(config)
    }

    /// Apply `SSE_*` overrides read through `var`. Unparseable numbers are ignored.
    pub fn apply_env_overrides<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(value: Option<String>) -> Option<T> {
            value.and_then(|v| v.trim().parse().ok())
        }
        fn flag(value: Option<String>) -> Option<bool> {
            value.map(|v| v == "true" || v == "1")
        }

        // Server
        if let Some(v) = var("SSE_LISTEN_ADDR") {
            self.server.listen_addr = v;
        }
        if let Some(v) = var("SSE_PATH") {
            self.server.path = v;
        }
        if let Some(n) = parsed(var("SSE_MAX_CONNECTIONS")) {
            self.server.max_connections = n;
        }
        if let Some(n) = parsed(var("SSE_REQUEST_TIMEOUT")) {
            self.server.request_timeout_secs = n;
        }

        // Stream
        if let Some(n) = parsed(var("SSE_WRITE_TIMEOUT")) {
            self.stream.write_timeout_secs = n;
        }
        if let Some(n) = parsed(var("SSE_HEARTBEAT_INTERVAL")) {
            self.stream.heartbeat_interval_secs = n;
        }
        if let Some(b) = flag(var("SSE_LOG_ECHO")) {
            self.stream.log_echo = b;
        }

        // Demo
        if let Some(p) = parsed(var("SSE_DEMO_PRODUCER")) {
            self.demo.producer = p;
        }
        if let Some(v) = var("SSE_FIXTURE") {
            self.demo.fixture_path = Some(PathBuf::from(v));
        }
        if let Some(n) = parsed(var("SSE_WAIT_SECS")) {
            self.demo.wait_secs = n;
        }
        if let Some(n) = parsed(var("SSE_TICK_LIMIT")) {
            self.demo.tick_limit = Some(n);
        }

        // Metrics
        if let Some(b) = flag(var("SSE_METRICS_ENABLED")) {
            self.metrics.enabled = b;
        }
        if let Some(v) = var("SSE_METRICS_ADDR") {
            self.metrics.listen_addr = v;
        }

        // Logging
        if let Some(v) = var("SSE_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = var("SSE_LOG_FORMAT") {
            self.logging.format = v;
        }
    }
}
