//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the transforming proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The single upstream origin.
    pub upstream: UpstreamConfig,

    /// Response buffering limits.
    pub buffer: BufferConfig,

    /// Cookie rewriting applied to upstream responses.
    pub cookies: CookieConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Inbound request handling.
    pub request: RequestConfig,

    /// Which handler transforms the traffic.
    pub handler: HandlerConfig,

    /// Path filters composed in front of the proxy.
    pub filters: FilterConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Graceful shutdown settings.
    pub shutdown: ShutdownConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream origin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL every request is forwarded to (e.g., "http://127.0.0.1:3000").
    pub url: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: "http://host.docker.internal:3000".to_string(),
        }
    }
}

/// Response buffering configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Largest response body held in memory for a response handler, in MB.
    pub max_size_mb: f64,
}

impl BufferConfig {
    /// The buffer limit in bytes.
    pub fn max_bytes(&self) -> usize {
        (self.max_size_mb * 1024.0 * 1024.0) as usize
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { max_size_mb: 1.0 }
    }
}

/// Cookie rewriting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Remove the `Domain` attribute from upstream `Set-Cookie` headers.
    pub strip_domain: bool,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self { strip_domain: true }
    }
}

/// Timeout configuration. A value of `0` disables the timeout.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for the upstream to produce a response head, and for each
    /// subsequent body read, in seconds.
    pub upstream_secs: f64,

    /// Total lifetime of a client request, in seconds.
    pub client_secs: f64,
}

impl TimeoutConfig {
    pub fn upstream(&self) -> Option<Duration> {
        non_zero_secs(self.upstream_secs)
    }

    pub fn client(&self) -> Option<Duration> {
        non_zero_secs(self.client_secs)
    }
}

fn non_zero_secs(secs: f64) -> Option<Duration> {
    (secs > 0.0).then(|| Duration::from_secs_f64(secs))
}

/// Inbound request handling.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestConfig {
    /// Read JSON, form and text bodies into the request context before the
    /// request handler runs.
    pub parse_body: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self { parse_body: true }
    }
}

/// Handler selection.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HandlerConfig {
    /// Registry name of the handler (`log`, `request-log`, `imgproxy`, `none`).
    pub name: String,

    /// Options of the `log` handler.
    pub log: LogHandlerConfig,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            name: "log".to_string(),
            log: LogHandlerConfig::default(),
        }
    }
}

/// Options of the built-in `log` handler.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogHandlerConfig {
    pub request: bool,
    pub request_body: bool,
    pub response: bool,
    pub response_body: bool,
    /// Append the client IP to log lines.
    pub ip: bool,
}

impl Default for LogHandlerConfig {
    fn default() -> Self {
        Self {
            request: false,
            request_body: false,
            response: true,
            response_body: false,
            ip: true,
        }
    }
}

/// Path filters applied before the proxy pipeline.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct FilterConfig {
    pub hidden_paths: HiddenPathsConfig,
    pub extensions: ExtensionFilterConfig,
}

/// Rejects paths with a segment starting with a dot.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HiddenPathsConfig {
    pub enabled: bool,
    /// 404 pretends the file does not exist, 400 rejects explicitly.
    pub status: u16,
}

impl Default for HiddenPathsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            status: 404,
        }
    }
}

/// Whether the extension list is a deny list or an allow list.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExtensionMode {
    #[default]
    Block,
    Allow,
}

/// Filters requests on the extension of the last path segment.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExtensionFilterConfig {
    pub enabled: bool,
    pub mode: ExtensionMode,
    /// Extensions without the leading dot (e.g., "map", "log").
    pub extensions: Vec<String>,
    pub status: u16,
    pub case_insensitive: bool,
    /// Let paths without an extension through in `allow` mode.
    pub allow_no_extension: bool,
}

impl Default for ExtensionFilterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: ExtensionMode::Block,
            extensions: Vec::new(),
            status: 404,
            case_insensitive: true,
            allow_no_extension: true,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error), overridden by `RUST_LOG`.
    pub log_level: String,

    /// Human readable or JSON log lines.
    pub log_format: LogFormat,

    /// Log every `/health` probe.
    pub log_health_check: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_health_check: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Time in-flight requests get to finish before the process exits anyway.
    pub grace_period_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 10,
        }
    }
}
