//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (buffer size > 0, timeouts >= 0, 4xx filter codes)
//! - Check the upstream URL and the handler name can be resolved
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::handlers::registry;
use crate::proxy::upstream::UpstreamTarget;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ValidationError {
    #[error("listener.bind_address {0:?} is not a socket address")]
    BindAddress(String),

    #[error("upstream.url: {0}")]
    Upstream(String),

    #[error("buffer.max_size_mb must be a positive number, got {0}")]
    BufferSize(f64),

    #[error("timeouts.{0} must be zero or a positive number, got {1}")]
    Timeout(&'static str, f64),

    #[error("unknown handler {name:?} (available: {available})")]
    UnknownHandler { name: String, available: String },

    #[error("{0} status {1} is not a 4xx code")]
    FilterStatus(&'static str, u16),

    #[error("observability.metrics_address {0:?} is not a socket address")]
    MetricsAddress(String),
}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    if let Err(e) = UpstreamTarget::parse(&config.upstream.url) {
        errors.push(ValidationError::Upstream(e.to_string()));
    }

    let mb = config.buffer.max_size_mb;
    if !mb.is_finite() || mb <= 0.0 || config.buffer.max_bytes() == 0 {
        errors.push(ValidationError::BufferSize(mb));
    }

    for (name, secs) in [
        ("upstream_secs", config.timeouts.upstream_secs),
        ("client_secs", config.timeouts.client_secs),
    ] {
        if !secs.is_finite() || secs < 0.0 {
            errors.push(ValidationError::Timeout(name, secs));
        }
    }

    if !registry::is_known(&config.handler.name) {
        errors.push(ValidationError::UnknownHandler {
            name: config.handler.name.clone(),
            available: registry::BUILTIN_HANDLERS.join(", "),
        });
    }

    let filters = &config.filters;
    if filters.hidden_paths.enabled && !is_client_error(filters.hidden_paths.status) {
        errors.push(ValidationError::FilterStatus(
            "filters.hidden_paths",
            filters.hidden_paths.status,
        ));
    }
    if filters.extensions.enabled && !is_client_error(filters.extensions.status) {
        errors.push(ValidationError::FilterStatus(
            "filters.extensions",
            filters.extensions.status,
        ));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_client_error(status: u16) -> bool {
    (400..500).contains(&status)
}
