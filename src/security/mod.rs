//! Path filtering in front of the proxy.
//!
//! # Data Flow
//! ```text
//! Incoming request (not /health):
//!     → hidden_paths.rs (dot segments such as /.env, /.git)
//!     → extensions.rs (block or allow lists)
//!     → proxy core
//! ```
//!
//! # Design Decisions
//! - Fail closed: a rejected request never reaches the upstream
//! - Rejections carry only the configured status and its reason phrase

pub mod extensions;
pub mod hidden_paths;

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::FilterConfig;
use extensions::ExtensionFilter;
use hidden_paths::is_hidden;

/// Filters compiled from the configuration.
#[derive(Debug, Clone)]
pub struct PathFilters {
    hidden: Option<StatusCode>,
    extensions: Option<(ExtensionFilter, StatusCode)>,
}

impl PathFilters {
    pub fn new(config: &FilterConfig) -> Self {
        let status = |code: u16| StatusCode::from_u16(code).unwrap_or(StatusCode::NOT_FOUND);

        let hidden = config
            .hidden_paths
            .enabled
            .then(|| status(config.hidden_paths.status));
        let extensions = config.extensions.enabled.then(|| {
            (
                ExtensionFilter::new(&config.extensions),
                status(config.extensions.status),
            )
        });
        Self { hidden, extensions }
    }

    /// The rejection status for `path`, if any filter rejects it.
    pub fn check(&self, path: &str) -> Option<StatusCode> {
        if let Some(status) = self.hidden {
            if is_hidden(path) {
                tracing::debug!(path, "Rejected hidden path");
                return Some(status);
            }
        }
        if let Some((filter, status)) = &self.extensions {
            if !filter.permits(path) {
                tracing::debug!(path, "Rejected by extension filter");
                return Some(*status);
            }
        }
        None
    }

    pub fn is_active(&self) -> bool {
        self.hidden.is_some() || self.extensions.is_some()
    }
}

pub async fn path_filter_middleware(
    State(filters): State<Arc<PathFilters>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    match filters.check(req.uri().path()) {
        Some(status) => {
            let reason = status.canonical_reason().unwrap_or("Rejected");
            (status, reason).into_response()
        }
        None => next.run(req).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExtensionFilterConfig, HiddenPathsConfig};

    #[test]
    fn test_disabled_by_default() {
        let filters = PathFilters::new(&FilterConfig::default());
        assert!(!filters.is_active());
        assert_eq!(filters.check("/.env"), None);
    }

    #[test]
    fn test_hidden_before_extensions() {
        let filters = PathFilters::new(&FilterConfig {
            hidden_paths: HiddenPathsConfig {
                enabled: true,
                status: 400,
            },
            extensions: ExtensionFilterConfig {
                enabled: true,
                extensions: vec!["env".to_string(), "map".to_string()],
                ..ExtensionFilterConfig::default()
            },
        });
        assert_eq!(filters.check("/.git/config"), Some(StatusCode::BAD_REQUEST));
        assert_eq!(filters.check("/app.js.map"), Some(StatusCode::NOT_FOUND));
        assert_eq!(filters.check("/app.js"), None);
    }
}
