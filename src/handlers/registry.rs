//! Startup registry of built-in handlers.

use thiserror::Error;

use crate::config::HandlerConfig;
use crate::handlers::imgproxy::imgproxy_handlers;
use crate::handlers::log::{log_handlers, request_log_handlers};
use crate::handlers::HandlerSet;

/// Names accepted in `handler.name`.
pub const BUILTIN_HANDLERS: [&str; 4] = ["log", "request-log", "imgproxy", "none"];

#[derive(Debug, Error)]
#[error("unknown handler {0:?}")]
pub struct UnknownHandler(pub String);

/// Accepts `log`, `log.mjs`, `./handlers/log.js` and similar spellings.
fn canonical(name: &str) -> &str {
    let file = name.rsplit('/').next().unwrap_or(name);
    file.strip_suffix(".mjs")
        .or_else(|| file.strip_suffix(".js"))
        .unwrap_or(file)
}

pub fn is_known(name: &str) -> bool {
    BUILTIN_HANDLERS.contains(&canonical(name))
}

/// Resolve the configured handler into its hooks.
pub fn resolve(config: &HandlerConfig) -> Result<HandlerSet, UnknownHandler> {
    let set = match canonical(&config.name) {
        "log" => log_handlers(&config.log),
        "request-log" => request_log_handlers(),
        "imgproxy" => imgproxy_handlers(),
        "none" => HandlerSet::none(),
        _ => return Err(UnknownHandler(config.name.clone())),
    };

    tracing::debug!(
        handler = %set.name,
        on_request = set.on_request.is_some(),
        on_response = set.on_response.is_some(),
        "Handler resolved"
    );
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> HandlerConfig {
        HandlerConfig {
            name: name.to_string(),
            ..HandlerConfig::default()
        }
    }

    #[test]
    fn test_resolves_builtins() {
        let set = resolve(&config("imgproxy")).unwrap();
        assert!(set.on_request.is_some());
        assert!(set.on_response.is_none());

        let set = resolve(&config("none")).unwrap();
        assert!(set.on_request.is_none() && set.on_response.is_none());

        let set = resolve(&config("./handlers/log.mjs")).unwrap();
        assert_eq!(set.name, "log");
    }

    #[test]
    fn test_unknown_name() {
        assert!(resolve(&config("laravel")).is_err());
        assert!(!is_known("laravel"));
        assert!(is_known("request-log.js"));
    }
}
