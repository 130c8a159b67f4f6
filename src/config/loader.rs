//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value {value:?} for environment variable {key}")]
    Env { key: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the startup configuration: optional TOML file, then environment
/// overrides, then validation.
pub fn load(path: Option<&Path>) -> Result<ProxyConfig, ConfigError> {
    let mut config = match path {
        Some(path) => toml::from_str(&fs::read_to_string(path)?)?,
        None => ProxyConfig::default(),
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// A raw environment value after the conventional rewrites.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvValue {
    /// `null` / `(null)`: behave as if the variable was not set.
    Unset,
    Bool(bool),
    Text(String),
}

impl EnvValue {
    /// Interpret a raw environment string.
    ///
    /// `true`, `false`, `null` and `empty` are recognised with or without
    /// surrounding parentheses and in any case; wrapping quotes are removed.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "(true)" => return EnvValue::Bool(true),
            "false" | "(false)" => return EnvValue::Bool(false),
            "null" | "(null)" => return EnvValue::Unset,
            "empty" | "(empty)" => return EnvValue::Text(String::new()),
            _ => {}
        }

        let unquoted = [('"', '"'), ('\'', '\'')]
            .iter()
            .find_map(|&(open, close)| {
                (raw.len() >= 2 && raw.starts_with(open) && raw.ends_with(close))
                    .then(|| &raw[1..raw.len() - 1])
            })
            .unwrap_or(raw);

        EnvValue::Text(unquoted.to_string())
    }
}

/// Apply the supported environment variables on top of `config`.
///
/// `lookup` abstracts `std::env::var` so the mapping can be exercised
/// without touching the process environment.
pub fn apply_env_overrides<F>(config: &mut ProxyConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = |key: &'static str| lookup(key).map(|raw| (key, EnvValue::parse(&raw)));

    if let Some(port) = number::<u16>(env("PORT"))? {
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.listener.bind_address = format!("{host}:{port}");
    }
    if let Some(url) = text(env("UPSTREAM")) {
        config.upstream.url = url;
    }
    if let Some(mb) = number::<f64>(env("BUFFER_SIZE_MB"))? {
        config.buffer.max_size_mb = mb;
    }
    if let Some(secs) = number::<f64>(env("PROXY_TIMEOUT"))? {
        config.timeouts.upstream_secs = secs;
    }
    if let Some(secs) = number::<f64>(env("TIMEOUT"))? {
        config.timeouts.client_secs = secs;
    }
    if let Some(flag) = boolean(env("STRIP_COOKIE_DOMAIN"))? {
        config.cookies.strip_domain = flag;
    }
    if let Some(flag) = boolean(env("PARSE_REQUEST_BODY"))? {
        config.request.parse_body = flag;
    }
    if let Some(name) = text(env("HANDLER")).or_else(|| text(env("HANDLER_FILE"))) {
        config.handler.name = name;
    }
    if let Some(flag) = boolean(env("LOG_REQUEST"))? {
        config.handler.log.request = flag;
    }
    if let Some(flag) = boolean(env("LOG_REQUEST_BODY"))? {
        config.handler.log.request_body = flag;
    }
    if let Some(flag) = boolean(env("LOG_RESPONSE"))? {
        config.handler.log.response = flag;
    }
    if let Some(flag) = boolean(env("LOG_RESPONSE_BODY"))? {
        config.handler.log.response_body = flag;
    }
    if let Some(flag) = boolean(env("LOG_IP"))? {
        config.handler.log.ip = flag;
    }
    if let Some(flag) = boolean(env("LOG_HEALTH_CHECK"))? {
        config.observability.log_health_check = flag;
    }
    if let Some(secs) = number::<u64>(env("GRACEFUL_SHUTDOWN_TIMEOUT"))? {
        config.shutdown.grace_period_secs = secs;
    }

    Ok(())
}

type Entry = Option<(&'static str, EnvValue)>;

fn text(entry: Entry) -> Option<String> {
    match entry {
        Some((_, EnvValue::Text(value))) => Some(value),
        Some((_, EnvValue::Bool(value))) => Some(value.to_string()),
        Some((_, EnvValue::Unset)) | None => None,
    }
}

fn number<T: std::str::FromStr>(entry: Entry) -> Result<Option<T>, ConfigError> {
    match entry {
        Some((key, EnvValue::Text(value))) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env { key, value }),
        Some((key, EnvValue::Bool(value))) => Err(ConfigError::Env {
            key,
            value: value.to_string(),
        }),
        Some((_, EnvValue::Unset)) | None => Ok(None),
    }
}

fn boolean(entry: Entry) -> Result<Option<bool>, ConfigError> {
    match entry {
        Some((_, EnvValue::Bool(value))) => Ok(Some(value)),
        // Numeric values follow truthiness: "0" is false, anything else true.
        Some((key, EnvValue::Text(value))) => match value.trim().parse::<f64>() {
            Ok(n) => Ok(Some(n != 0.0)),
            Err(_) => Err(ConfigError::Env { key, value }),
        },
        Some((_, EnvValue::Unset)) | None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_value_conventions() {
        assert_eq!(EnvValue::parse("TRUE"), EnvValue::Bool(true));
        assert_eq!(EnvValue::parse("(false)"), EnvValue::Bool(false));
        assert_eq!(EnvValue::parse("(null)"), EnvValue::Unset);
        assert_eq!(EnvValue::parse("empty"), EnvValue::Text(String::new()));
        assert_eq!(
            EnvValue::parse("'http://upstream:80'"),
            EnvValue::Text("http://upstream:80".into())
        );
        assert_eq!(EnvValue::parse("\"x"), EnvValue::Text("\"x".into()));
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = ProxyConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                ("PORT", "9000"),
                ("UPSTREAM", "http://origin:3000"),
                ("BUFFER_SIZE_MB", "2.5"),
                ("PROXY_TIMEOUT", "30"),
                ("STRIP_COOKIE_DOMAIN", "false"),
                ("HANDLER", "imgproxy"),
                ("LOG_REQUEST", "1"),
            ]),
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:9000");
        assert_eq!(config.upstream.url, "http://origin:3000");
        assert_eq!(config.buffer.max_bytes(), 2_621_440);
        assert_eq!(config.timeouts.upstream_secs, 30.0);
        assert_eq!(config.timeouts.client(), None);
        assert!(!config.cookies.strip_domain);
        assert_eq!(config.handler.name, "imgproxy");
        assert!(config.handler.log.request);
    }

    #[test]
    fn test_handler_file_alias() {
        let mut config = ProxyConfig::default();
        apply_env_overrides(&mut config, lookup(&[("HANDLER_FILE", "./handlers/imgproxy.mjs")])).unwrap();
        assert_eq!(config.handler.name, "./handlers/imgproxy.mjs");

        apply_env_overrides(
            &mut config,
            lookup(&[("HANDLER", "log"), ("HANDLER_FILE", "./handlers/imgproxy.mjs")]),
        )
        .unwrap();
        assert_eq!(config.handler.name, "log");
    }

    #[test]
    fn test_null_keeps_default() {
        let mut config = ProxyConfig::default();
        apply_env_overrides(&mut config, lookup(&[("BUFFER_SIZE_MB", "null")])).unwrap();
        assert_eq!(config.buffer.max_bytes(), 1024 * 1024);
    }

    #[test]
    fn test_invalid_number_rejected() {
        let mut config = ProxyConfig::default();
        let err = apply_env_overrides(&mut config, lookup(&[("TIMEOUT", "soon")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "TIMEOUT", .. }));
    }

    #[test]
    fn test_toml_sections() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            url = "http://127.0.0.1:4000"

            [buffer]
            max_size_mb = 4

            [filters.extensions]
            enabled = true
            mode = "allow"
            extensions = ["jpg", "png"]
            "#,
        )
        .unwrap();

        assert_eq!(config.upstream.url, "http://127.0.0.1:4000");
        assert_eq!(config.buffer.max_bytes(), 4 * 1024 * 1024);
        assert!(config.filters.extensions.enabled);
        assert_eq!(
            config.filters.extensions.mode,
            crate::config::schema::ExtensionMode::Allow
        );
        assert!(config.cookies.strip_domain);
    }
}
