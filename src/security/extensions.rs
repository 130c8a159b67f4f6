//! File extension filtering.

use crate::config::{ExtensionFilterConfig, ExtensionMode};

/// Extension of the last non-empty path segment, without the dot.
///
/// Dotfiles (`.env`) and names ending in a dot have none.
pub fn extension_of(path: &str) -> Option<&str> {
    let segment = path.split('/').rev().find(|s| !s.is_empty())?;
    match segment.rfind('.') {
        Some(0) | None => None,
        Some(i) if i + 1 == segment.len() => None,
        Some(i) => Some(&segment[i + 1..]),
    }
}

/// Compiled extension rule.
#[derive(Debug, Clone)]
pub struct ExtensionFilter {
    mode: ExtensionMode,
    extensions: Vec<String>,
    case_insensitive: bool,
    allow_no_extension: bool,
}

impl ExtensionFilter {
    pub fn new(config: &ExtensionFilterConfig) -> Self {
        let case_insensitive = config.case_insensitive;
        let extensions = config
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.'))
            .map(|e| {
                if case_insensitive {
                    e.to_ascii_lowercase()
                } else {
                    e.to_string()
                }
            })
            .collect();
        Self {
            mode: config.mode,
            extensions,
            case_insensitive,
            allow_no_extension: config.allow_no_extension,
        }
    }

    /// Whether a request for `path` is let through.
    pub fn permits(&self, path: &str) -> bool {
        let Some(ext) = extension_of(path) else {
            return self.mode == ExtensionMode::Block || self.allow_no_extension;
        };
        let listed = self.extensions.iter().any(|e| {
            if self.case_insensitive {
                e.eq_ignore_ascii_case(ext)
            } else {
                e == ext
            }
        });
        match self.mode {
            ExtensionMode::Block => !listed,
            ExtensionMode::Allow => listed,
        }
    }
}
