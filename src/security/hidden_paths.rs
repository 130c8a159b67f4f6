//! Hidden path detection.

/// True when any path segment starts with `.` followed by at least one more
/// character (`/.env`, `/a/.git/config`).
pub fn is_hidden(path: &str) -> bool {
    path.split('/')
        .any(|segment| segment.len() > 1 && segment.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_segments() {
        assert!(is_hidden("/.env"));
        assert!(is_hidden("/app/.git/config"));
        assert!(is_hidden("/.well-known/acme"));
        assert!(!is_hidden("/"));
        assert!(!is_hidden("/a/./b"));
        assert!(!is_hidden("/file.txt"));
        assert!(!is_hidden("/dir/"));
    }
}
