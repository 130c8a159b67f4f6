//! Upstream response head normalization.
//!
//! Maps the status and headers received from the upstream into the head sent
//! to the client. Pure: the same input always yields the same output, and
//! normalizing an already normalized head changes nothing.

use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH, SET_COOKIE, TRANSFER_ENCODING};
use axum::http::{HeaderMap, HeaderValue, StatusCode};

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

/// Framing headers that no longer describe a body replayed from memory.
const BUFFERED_FRAMING: [axum::http::HeaderName; 3] =
    [CONTENT_ENCODING, TRANSFER_ENCODING, CONTENT_LENGTH];

/// Produce the client-facing head for an upstream response.
///
/// Every header is copied, repeated ones included. A `buffered` body drops
/// its original framing so the server recomputes it, and `strip_cookie_domain`
/// removes `Domain` attributes from each `Set-Cookie` line.
pub fn normalize(upstream: &ResponseHead, buffered: bool, strip_cookie_domain: bool) -> ResponseHead {
    let mut headers = HeaderMap::with_capacity(upstream.headers.len());

    for (name, value) in upstream.headers.iter() {
        if buffered && BUFFERED_FRAMING.contains(name) {
            continue;
        }
        let value = if strip_cookie_domain && name == SET_COOKIE {
            strip_domain_header(value)
        } else {
            value.clone()
        };
        headers.append(name.clone(), value);
    }

    ResponseHead {
        status: upstream.status,
        headers,
    }
}

fn strip_domain_header(value: &HeaderValue) -> HeaderValue {
    let Ok(text) = value.to_str() else {
        return value.clone();
    };
    let stripped = strip_cookie_domain(text);
    if stripped.len() == text.len() {
        return value.clone();
    }
    HeaderValue::from_str(&stripped).unwrap_or_else(|_| value.clone())
}

/// Remove every `Domain=...` attribute from one `Set-Cookie` line.
///
/// Attributes are split on `;` outside double quotes. Kept attributes retain
/// their order and original spacing; a leading `Domain` attribute takes its
/// separator with it.
pub fn strip_cookie_domain(cookie: &str) -> String {
    let segments = split_attributes(cookie);
    let kept: Vec<&str> = segments
        .iter()
        .copied()
        .filter(|segment| !is_domain_attribute(segment))
        .collect();

    if kept.len() == segments.len() {
        return cookie.to_string();
    }

    let mut out = String::with_capacity(cookie.len());
    for (i, segment) in kept.iter().enumerate() {
        if i == 0 {
            out.push_str(segment.trim_start());
        } else {
            out.push(';');
            out.push_str(segment);
        }
    }
    out
}

fn split_attributes(cookie: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;

    for (i, c) in cookie.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                segments.push(&cookie[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    segments.push(&cookie[start..]);
    segments
}

fn is_domain_attribute(segment: &str) -> bool {
    match segment.trim_start().split_once('=') {
        Some((name, _)) => name.trim_end().eq_ignore_ascii_case("domain"),
        None => false,
    }
}
