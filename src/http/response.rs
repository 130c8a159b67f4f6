//! Response headers added by the proxy.
//!
//! # Design Decisions
//! - Every proxied response says which engine mode served it
//! - Hop-by-hop and framing headers are handled by the proxy core, not here

use axum::http::HeaderName;

/// Names the mode that served a response: `passthrough`, `stream`, `buffer`
/// or `buffer-stream`.
pub const X_HTTP_PROXY_MODE: HeaderName = HeaderName::from_static("x-http-proxy-mode");
