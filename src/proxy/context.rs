//! Per-request state shared between the pipeline, the engine and handlers.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use axum::http::{request, HeaderMap, Method, StatusCode, Uri, Version};
use bytes::Bytes;

/// Which path of the response engine served a response.
///
/// Reported to clients in the `X-Http-Proxy-Mode` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyMode {
    /// No response handler: headers and body piped through.
    Passthrough,
    /// Response handler registered but the response was not eligible for buffering.
    Stream,
    /// Body fully buffered and handed to the response handler.
    Buffer,
    /// Buffering was abandoned for exceeding the size limit.
    BufferStream,
}

impl ProxyMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyMode::Passthrough => "passthrough",
            ProxyMode::Stream => "stream",
            ProxyMode::Buffer => "buffer",
            ProxyMode::BufferStream => "buffer-stream",
        }
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The inbound request as seen (and rewritten) by handlers.
///
/// Owned by a single request task. The request handler receives it by
/// exclusive borrow; whatever it leaves in `uri`, `headers` and `body` is
/// what gets forwarded.
#[derive(Debug)]
pub struct RequestContext {
    pub method: Method,
    /// Path and query of the request (origin form).
    pub uri: Uri,
    pub headers: HeaderMap,
    /// Body bytes, when the body was parsed up front or replaced by a handler.
    /// `None` streams the original body to the upstream.
    pub body: Option<Bytes>,
    pub client_addr: SocketAddr,
    pub started: Instant,
    pub request_id: String,
}

impl RequestContext {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        client_addr: SocketAddr,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            method,
            uri,
            headers,
            body: None,
            client_addr,
            started: Instant::now(),
            request_id: request_id.into(),
        }
    }

    pub(crate) fn from_parts(parts: request::Parts, client_addr: SocketAddr, request_id: String) -> Self {
        let uri = parts
            .uri
            .path_and_query()
            .and_then(|pq| Uri::try_from(pq.as_str()).ok())
            .unwrap_or_else(|| Uri::from_static("/"));
        Self::new(parts.method, uri, parts.headers, client_addr, request_id)
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Path and query as forwarded.
    pub fn path_and_query(&self) -> &str {
        self.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/")
    }

    /// Primary MIME type of the request body, lowercased, parameters stripped.
    pub fn content_type(&self) -> Option<String> {
        primary_mime(&self.headers)
    }

    /// Best guess at the real client address.
    ///
    /// The first `X-Forwarded-For` entry wins over the socket peer; IPv4
    /// mapped IPv6 addresses and `::1` are reported in IPv4 form.
    pub fn client_ip(&self) -> String {
        let forwarded = self
            .headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());

        match forwarded {
            Some(raw) => normalize_ip_text(raw),
            None => normalize_ip(self.client_addr.ip()).to_string(),
        }
    }
}

fn normalize_ip(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) if v6.is_loopback() => IpAddr::from([127, 0, 0, 1]),
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    }
}

fn normalize_ip_text(raw: &str) -> String {
    match raw.parse::<IpAddr>() {
        Ok(ip) => normalize_ip(ip).to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Primary MIME type of a `Content-Type` header, lowercased, parameters stripped.
pub fn primary_mime(headers: &HeaderMap) -> Option<String> {
    headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .filter(|v| !v.is_empty())
}

/// What a response handler learns about the upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamMeta {
    pub status: StatusCode,
    pub version: Version,
    /// Headers exactly as received from the upstream.
    pub headers: HeaderMap,
    /// Time from request start until the upstream response head arrived.
    pub elapsed: Duration,
    pub mode: ProxyMode,
}
