//! Request phase: body parsing, the request hook and forwarding.
//!
//! # Responsibilities
//! - Read small, well-known request bodies into the context for the hook
//! - Run the request hook, which may rewrite the request or answer it
//! - Send the resulting request to the upstream within the upstream budget
//!
//! # Design Decisions
//! - Bodies the hook cannot read are streamed to the upstream untouched
//! - Hop-by-hop headers never cross the proxy
//! - Upstream compression is disabled (`Accept-Encoding: identity`) so
//!   buffered bodies are plain text for the response hook

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::{
    HeaderName, ACCEPT_ENCODING, CONNECTION, CONTENT_LENGTH, HOST, PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING, UPGRADE,
};
use axum::http::{HeaderMap, HeaderValue, Request, Response};
use futures_util::FutureExt;
use http_body_util::LengthLimitError;
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::handlers::{HookPhase, RequestAction, RequestHook};
use crate::proxy::context::RequestContext;
use crate::proxy::error::ProxyError;
use crate::proxy::upstream::UpstreamTarget;
use crate::resilience::{guarded, Deadline};

/// Request body types read into memory before the request hook runs.
pub const PARSEABLE_CONTENT_TYPES: [&str; 3] = [
    "application/json",
    "application/x-www-form-urlencoded",
    "text/plain",
];

const HOP_BY_HOP: [HeaderName; 8] = [
    CONNECTION,
    HeaderName::from_static("keep-alive"),
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Forwards requests to the single upstream.
pub struct RequestPipeline {
    client: Client<HttpConnector, Body>,
    upstream: UpstreamTarget,
    hook: Option<Arc<dyn RequestHook>>,
    parse_body: bool,
    max_body: usize,
    upstream_timeout: Option<Duration>,
}

impl RequestPipeline {
    pub fn new(
        upstream: UpstreamTarget,
        hook: Option<Arc<dyn RequestHook>>,
        parse_body: bool,
        max_body: usize,
        upstream_timeout: Option<Duration>,
    ) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            upstream,
            hook,
            parse_body,
            max_body,
            upstream_timeout,
        }
    }

    pub fn upstream(&self) -> &UpstreamTarget {
        &self.upstream
    }

    /// Read the body into `ctx.body` when the request hook can use it.
    ///
    /// Returns whatever is left to stream: the original body when it was not
    /// read, an empty one otherwise.
    pub async fn prepare(&self, ctx: &mut RequestContext, body: Body) -> Result<Body, ProxyError> {
        if !self.should_parse(ctx) {
            return Ok(body);
        }

        let declared = ctx
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > self.max_body as u64) {
            return Err(ProxyError::RequestBodyTooLarge(self.max_body));
        }

        let bytes = axum::body::to_bytes(body, self.max_body)
            .await
            .map_err(|e| {
                let inner = e.into_inner();
                if inner.downcast_ref::<LengthLimitError>().is_some() {
                    ProxyError::RequestBodyTooLarge(self.max_body)
                } else {
                    ProxyError::RequestBody(axum::Error::new(inner))
                }
            })?;

        tracing::debug!(bytes = bytes.len(), "Request body parsed");
        ctx.body = Some(bytes);
        Ok(Body::empty())
    }

    fn should_parse(&self, ctx: &RequestContext) -> bool {
        self.parse_body
            && self.hook.is_some()
            && ctx
                .content_type()
                .is_some_and(|ct| PARSEABLE_CONTENT_TYPES.contains(&ct.as_str()))
    }

    /// Run the request hook, if any.
    pub async fn run_hook(&self, ctx: &mut RequestContext) -> Result<RequestAction, ProxyError> {
        let Some(hook) = &self.hook else {
            return Ok(RequestAction::Forward);
        };

        match AssertUnwindSafe(hook.on_request(ctx)).catch_unwind().await {
            Ok(Ok(action)) => Ok(action),
            Ok(Err(source)) => Err(ProxyError::Handler {
                phase: HookPhase::Request,
                source,
            }),
            Err(_) => Err(ProxyError::HandlerPanic(HookPhase::Request)),
        }
    }

    /// Send the request described by `ctx` upstream.
    ///
    /// `body` is only used when the context carries no body of its own.
    pub async fn forward(
        &self,
        ctx: &RequestContext,
        body: Body,
        deadline: Deadline,
    ) -> Result<Response<Incoming>, ProxyError> {
        let uri = self.upstream.uri_for(ctx.uri.path_and_query())?;
        let mut headers = forward_headers(ctx, &self.upstream);

        let body = match &ctx.body {
            Some(bytes) => {
                headers.insert(CONTENT_LENGTH, HeaderValue::from(bytes.len()));
                Body::from(bytes.clone())
            }
            None => body,
        };

        let mut request = Request::builder()
            .method(ctx.method.clone())
            .uri(uri)
            .body(body)?;
        *request.headers_mut() = headers;

        tracing::debug!(upstream = %request.uri(), "Forwarding request");
        guarded(self.client.request(request), self.upstream_timeout, deadline)
            .await?
            .map_err(ProxyError::UpstreamUnreachable)
    }
}

/// Headers sent upstream for `ctx`.
pub fn forward_headers(ctx: &RequestContext, upstream: &UpstreamTarget) -> HeaderMap {
    let mut headers = ctx.headers.clone();

    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::try_from(name.trim()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }

    let original_host = headers.remove(HOST);
    headers.insert(HOST, upstream.host_header().clone());
    headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));

    let peer = ctx.client_addr.ip().to_string();
    let forwarded_for = match headers.get(X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) if !prior.trim().is_empty() => format!("{prior}, {peer}"),
        _ => peer,
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(X_FORWARDED_FOR, value);
    }

    if let Some(host) = original_host {
        headers.entry(X_FORWARDED_HOST).or_insert(host);
    }
    headers
        .entry(X_FORWARDED_PROTO)
        .or_insert(HeaderValue::from_static("http"));

    headers
}
