//! Response materialization engine.
//!
//! # States
//! ```text
//! Deciding ─┬─▶ Passthrough ────────────────────────────▶ Done
//!           ├─▶ Streaming ──────────────────────────────▶ Done
//!           └─▶ Buffering ─┬─▶ (end of body) handler ──▶ Done
//!                          └─▶ BufferOverflowStreaming ─▶ Done
//! ```
//!
//! # Design Decisions
//! - The buffer/stream decision is made from the response head alone
//! - Overflow is one-way: accumulated bytes are flushed first, then the rest
//!   of the body is relayed without accumulation
//! - The response handler only ever sees complete bodies
//! - Dropping the returned body (client gone) drops the upstream body with it

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{HeaderMap, HeaderValue, Response};
use axum::BoxError;
use bytes::{Bytes, BytesMut};
use futures_util::{stream, FutureExt};
use http_body::Body as HttpBody;
use http_body_util::BodyExt;

use crate::handlers::{HookPhase, ResponseHook};
use crate::http::response::X_HTTP_PROXY_MODE;
use crate::observability::metrics;
use crate::proxy::context::{primary_mime, ProxyMode, RequestContext, UpstreamMeta};
use crate::proxy::error::ProxyError;
use crate::proxy::headers::{normalize, ResponseHead};
use crate::resilience::{guarded, Deadline};

/// Content types a response handler may rewrite.
pub const BUFFERABLE_CONTENT_TYPES: [&str; 6] = [
    "application/json",
    "application/xml",
    "application/x-www-form-urlencoded",
    "text/html",
    "text/plain",
    "text/xml",
];

/// Assumed when the upstream sends no `Content-Type`.
const DEFAULT_CONTENT_TYPE: &str = "text/html";

/// Outcome of the Deciding state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Passthrough,
    Stream,
    Buffer,
    /// Eligible for buffering but the declared length is already above the
    /// limit: served like an overflow without accumulating anything.
    OverBudget,
}

/// Choose how a response is served from its head alone.
pub fn decide(has_response_hook: bool, headers: &HeaderMap, max_buffer: usize) -> Decision {
    if !has_response_hook {
        return Decision::Passthrough;
    }

    let content_type = primary_mime(headers).unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
    if !BUFFERABLE_CONTENT_TYPES.contains(&content_type.as_str()) {
        return Decision::Stream;
    }

    match declared_length(headers) {
        Some(len) if len <= max_buffer as u64 => Decision::Buffer,
        Some(_) => Decision::OverBudget,
        None => Decision::Stream,
    }
}

/// The declared `Content-Length`, if present and numeric.
pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Accumulation mode of a buffered response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferMode {
    Buffering,
    Streaming,
}

/// What to do with a chunk after offering it to the buffer.
#[derive(Debug, PartialEq)]
pub enum Accumulated {
    /// Kept in memory.
    Held,
    /// The limit was crossed: everything accumulated so far, this chunk
    /// included, must be written out now.
    Overflow(Bytes),
    /// Already streaming: forward the chunk as is.
    Forward(Bytes),
}

/// Bounded accumulation of a response body.
///
/// Once the mode is `Streaming` nothing is ever accumulated again.
#[derive(Debug)]
pub struct BufferState {
    mode: BufferMode,
    accumulated: BytesMut,
    len: usize,
    limit: usize,
}

impl BufferState {
    pub fn new(limit: usize, expected: Option<u64>) -> Self {
        let capacity = expected
            .map(|e| e.min(limit as u64) as usize)
            .unwrap_or(0);
        Self {
            mode: BufferMode::Buffering,
            accumulated: BytesMut::with_capacity(capacity),
            len: 0,
            limit,
        }
    }

    pub fn mode(&self) -> BufferMode {
        self.mode
    }

    /// Total bytes seen, including any flushed on overflow.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn push(&mut self, chunk: Bytes) -> Accumulated {
        self.len += chunk.len();
        if self.mode == BufferMode::Streaming {
            return Accumulated::Forward(chunk);
        }

        self.accumulated.extend_from_slice(&chunk);
        if self.len > self.limit {
            self.mode = BufferMode::Streaming;
            let flushed = std::mem::take(&mut self.accumulated).freeze();
            return Accumulated::Overflow(flushed);
        }
        Accumulated::Held
    }

    /// The complete body of a response that never overflowed.
    pub fn into_body(self) -> Bytes {
        self.accumulated.freeze()
    }
}

/// Serves upstream responses to the client.
pub struct ResponseEngine {
    hook: Option<Arc<dyn ResponseHook>>,
    max_buffer: usize,
    strip_cookie_domain: bool,
    upstream_idle: Option<Duration>,
}

impl ResponseEngine {
    pub fn new(
        hook: Option<Arc<dyn ResponseHook>>,
        max_buffer: usize,
        strip_cookie_domain: bool,
        upstream_idle: Option<Duration>,
    ) -> Self {
        Self {
            hook,
            max_buffer,
            strip_cookie_domain,
            upstream_idle,
        }
    }

    /// Turn an upstream response into the client response.
    ///
    /// `elapsed` is the time the upstream took to answer; `deadline` bounds
    /// the rest of the request, streamed bodies included.
    pub async fn materialize<B>(
        &self,
        ctx: &RequestContext,
        upstream: Response<B>,
        elapsed: Duration,
        deadline: Deadline,
    ) -> Result<Response<Body>, ProxyError>
    where
        B: HttpBody<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError>,
    {
        let (parts, body) = upstream.into_parts();
        let head = ResponseHead {
            status: parts.status,
            headers: parts.headers,
        };

        let decision = decide(self.hook.is_some(), &head.headers, self.max_buffer);
        tracing::debug!(?decision, status = %head.status, "Upstream response received");

        let hook = match (decision, &self.hook) {
            (Decision::Buffer, Some(hook)) => hook.clone(),
            (Decision::Passthrough, _) => {
                return self.relay(ctx, &head, ProxyMode::Passthrough, None, body, deadline);
            }
            (Decision::OverBudget, _) => {
                tracing::warn!(
                    declared = declared_length(&head.headers),
                    limit = self.max_buffer,
                    "Response exceeds the buffer limit, streaming it; the response handler won't be called"
                );
                metrics::record_buffer_overflow();
                return self.relay(ctx, &head, ProxyMode::BufferStream, None, body, deadline);
            }
            _ => {
                return self.relay(ctx, &head, ProxyMode::Stream, None, body, deadline);
            }
        };

        let mut body = body;
        let mut state = BufferState::new(self.max_buffer, declared_length(&head.headers));
        loop {
            let frame = guarded(body.frame(), self.upstream_idle, deadline).await?;
            let data = match frame {
                None => break,
                Some(Err(e)) => return Err(ProxyError::UpstreamBody(e.into())),
                Some(Ok(frame)) => match frame.into_data() {
                    Ok(data) => data,
                    // Trailers cannot be replayed on a rewritten body.
                    Err(_) => continue,
                },
            };

            if let Accumulated::Overflow(flushed) = state.push(data) {
                tracing::warn!(
                    received = state.len(),
                    limit = self.max_buffer,
                    "Response exceeded the buffer limit, switching to streaming; the response handler won't be called"
                );
                metrics::record_buffer_overflow();
                return self.relay(ctx, &head, ProxyMode::BufferStream, Some(flushed), body, deadline);
            }
        }

        let original = state.into_body();
        let meta = UpstreamMeta {
            status: head.status,
            version: parts.version,
            headers: head.headers.clone(),
            elapsed,
            mode: ProxyMode::Buffer,
        };
        let outcome = {
            let text = String::from_utf8_lossy(&original);
            AssertUnwindSafe(hook.on_response(ctx, &text, &meta))
                .catch_unwind()
                .await
        };
        let replacement = match outcome {
            Ok(Ok(replacement)) => replacement,
            Ok(Err(source)) => {
                return Err(ProxyError::Handler {
                    phase: HookPhase::Response,
                    source,
                })
            }
            Err(_) => return Err(ProxyError::HandlerPanic(HookPhase::Response)),
        };

        // An empty replacement keeps the original body.
        let bytes = replacement.filter(|b| !b.is_empty()).unwrap_or(original);
        tracing::debug!(bytes = bytes.len(), "Replaying buffered response");
        let out = normalize(&head, true, self.strip_cookie_domain);
        Ok(build_response(out, ProxyMode::Buffer, Body::from(bytes), &ctx.request_id))
    }

    /// Stream the rest of `body` to the client, after `prefix` if any.
    fn relay<B>(
        &self,
        ctx: &RequestContext,
        head: &ResponseHead,
        mode: ProxyMode,
        prefix: Option<Bytes>,
        body: B,
        deadline: Deadline,
    ) -> Result<Response<Body>, ProxyError>
    where
        B: HttpBody<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError>,
    {
        let buffered = mode == ProxyMode::BufferStream;
        let out = normalize(head, buffered, self.strip_cookie_domain);
        let relay = Relay {
            prefix,
            body,
            idle: self.upstream_idle,
            deadline,
            guard: DisconnectGuard::new(ctx.request_id.clone(), Some(mode)),
            finished: false,
        };
        Ok(build_response(out, mode, relay.into_body(), &ctx.request_id))
    }
}

fn build_response(head: ResponseHead, mode: ProxyMode, body: Body, request_id: &str) -> Response<Body> {
    tracing::debug!(request_id = %request_id, %mode, status = %head.status, "Sending response head");
    let mut response = Response::new(body);
    *response.status_mut() = head.status;
    *response.headers_mut() = head.headers;
    response
        .headers_mut()
        .insert(X_HTTP_PROXY_MODE, HeaderValue::from_static(mode.as_str()));
    response
}

/// Upstream body relayed chunk by chunk to the client.
struct Relay<B> {
    prefix: Option<Bytes>,
    body: B,
    idle: Option<Duration>,
    deadline: Deadline,
    guard: DisconnectGuard,
    finished: bool,
}

impl<B> Relay<B>
where
    B: HttpBody<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<BoxError>,
{
    fn into_body(mut self) -> Body {
        if self.prefix.as_ref().is_none_or(Bytes::is_empty) && self.body.is_end_stream() {
            self.finish();
        }

        let chunks = stream::unfold(self, |mut relay| async move {
            if relay.finished {
                return None;
            }
            if let Some(prefix) = relay.prefix.take().filter(|p| !p.is_empty()) {
                if relay.body.is_end_stream() {
                    relay.finish();
                }
                return Some((Ok(prefix), relay));
            }

            loop {
                match guarded(relay.body.frame(), relay.idle, relay.deadline).await {
                    Ok(Some(Ok(frame))) => {
                        if let Ok(data) = frame.into_data() {
                            // The server stops polling once a declared length
                            // is written, so the end may never be asked for.
                            if relay.body.is_end_stream() {
                                relay.finish();
                            }
                            return Some((Ok(data), relay));
                        }
                    }
                    Ok(Some(Err(e))) => {
                        let error: BoxError = e.into();
                        tracing::warn!(request_id = %relay.guard.request_id, error = %error, "Upstream body failed mid-stream");
                        relay.finish();
                        return Some((Err(error), relay));
                    }
                    Ok(None) => {
                        relay.finish();
                        return None;
                    }
                    Err(timeout) => {
                        tracing::warn!(request_id = %relay.guard.request_id, error = %timeout, "Aborting stream");
                        relay.finish();
                        return Some((Err(BoxError::from(timeout)), relay));
                    }
                }
            }
        });
        Body::from_stream(chunks)
    }

    fn finish(&mut self) {
        self.finished = true;
        self.guard.complete();
    }
}

/// Notices requests abandoned by the client.
///
/// Dropped without `complete()` means the response future or body was
/// dropped by the server, which only happens when the client went away.
#[derive(Debug)]
pub struct DisconnectGuard {
    request_id: String,
    mode: Option<ProxyMode>,
    completed: bool,
}

impl DisconnectGuard {
    pub fn new(request_id: String, mode: Option<ProxyMode>) -> Self {
        Self {
            request_id,
            mode,
            completed: false,
        }
    }

    pub fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mode = self.mode.map(ProxyMode::as_str).unwrap_or("pending");
        tracing::debug!(request_id = %self.request_id, mode, "Client disconnected before the response completed");
        metrics::record_client_disconnect(mode);
    }
}
