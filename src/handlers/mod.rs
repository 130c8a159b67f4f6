//! Pluggable request and response transforms.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → RequestHook::on_request (may rewrite the context or answer directly)
//!     → upstream
//!     → ResponseHook::on_response (buffered responses only, may replace the body)
//!     → client
//! ```
//!
//! # Design Decisions
//! - Both hooks are optional; a `HandlerSet` is chosen once at startup
//! - Handlers are resolved by name from a closed registry (registry.rs)
//! - A failing or panicking hook turns into a 500 for that request only

pub mod imgproxy;
pub mod log;
pub mod registry;

use std::fmt;
use std::sync::Arc;

use axum::body::Body;
use axum::http::Response;
use axum::BoxError;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::proxy::context::{RequestContext, UpstreamMeta};

pub use registry::resolve;

/// Error raised by a hook.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(BoxError);

impl HandlerError {
    pub fn new(error: impl Into<BoxError>) -> Self {
        Self(error.into())
    }
}

/// Outcome of the request phase.
#[derive(Debug)]
pub enum RequestAction {
    /// Forward the (possibly rewritten) request to the upstream.
    Forward,
    /// Answer the client with this response; the upstream is not contacted.
    Respond(Response<Body>),
}

/// Request-phase hook, run once per request before forwarding.
pub trait RequestHook: Send + Sync + 'static {
    fn on_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<RequestAction, HandlerError>>;
}

/// Response-phase hook, run on fully buffered responses.
///
/// Returning `Ok(None)` or an empty replacement sends the original body
/// unchanged.
pub trait ResponseHook: Send + Sync + 'static {
    fn on_response<'a>(
        &'a self,
        ctx: &'a RequestContext,
        body: &'a str,
        upstream: &'a UpstreamMeta,
    ) -> BoxFuture<'a, Result<Option<Bytes>, HandlerError>>;
}

/// The hooks active for the lifetime of the process.
#[derive(Clone, Default)]
pub struct HandlerSet {
    pub name: String,
    pub on_request: Option<Arc<dyn RequestHook>>,
    pub on_response: Option<Arc<dyn ResponseHook>>,
}

impl HandlerSet {
    /// A set without hooks: every response is passed through.
    pub fn none() -> Self {
        Self {
            name: "none".to_string(),
            ..Self::default()
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_request_hook(mut self, hook: impl RequestHook) -> Self {
        self.on_request = Some(Arc::new(hook));
        self
    }

    pub fn with_response_hook(mut self, hook: impl ResponseHook) -> Self {
        self.on_response = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for HandlerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSet")
            .field("name", &self.name)
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .finish()
    }
}

/// Which hook a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Request,
    Response,
}

impl HookPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            HookPhase::Request => "request",
            HookPhase::Response => "response",
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
