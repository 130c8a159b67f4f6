//! Per-request failures and their client-visible form.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::BoxError;
use thiserror::Error;

use crate::handlers::{HandlerError, HookPhase};
use crate::resilience::TimeoutKind;

/// Everything that can end a proxied request early.
///
/// The client only ever sees the canonical reason phrase of `status()`; the
/// detail goes to the log.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(#[source] hyper_util::client::legacy::Error),

    #[error("upstream response body failed: {0}")]
    UpstreamBody(#[source] BoxError),

    #[error(transparent)]
    Timeout(#[from] TimeoutKind),

    #[error("{phase} handler failed: {source}")]
    Handler {
        phase: HookPhase,
        #[source]
        source: HandlerError,
    },

    #[error("{0} handler panicked")]
    HandlerPanic(HookPhase),

    #[error("request body exceeds {0} bytes")]
    RequestBodyTooLarge(usize),

    #[error("request body could not be read: {0}")]
    RequestBody(#[source] axum::Error),

    #[error("cannot build upstream request: {0}")]
    InvalidRequest(#[from] axum::http::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnreachable(_) | ProxyError::UpstreamBody(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Handler { .. } | ProxyError::HandlerPanic(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ProxyError::RequestBodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ProxyError::RequestBody(_) => StatusCode::BAD_REQUEST,
            ProxyError::InvalidRequest(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Log the failure at the severity its kind deserves.
    pub fn log(&self, request_id: &str) {
        match self {
            ProxyError::Handler { .. } | ProxyError::HandlerPanic(_) => {
                tracing::error!(request_id = %request_id, error = %self, "Handler failure");
            }
            ProxyError::RequestBodyTooLarge(_) | ProxyError::RequestBody(_) => {
                tracing::warn!(request_id = %request_id, error = %self, "Rejected request body");
            }
            _ => {
                tracing::error!(request_id = %request_id, error = %self, "Proxy error");
            }
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status();
        let reason = status.canonical_reason().unwrap_or("Error");
        (status, reason).into_response()
    }
}
