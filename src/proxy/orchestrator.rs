//! Per-request orchestration.
//!
//! Runs one request from the inbound head to the outbound response, within
//! the client lifetime budget, and turns every failure into a response.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use axum::response::IntoResponse;
use tracing::Instrument;

use crate::config::ProxyConfig;
use crate::handlers::{HandlerSet, RequestAction};
use crate::http::request::X_REQUEST_ID;
use crate::http::response::X_HTTP_PROXY_MODE;
use crate::observability::metrics;
use crate::proxy::context::RequestContext;
use crate::proxy::engine::{DisconnectGuard, ResponseEngine};
use crate::proxy::error::ProxyError;
use crate::proxy::pipeline::RequestPipeline;
use crate::proxy::upstream::{InvalidUpstream, UpstreamTarget};
use crate::resilience::Deadline;

/// The transforming proxy for one upstream and one handler set.
pub struct Proxy {
    pipeline: RequestPipeline,
    engine: ResponseEngine,
    client_timeout: Option<Duration>,
}

impl Proxy {
    pub fn new(config: &ProxyConfig, handlers: HandlerSet) -> Result<Self, InvalidUpstream> {
        let upstream = UpstreamTarget::parse(&config.upstream.url)?;
        let max_buffer = config.buffer.max_bytes();
        let upstream_timeout = config.timeouts.upstream();

        tracing::info!(
            upstream = %upstream.authority(),
            handler = %handlers.name,
            max_buffer,
            "Proxy configured"
        );

        Ok(Self {
            pipeline: RequestPipeline::new(
                upstream,
                handlers.on_request,
                config.request.parse_body,
                max_buffer,
                upstream_timeout,
            ),
            engine: ResponseEngine::new(
                handlers.on_response,
                max_buffer,
                config.cookies.strip_domain,
                upstream_timeout,
            ),
            client_timeout: config.timeouts.client(),
        })
    }

    /// Serve one inbound request.
    pub async fn handle(&self, request: Request<Body>, client_addr: SocketAddr) -> Response<Body> {
        let started = Instant::now();
        let request_id = request
            .headers()
            .get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
            .to_string();

        let span = tracing::info_span!(
            "request",
            request_id = %request_id,
            method = %request.method(),
            path = %request.uri().path(),
        );

        async move {
            let mut guard = DisconnectGuard::new(request_id.clone(), None);
            let (parts, body) = request.into_parts();
            let mut ctx = RequestContext::from_parts(parts, client_addr, request_id);

            let deadline = Deadline::after(self.client_timeout);
            let outcome = match deadline.run(self.serve(&mut ctx, body, deadline)).await {
                Ok(result) => result,
                Err(timeout) => Err(ProxyError::from(timeout)),
            };
            guard.complete();

            let response = match outcome {
                Ok(response) => response,
                Err(err) => {
                    err.log(&ctx.request_id);
                    if let ProxyError::Handler { phase, .. } | ProxyError::HandlerPanic(phase) = &err {
                        metrics::record_handler_failure(phase.as_str());
                    }
                    err.into_response()
                }
            };

            let mode = response
                .headers()
                .get(X_HTTP_PROXY_MODE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or(outcome_label(response.status()));
            metrics::record_response(mode, response.status().as_u16(), started);
            tracing::debug!(status = %response.status(), mode, "Request handled");

            response
        }
        .instrument(span)
        .await
    }

    async fn serve(
        &self,
        ctx: &mut RequestContext,
        body: Body,
        deadline: Deadline,
    ) -> Result<Response<Body>, ProxyError> {
        let body = self.pipeline.prepare(ctx, body).await?;

        if let RequestAction::Respond(response) = self.pipeline.run_hook(ctx).await? {
            tracing::debug!("Request answered by the request handler");
            return Ok(response);
        }

        let upstream = self.pipeline.forward(ctx, body, deadline).await?;
        let elapsed = ctx.started.elapsed();
        self.engine.materialize(ctx, upstream, elapsed, deadline).await
    }
}

/// Metrics label for responses the engine did not produce.
fn outcome_label(status: StatusCode) -> &'static str {
    if status.is_client_error() || status.is_server_error() {
        "error"
    } else {
        "handler"
    }
}
