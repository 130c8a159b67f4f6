//! Traffic logging handlers.
//!
//! `log` records requests and/or responses depending on its options;
//! `request-log` only records requests.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::config::LogHandlerConfig;
use crate::handlers::{HandlerError, HandlerSet, RequestAction, RequestHook, ResponseHook};
use crate::proxy::context::{primary_mime, RequestContext, UpstreamMeta};

/// Build the `log` handler set. Disabled phases register no hook at all, so
/// a response-logging-off configuration proxies in passthrough mode.
pub fn log_handlers(options: &LogHandlerConfig) -> HandlerSet {
    let mut set = HandlerSet::named("log");
    if options.request {
        set = set.with_request_hook(RequestLogger {
            include_ip: options.ip,
            include_body: options.request_body,
        });
    }
    if options.response {
        set = set.with_response_hook(ResponseLogger {
            include_ip: options.ip,
            include_body: options.response_body,
        });
    }
    set
}

/// Build the `request-log` handler set.
pub fn request_log_handlers() -> HandlerSet {
    HandlerSet::named("request-log").with_request_hook(RequestLogger {
        include_ip: true,
        include_body: false,
    })
}

fn ip_suffix(ctx: &RequestContext, include_ip: bool) -> String {
    if include_ip {
        format!(" [{}]", ctx.client_ip())
    } else {
        String::new()
    }
}

pub struct RequestLogger {
    include_ip: bool,
    include_body: bool,
}

impl RequestHook for RequestLogger {
    fn on_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<RequestAction, HandlerError>> {
        Box::pin(async move {
            tracing::info!(
                "Request:  {} {}{}",
                ctx.method,
                ctx.path_and_query(),
                ip_suffix(ctx, self.include_ip)
            );

            if self.include_body {
                if let Some(text) = describe_request_body(ctx) {
                    tracing::info!("Request body:\n{}", text);
                }
            }
            Ok(RequestAction::Forward)
        })
    }
}

/// Render a parsed request body for the log: JSON and form bodies pretty
/// printed, plain text as is.
fn describe_request_body(ctx: &RequestContext) -> Option<String> {
    let body = ctx.body.as_ref()?;
    match ctx.content_type()?.as_str() {
        "application/json" => {
            let value: Value = serde_json::from_slice(body).ok()?;
            serde_json::to_string_pretty(&value).ok()
        }
        "application/x-www-form-urlencoded" => {
            let form: serde_json::Map<String, Value> = url::form_urlencoded::parse(body)
                .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
                .collect();
            serde_json::to_string_pretty(&form).ok()
        }
        "text/plain" => Some(String::from_utf8_lossy(body).into_owned()),
        _ => None,
    }
}

pub struct ResponseLogger {
    include_ip: bool,
    include_body: bool,
}

impl ResponseHook for ResponseLogger {
    fn on_response<'a>(
        &'a self,
        ctx: &'a RequestContext,
        body: &'a str,
        upstream: &'a UpstreamMeta,
    ) -> BoxFuture<'a, Result<Option<Bytes>, HandlerError>> {
        Box::pin(async move {
            tracing::info!(
                "Response: {} {} ({}) [{}] {}ms{}",
                ctx.method,
                ctx.path_and_query(),
                upstream.status.as_u16(),
                upstream.mode,
                upstream.elapsed.as_millis(),
                ip_suffix(ctx, self.include_ip)
            );

            if !self.include_body {
                return Ok(None);
            }
            if primary_mime(&upstream.headers).as_deref() != Some("application/json") {
                return Ok(None);
            }

            match serde_json::from_str::<Value>(body) {
                Ok(data) => {
                    let pretty = serde_json::to_string_pretty(&data).map_err(HandlerError::new)?;
                    tracing::info!("Response body:\n{}", pretty);
                    let compact = serde_json::to_vec(&data).map_err(HandlerError::new)?;
                    Ok(Some(Bytes::from(compact)))
                }
                Err(error) => {
                    tracing::warn!(%error, "Failed to parse JSON response payload; returning raw payload");
                    tracing::info!("Response body:\n{}", body);
                    Ok(Some(Bytes::copy_from_slice(body.as_bytes())))
                }
            }
        })
    }
}
