//! Rewrites on-the-fly image resizing query parameters into imgproxy paths.
//!
//! ```text
//! /file.jpg?id=123&width=300&height=400&type=crop&quality=80&format=webp
//!     → /insecure/resizing_type:fill/width:300/height:400/quality:80/format:webp/plain/file.jpg?id=123
//! ```

use axum::body::Body;
use axum::http::{Method, Response, StatusCode, Uri};
use futures_util::future::BoxFuture;
use url::form_urlencoded;

use crate::handlers::{HandlerError, HandlerSet, RequestAction, RequestHook};
use crate::proxy::context::RequestContext;

/// Query parameters consumed by the rewrite.
const CONSUMED: [&str; 5] = ["width", "height", "type", "quality", "format"];

pub fn imgproxy_handlers() -> HandlerSet {
    HandlerSet::named("imgproxy").with_request_hook(ImgproxyRewrite)
}

pub struct ImgproxyRewrite;

impl RequestHook for ImgproxyRewrite {
    fn on_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<RequestAction, HandlerError>> {
        Box::pin(async move {
            if ctx.method != Method::GET && ctx.method != Method::HEAD {
                return Ok(RequestAction::Forward);
            }

            // No file requested.
            if ctx.path() == "/" {
                let response = Response::builder()
                    .status(StatusCode::OK)
                    .body(Body::from("OK"))
                    .map_err(HandlerError::new)?;
                return Ok(RequestAction::Respond(response));
            }

            let rewritten = rewrite_path(ctx.path(), ctx.uri.query());
            tracing::info!(
                "Rewriting {} -> {} [{}]",
                ctx.path_and_query(),
                rewritten,
                ctx.client_ip()
            );
            ctx.uri = rewritten.parse::<Uri>().map_err(HandlerError::new)?;
            Ok(RequestAction::Forward)
        })
    }
}

/// Build the imgproxy path and remaining query for a request path.
pub fn rewrite_path(path: &str, query: Option<&str>) -> String {
    let params: Vec<(String, String)> = form_urlencoded::parse(query.unwrap_or("").as_bytes())
        .into_owned()
        .collect();
    let param = |name: &str| {
        params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    };

    let width = param("width");
    let height = param("height");
    let resizing_type = if param("type") == Some("crop") { "fill" } else { "fit" };

    let mut options = Vec::new();
    if width.is_some() && height.is_some() {
        options.push(format!("resizing_type:{resizing_type}"));
    }
    if let Some(width) = width {
        options.push(format!("width:{}", numeric(width)));
    }
    if let Some(height) = height {
        options.push(format!("height:{}", numeric(height)));
    }
    if let Some(quality) = param("quality") {
        options.push(format!("quality:{}", numeric(quality)));
    }
    if let Some(format) = param("format") {
        options.push(format!("format:{format}"));
    }

    let remaining = params
        .iter()
        .filter(|(k, _)| !CONSUMED.contains(&k.as_str()));
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(remaining)
        .finish();

    let option_path: String = options.iter().map(|o| format!("/{o}")).collect();
    let new_path = format!("/insecure{option_path}/plain{path}");
    if query.is_empty() {
        new_path
    } else {
        format!("{new_path}?{query}")
    }
}

/// Render a parameter as a number the way imgproxy expects it, `NaN` when it
/// is not one.
fn numeric(raw: &str) -> String {
    match raw.trim().parse::<f64>() {
        Ok(n) if n.is_finite() => n.to_string(),
        _ => "NaN".to_string(),
    }
}
