//! End-to-end tests of the request side: hooks, forwarding and filters.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use transform_proxy::config::HandlerConfig;
use transform_proxy::handlers::{self, HandlerError, HandlerSet, RequestAction, RequestHook};
use transform_proxy::proxy::RequestContext;

mod common;

use common::{client, config_for, start_mock_upstream, start_proxy, MockResponse};

/// Answers every request itself.
struct Maintenance;

impl RequestHook for Maintenance {
    fn on_request<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<RequestAction, HandlerError>> {
        Box::pin(async {
            let response = (StatusCode::SERVICE_UNAVAILABLE, "maintenance").into_response();
            Ok(RequestAction::Respond(response))
        })
    }
}

/// Uppercases parsed request bodies.
struct ShoutBody;

impl RequestHook for ShoutBody {
    fn on_request<'a>(
        &'a self,
        ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<RequestAction, HandlerError>> {
        Box::pin(async move {
            if let Some(body) = ctx.body.take() {
                let text = String::from_utf8_lossy(&body).to_uppercase();
                ctx.body = Some(Bytes::from(text));
            }
            Ok(RequestAction::Forward)
        })
    }
}

/// Rejects every request with an error.
struct Rejecting;

impl RequestHook for Rejecting {
    fn on_request<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<RequestAction, HandlerError>> {
        Box::pin(async { Err(HandlerError::new("session store unavailable")) })
    }
}

struct Exploding;

fn explode() -> Result<RequestAction, HandlerError> {
    panic!("request hook exploded")
}

impl RequestHook for Exploding {
    fn on_request<'a>(
        &'a self,
        _ctx: &'a mut RequestContext,
    ) -> BoxFuture<'a, Result<RequestAction, HandlerError>> {
        Box::pin(async { explode() })
    }
}

#[tokio::test]
async fn test_short_circuit_skips_upstream() {
    let upstream = start_mock_upstream(MockResponse::ok("text/plain", "upstream")).await;
    let handlers = HandlerSet::named("maintenance").with_request_hook(Maintenance);
    let (addr, shutdown) = start_proxy(config_for(&upstream), handlers).await;

    let res = client().get(format!("http://{addr}/any")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(res.text().await.unwrap(), "maintenance");
    assert_eq!(upstream.calls(), 0);

    shutdown.trigger();
}

#[tokio::test]
async fn test_request_body_rewritten() {
    let upstream = start_mock_upstream(MockResponse::ok("text/plain", "ok")).await;
    let handlers = HandlerSet::named("shout").with_request_hook(ShoutBody);
    let (addr, shutdown) = start_proxy(config_for(&upstream), handlers).await;

    let res = client()
        .post(format!("http://{addr}/submit"))
        .header("content-type", "application/json")
        .body(r#"{"name":"ada"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let seen = upstream.last_request();
    assert_eq!(seen.body, br#"{"NAME":"ADA"}"#);
    assert_eq!(seen.header("content-length").as_deref(), Some("14"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_request_body_limit() {
    let upstream = start_mock_upstream(MockResponse::ok("text/plain", "ok")).await;
    let handlers = HandlerSet::named("shout").with_request_hook(ShoutBody);
    let mut config = config_for(&upstream);
    config.buffer.max_size_mb = 0.001;
    let (addr, shutdown) = start_proxy(config, handlers).await;

    let res = client()
        .post(format!("http://{addr}/submit"))
        .header("content-type", "text/plain")
        .body("z".repeat(4096))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(upstream.calls(), 0);

    shutdown.trigger();
}

#[tokio::test]
async fn test_forwarded_headers() {
    let upstream = start_mock_upstream(MockResponse::ok("text/plain", "ok")).await;
    let (addr, shutdown) = start_proxy(config_for(&upstream), HandlerSet::none()).await;

    let res = client()
        .get(format!("http://{addr}/path?q=1"))
        .header("accept-encoding", "gzip")
        .header("x-request-id", "trace-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "trace-42");

    let seen = upstream.last_request();
    assert_eq!(seen.request_line(), "GET /path?q=1 HTTP/1.1");
    assert_eq!(seen.header("host"), Some(upstream.addr.to_string()));
    assert_eq!(seen.header("accept-encoding").as_deref(), Some("identity"));
    assert_eq!(seen.header("x-forwarded-for").as_deref(), Some("127.0.0.1"));
    assert_eq!(seen.header("x-forwarded-host"), Some(addr.to_string()));
    assert_eq!(seen.header("x-request-id").as_deref(), Some("trace-42"));

    shutdown.trigger();
}

#[tokio::test]
async fn test_request_id_generated() {
    let upstream = start_mock_upstream(MockResponse::ok("text/plain", "ok")).await;
    let (addr, shutdown) = start_proxy(config_for(&upstream), HandlerSet::none()).await;

    let res = client().get(format!("http://{addr}/")).send().await.unwrap();
    let id = res.headers()["x-request-id"].to_str().unwrap().to_string();
    assert_eq!(id.len(), 36);
    assert_eq!(upstream.last_request().header("x-request-id"), Some(id));

    shutdown.trigger();
}

#[tokio::test]
async fn test_imgproxy_rewrite_reaches_upstream() {
    let upstream = start_mock_upstream(MockResponse::ok("image/jpeg", "jpeg")).await;
    let handlers = handlers::resolve(&HandlerConfig {
        name: "imgproxy".to_string(),
        ..HandlerConfig::default()
    })
    .unwrap();
    let (addr, shutdown) = start_proxy(config_for(&upstream), handlers).await;

    let res = client()
        .get(format!("http://{addr}/img.jpg?width=10&token=t"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        upstream.last_request().request_line(),
        "GET /insecure/width:10/plain/img.jpg?token=t HTTP/1.1"
    );

    let root = client().get(format!("http://{addr}/")).send().await.unwrap();
    assert_eq!(root.text().await.unwrap(), "OK");
    assert_eq!(upstream.calls(), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn test_health_is_answered_locally() {
    let upstream = start_mock_upstream(MockResponse::ok("text/plain", "upstream")).await;
    let mut config = config_for(&upstream);
    config.filters.extensions.enabled = true;
    config.filters.extensions.mode = transform_proxy::config::ExtensionMode::Allow;
    config.filters.extensions.allow_no_extension = false;
    let (addr, shutdown) = start_proxy(config, HandlerSet::none()).await;

    let res = client().get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "OK");
    assert_eq!(upstream.calls(), 0);

    shutdown.trigger();
}

#[tokio::test]
async fn test_path_filters_block_before_upstream() {
    let upstream = start_mock_upstream(MockResponse::ok("text/plain", "secret")).await;
    let mut config = config_for(&upstream);
    config.filters.hidden_paths.enabled = true;
    config.filters.extensions.enabled = true;
    config.filters.extensions.extensions = vec!["map".to_string()];
    config.filters.extensions.status = 403;
    let (addr, shutdown) = start_proxy(config, HandlerSet::none()).await;

    let hidden = client().get(format!("http://{addr}/.env")).send().await.unwrap();
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);
    assert_eq!(hidden.text().await.unwrap(), "Not Found");

    let blocked = client().get(format!("http://{addr}/app.js.map")).send().await.unwrap();
    assert_eq!(blocked.status(), StatusCode::FORBIDDEN);
    assert_eq!(upstream.calls(), 0);

    let allowed = client().get(format!("http://{addr}/app.js")).send().await.unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(upstream.calls(), 1);

    shutdown.trigger();
}

#[tokio::test]
async fn test_request_hook_error_is_500() {
    let upstream = start_mock_upstream(MockResponse::ok("text/plain", "upstream")).await;
    let handlers = HandlerSet::named("rejecting").with_request_hook(Rejecting);
    let (addr, shutdown) = start_proxy(config_for(&upstream), handlers).await;

    let res = client().get(format!("http://{addr}/account")).send().await.unwrap();

    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.text().await.unwrap(), "Internal Server Error");
    assert_eq!(upstream.calls(), 0);

    shutdown.trigger();
}

#[tokio::test]
async fn test_request_hook_panic_is_500() {
    let upstream = start_mock_upstream(MockResponse::ok("text/plain", "upstream")).await;
    let handlers = HandlerSet::named("exploding").with_request_hook(Exploding);
    let (addr, shutdown) = start_proxy(config_for(&upstream), handlers).await;

    let res = client().get(format!("http://{addr}/account")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.text().await.unwrap(), "Internal Server Error");
    assert_eq!(upstream.calls(), 0);

    // The server keeps serving after a hook panic.
    let again = client().get(format!("http://{addr}/account")).send().await.unwrap();
    assert_eq!(again.status(), StatusCode::INTERNAL_SERVER_ERROR);

    shutdown.trigger();
}
