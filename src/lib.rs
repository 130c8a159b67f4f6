//! Transforming HTTP reverse proxy library.

pub mod config;
pub mod handlers;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod proxy;
pub mod resilience;
pub mod security;

pub use config::schema::ProxyConfig;
pub use handlers::HandlerSet;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{ProxyMode, RequestContext};
