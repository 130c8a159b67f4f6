//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, /health, middleware)
//!     → request.rs (request ID)
//!     → [path filters] → [proxy core]
//!     → response.rs (X-Http-Proxy-Mode)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{MakeRequestUuid, X_REQUEST_ID};
pub use response::X_HTTP_PROXY_MODE;
pub use server::{AppState, HttpServer};
