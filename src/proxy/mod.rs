//! Transforming proxy core.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → orchestrator.rs (request span, client deadline, error mapping)
//!     → pipeline.rs (body parsing, request hook, forwarding)
//!     → upstream.rs (target URI, Host header)
//!     → engine.rs (passthrough / stream / buffer / buffer-stream)
//!     → headers.rs (response head normalization)
//!     → client
//! ```
//!
//! # Design Decisions
//! - One upstream per process, one handler set per process
//! - Each request is a single sequential task; no shared mutable state
//! - The mode that served a response is reported in `X-Http-Proxy-Mode`

pub mod context;
pub mod engine;
pub mod error;
pub mod headers;
pub mod orchestrator;
pub mod pipeline;
pub mod upstream;

pub use context::{ProxyMode, RequestContext, UpstreamMeta};
pub use engine::ResponseEngine;
pub use error::ProxyError;
pub use orchestrator::Proxy;
pub use pipeline::RequestPipeline;
pub use upstream::{InvalidUpstream, UpstreamTarget};
