//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → loader.rs (environment overrides)
//!     → validation.rs (semantic checks)
//!     → ProxyConfig (validated, immutable)
//!     → passed explicitly to the server and its collaborators
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no hot reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load, ConfigError};
pub use schema::{
    BufferConfig, CookieConfig, ExtensionFilterConfig, ExtensionMode, FilterConfig,
    HandlerConfig, HiddenPathsConfig, ListenerConfig, LogFormat, LogHandlerConfig,
    ObservabilityConfig, ProxyConfig, RequestConfig, ShutdownConfig, TimeoutConfig,
    UpstreamConfig,
};
pub use validation::ValidationError;
