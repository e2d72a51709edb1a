//! Admission-control and resilience edge for the agent demo console.
//!
//! - [`security::rate_limit`]: per-key fixed-window rate limiting
//! - [`resilience::retries`]: outbound HTTP with exponential backoff
//! - [`security::origin`]: CORS gate for the API namespace
//! - [`security::identity`]: session authentication and role lookup

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::EdgeConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
