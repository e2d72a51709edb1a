//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to a third-party service:
//!     → retries.rs (send, classify outcome, retry transient ones)
//!     → backoff.rs (delay between attempts)
//!     → last response, or FetchError once the network never answered
//! ```
//!
//! # Design Decisions
//! - Every outbound call has a per-attempt timeout (set on the client)
//! - Retries are bounded; the bound is part of the policy, not the call site
//! - A caller that goes away does not cancel an in-flight retry loop unless
//!   it drops the future

pub mod backoff;
pub mod retries;

pub use retries::{
    is_transient_status, retry_with_policy, FetchError, HasStatus, RetryExhausted, RetryPolicy,
    RetryingHttpClient,
};
