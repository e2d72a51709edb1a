//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → origin.rs (CORS policy, preflight short-circuit on /api/*)
//!     → handler
//!         → identity.rs (session → user id → role, when protected)
//!         → rate_limit.rs (per-key fixed window)
//!     → business logic
//! ```
//!
//! # Design Decisions
//! - Origin and identity checks are pure per-request computations
//! - The only shared mutable state is the rate limiter's counter store
//! - Configuration is injected, never read from the environment here

pub mod identity;
pub mod origin;
pub mod rate_limit;

pub use identity::{AuthContext, AuthRejection, Identity, IdentityResolver, Role, UserId};
pub use origin::{origin_gate_middleware, OriginAllowList, OriginGate};
pub use rate_limit::{Limit, RateLimitDecision, RateLimitKey, RateLimiter};
