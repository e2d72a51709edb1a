//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the edge.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the edge service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EdgeConfig {
    /// Listener configuration (bind address, client IP trust).
    pub listener: ListenerConfig,

    /// Cross-origin policy for the API namespace.
    pub cors: CorsConfig,

    /// Session authentication and role lookup.
    pub auth: AuthConfig,

    /// Named per-feature request limits.
    pub rate_limits: RateLimitsConfig,

    /// Outbound retry policy.
    pub retries: RetryConfig,

    /// Third-party targets called through the retrying client.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Request hardening.
    pub security: SecurityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Take the client IP from the last `X-Forwarded-For` hop (or `X-Real-IP`)
    /// instead of the socket peer. Only enable behind a proxy that appends to
    /// or overwrites these headers; clients can forge them otherwise.
    pub trust_forwarded_for: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            trust_forwarded_for: false,
        }
    }
}

/// Cross-origin configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Path prefix the gate applies to.
    pub api_prefix: String,

    /// Canonical application origin (e.g., "https://demos.example.com").
    /// Any request origin sharing its hostname is allowed.
    pub app_url: Option<String>,

    /// Origins allowed by exact match.
    pub allowed_origins: Vec<String>,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            api_prefix: "/api".to_string(),
            app_url: None,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            max_age_secs: 86_400,
        }
    }
}

/// Authentication configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Disable all session checks. Local and test environments only.
    pub disabled: bool,

    /// Session token -> user id.
    pub sessions: BTreeMap<String, String>,

    /// User id -> role name (`super_admin`, `operator`, `client_viewer`).
    pub roles: BTreeMap<String, String>,
}

/// A single request limit: at most `max` requests per `window_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LimitConfig {
    pub max: u32,
    pub window_ms: u64,
}

impl LimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Interval between sweeps of expired counters, in seconds.
    pub sweep_interval_secs: u64,

    /// Knowledge-base queries, keyed `kb:<ip>`.
    pub kb: LimitConfig,

    /// Agent deployments, keyed `deploy:<user or ip>`.
    pub deploy: LimitConfig,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: 60,
            kb: LimitConfig {
                max: 20,
                window_ms: 60_000,
            },
            deploy: LimitConfig {
                max: 5,
                window_ms: 60_000,
            },
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of retries after the first attempt.
    pub max_retries: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Optional ceiling on a single backoff delay in milliseconds.
    pub max_delay_ms: Option<u64>,

    /// Add up to 10% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: None,
            jitter: false,
        }
    }
}

/// Outbound targets.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Webhook that receives agent deployment payloads.
    pub deploy_webhook_url: Option<String>,

    /// Knowledge-base search service.
    pub knowledge_search_url: Option<String>,

    /// Per-attempt timeout for outbound calls in seconds.
    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            deploy_webhook_url: None,
            knowledge_search_url: None,
            request_timeout_secs: 10,
        }
    }
}

/// Timeout configuration for inbound requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 60 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
