//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits > 0, windows > 0)
//! - Validate origins and URLs parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: EdgeConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::{EdgeConfig, LimitConfig};

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: limit max must be at least 1")]
    ZeroLimit { field: &'static str },
    #[error("{field}: window_ms must be greater than 0")]
    ZeroWindow { field: &'static str },
    #[error("{field}: invalid URL {value:?}")]
    InvalidUrl { field: &'static str, value: String },
    #[error("cors.allowed_origins: {value:?} is not a bare origin")]
    InvalidOrigin { value: String },
    #[error("cors.api_prefix must be a non-root path without a trailing slash, like \"/api\"")]
    InvalidApiPrefix,
    #[error("{field}: invalid socket address {value:?}")]
    InvalidAddress { field: &'static str, value: String },
    #[error("{field} must be greater than 0")]
    ZeroDuration { field: &'static str },
}

/// Check a parsed configuration for semantic errors.
pub fn validate_config(config: &EdgeConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    let prefix = &config.cors.api_prefix;
    if !prefix.starts_with('/') || prefix.ends_with('/') {
        errors.push(ValidationError::InvalidApiPrefix);
    }

    if let Some(app_url) = &config.cors.app_url {
        let has_host = Url::parse(app_url)
            .map(|url| url.host_str().is_some())
            .unwrap_or(false);
        if !has_host {
            errors.push(ValidationError::InvalidUrl {
                field: "cors.app_url",
                value: app_url.clone(),
            });
        }
    }

    for origin in &config.cors.allowed_origins {
        if !is_bare_origin(origin) {
            errors.push(ValidationError::InvalidOrigin {
                value: origin.clone(),
            });
        }
    }

    check_limit("rate_limits.kb", &config.rate_limits.kb, &mut errors);
    check_limit("rate_limits.deploy", &config.rate_limits.deploy, &mut errors);
    if config.rate_limits.sweep_interval_secs == 0 {
        errors.push(ValidationError::ZeroDuration {
            field: "rate_limits.sweep_interval_secs",
        });
    }

    let upstream_urls = [
        ("upstream.deploy_webhook_url", &config.upstream.deploy_webhook_url),
        ("upstream.knowledge_search_url", &config.upstream.knowledge_search_url),
    ];
    for (field, url) in upstream_urls {
        if let Some(url) = url {
            if Url::parse(url).is_err() {
                errors.push(ValidationError::InvalidUrl {
                    field,
                    value: url.clone(),
                });
            }
        }
    }
    if config.upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::ZeroDuration {
            field: "upstream.request_timeout_secs",
        });
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::ZeroDuration {
            field: "timeouts.request_secs",
        });
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_limit(field: &'static str, limit: &LimitConfig, errors: &mut Vec<ValidationError>) {
    if limit.max == 0 {
        errors.push(ValidationError::ZeroLimit { field });
    }
    if limit.window_ms == 0 {
        errors.push(ValidationError::ZeroWindow { field });
    }
}

/// An origin is `scheme://host[:port]` with nothing after it.
fn is_bare_origin(value: &str) -> bool {
    match Url::parse(value) {
        Ok(url) => {
            url.host_str().is_some()
                && url.path() == "/"
                && url.query().is_none()
                && url.fragment().is_none()
                && !value.ends_with('/')
        }
        Err(_) => false,
    }
}
