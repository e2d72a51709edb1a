//! Cross-origin access control for the API namespace.
//!
//! # Responsibilities
//! - Decide whether a request `Origin` is allowed
//! - Answer preflight (`OPTIONS`) requests without reaching a handler
//! - Attach access-control headers to API responses
//!
//! # Design Decisions
//! - Only paths under the API prefix are touched; everything else passes
//!   through untouched
//! - A rejected origin never fails the request, it only omits the echo
//! - Malformed origins are treated as untrusted

use std::collections::HashSet;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use url::Url;

use crate::config::CorsConfig;
use crate::observability::metrics;

pub const ALLOW_METHODS: &str = "GET, POST, PATCH, DELETE, OPTIONS";
pub const ALLOW_HEADERS: &str = "Content-Type, Authorization";

/// Exact-match origins plus the canonical app hostname.
#[derive(Debug, Clone, Default)]
pub struct OriginAllowList {
    exact: HashSet<String>,
    app_hostname: Option<String>,
}

impl OriginAllowList {
    pub fn new<I, S>(origins: I, app_url: Option<&str>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let app_hostname = app_url.and_then(|url| match hostname_of(url) {
            Some(host) => Some(host),
            None => {
                tracing::warn!(app_url = %url, "Canonical app URL has no hostname, dynamic origin rule disabled");
                None
            }
        });

        Self {
            exact: origins.into_iter().map(Into::into).collect(),
            app_hostname,
        }
    }

    pub fn from_config(config: &CorsConfig) -> Self {
        Self::new(config.allowed_origins.iter().cloned(), config.app_url.as_deref())
    }

    /// An origin is allowed if it is listed verbatim or its hostname is the
    /// canonical app hostname.
    pub fn is_allowed(&self, origin: &str) -> bool {
        if self.exact.contains(origin) {
            return true;
        }

        match (&self.app_hostname, hostname_of(origin)) {
            (Some(app), Some(host)) => *app == host,
            _ => false,
        }
    }
}

fn hostname_of(value: &str) -> Option<String> {
    Url::parse(value)
        .ok()
        .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
}

/// Stateless CORS policy applied to the API namespace.
#[derive(Debug, Clone)]
pub struct OriginGate {
    prefix: String,
    allow_list: OriginAllowList,
    max_age: HeaderValue,
}

impl OriginGate {
    pub fn new(prefix: impl Into<String>, allow_list: OriginAllowList, max_age_secs: u64) -> Self {
        Self {
            prefix: prefix.into(),
            allow_list,
            max_age: HeaderValue::from(max_age_secs),
        }
    }

    pub fn from_config(config: &CorsConfig) -> Self {
        Self::new(
            config.api_prefix.clone(),
            OriginAllowList::from_config(config),
            config.max_age_secs,
        )
    }

    /// Whether `path` falls under the API prefix (`/api` or `/api/...`).
    pub fn covers(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    /// The request origin, if present, well-formed and allowed.
    pub fn allowed_origin(&self, headers: &HeaderMap) -> Option<HeaderValue> {
        let value = headers.get(header::ORIGIN)?;
        let origin = value.to_str().ok()?;
        self.allow_list.is_allowed(origin).then(|| value.clone())
    }

    /// Write the access-control headers onto a response.
    ///
    /// `Vary: Origin` goes on every response, echoed or not, since the
    /// headers differ per origin.
    pub fn apply_headers(&self, headers: &mut HeaderMap, allowed_origin: Option<HeaderValue>) {
        if let Some(origin) = allowed_origin {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(ALLOW_HEADERS),
        );
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, self.max_age.clone());
    }

    /// Empty 204 carrying the access-control headers.
    pub fn preflight_response(&self, allowed_origin: Option<HeaderValue>) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        self.apply_headers(response.headers_mut(), allowed_origin);
        response
    }
}

/// Middleware applying [`OriginGate`] ahead of every handler.
pub async fn origin_gate_middleware(
    State(gate): State<Arc<OriginGate>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !gate.covers(request.uri().path()) {
        return next.run(request).await;
    }

    let allowed_origin = gate.allowed_origin(request.headers());

    if request.method() == Method::OPTIONS {
        tracing::debug!(
            path = %request.uri().path(),
            origin_allowed = allowed_origin.is_some(),
            "Answering preflight"
        );
        metrics::record_preflight(allowed_origin.is_some());
        return gate.preflight_response(allowed_origin);
    }

    if allowed_origin.is_none() && request.headers().contains_key(header::ORIGIN) {
        tracing::debug!(
            origin = ?request.headers().get(header::ORIGIN),
            "Origin not allowed, omitting CORS approval"
        );
    }

    let mut response = next.run(request).await;
    gate.apply_headers(response.headers_mut(), allowed_origin);
    response
}
