//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (origin gate, metrics, limits, timeout, request ID, tracing)
//! - Bind server to listener and drain on shutdown
//! - Run the rate-limit sweeper alongside the server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    http::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::EdgeConfig;
use crate::http::handlers;
use crate::http::request::{request_id, MakeEdgeRequestId, X_REQUEST_ID};
use crate::lifecycle::shutdown::wait_for;
use crate::observability::metrics;
use crate::resilience::RetryingHttpClient;
use crate::security::{origin_gate_middleware, IdentityResolver, Limit, OriginGate, RateLimiter};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to build outbound HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Limits applied by individual endpoints.
#[derive(Debug, Clone, Copy)]
pub struct RouteLimits {
    pub kb: Limit,
    pub deploy: Limit,
}

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<EdgeConfig>,
    pub limiter: RateLimiter,
    pub limits: RouteLimits,
    pub identity: IdentityResolver,
    pub upstream: RetryingHttpClient,
}

impl AppState {
    /// Build every subsystem from a validated configuration.
    pub fn from_config(config: EdgeConfig) -> Result<Self, ServerError> {
        let upstream = RetryingHttpClient::from_config(&config.upstream, &config.retries)?;
        let limiter = RateLimiter::in_memory().with_enabled(config.rate_limits.enabled);
        let identity = IdentityResolver::from_config(&config.auth);
        let limits = RouteLimits {
            kb: config.rate_limits.kb.into(),
            deploy: config.rate_limits.deploy.into(),
        };

        Ok(Self {
            config: Arc::new(config),
            limiter,
            limits,
            identity,
            upstream,
        })
    }

    /// Swap in a limiter over a different counter store.
    pub fn with_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter.with_enabled(self.config.rate_limits.enabled);
        self
    }
}

/// HTTP server for the edge.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: EdgeConfig) -> Result<Self, ServerError> {
        Ok(Self::from_state(AppState::from_config(config)?))
    }

    pub fn from_state(state: AppState) -> Self {
        let router = Self::build_router(state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let config = state.config.clone();
        let gate = Arc::new(OriginGate::from_config(&config.cors));

        let api = Router::new()
            .route("/health", get(handlers::health))
            .route("/session", get(handlers::session))
            .route("/knowledge/search", post(handlers::knowledge_search))
            .route("/agents/{agent_id}/deploy", post(handlers::deploy_agent))
            .route("/admin/status", get(handlers::admin_status));

        Router::new()
            .nest(&config.cors.api_prefix, api)
            .fallback(handlers::not_found)
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
            .layer(middleware::from_fn_with_state(gate, origin_gate_middleware))
            .layer(middleware::from_fn(track_metrics))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(
                TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        path = %request.uri().path(),
                        request_id = %request_id(request.headers()),
                    )
                }),
            )
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeEdgeRequestId))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn config(&self) -> &EdgeConfig {
        &self.state.config
    }

    /// Serve on `listener` until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            api_prefix = %self.state.config.cors.api_prefix,
            auth_bypass = self.state.identity.bypass_enabled(),
            rate_limiting = self.state.limiter.is_enabled(),
            "HTTP server starting"
        );

        let sweeper = self.state.limiter.is_enabled().then(|| {
            let interval = Duration::from_secs(self.state.config.rate_limits.sweep_interval_secs);
            self.state
                .limiter
                .spawn_sweeper(interval, shutdown.resubscribe())
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(wait_for(shutdown))
            .await?;

        if let Some(sweeper) = sweeper {
            let _ = sweeper.await;
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn track_metrics(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let response = next.run(request).await;
    metrics::record_request(&method, response.status().as_u16(), start);
    response
}
