//! API handlers.
//!
//! Thin endpoints that exercise the admission-control core: each one
//! authenticates, admits through the rate limiter, and relays to a
//! third-party service through the retrying client where it has one.

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::request::{Caller, ClientIp};
use crate::http::response::ApiError;
use crate::http::server::AppState;
use crate::security::{Limit, RateLimitDecision, RateLimitKey, Role, UserId};

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub user_id: Option<UserId>,
    pub role: Role,
    pub auth_bypassed: bool,
}

#[derive(Debug, Deserialize)]
pub struct KnowledgeQuery {
    pub query: String,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default = "default_top_k")]
    pub top_k: u32,
}

fn default_top_k() -> u32 {
    5
}

#[derive(Debug, Serialize)]
pub struct KnowledgeResults {
    pub remaining: u32,
    pub results: Value,
}

#[derive(Debug, Serialize)]
struct DeployPayload<'a> {
    agent_id: &'a str,
    requested_by: Option<&'a UserId>,
    config: Value,
}

#[derive(Debug, Serialize)]
pub struct DeployAccepted {
    pub agent_id: String,
    pub upstream_status: u16,
}

#[derive(Debug, Serialize)]
pub struct AdminStatus {
    pub version: &'static str,
    pub auth_bypassed: bool,
    pub rate_limiting_enabled: bool,
    pub tracked_rate_limit_keys: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u128,
}

/// Count the request against `key` and reject once the window is full.
async fn admit(state: &AppState, key: RateLimitKey, limit: &Limit) -> Result<RateLimitDecision, ApiError> {
    let decision = state.limiter.check(&key, limit).await;
    if decision.allowed {
        Ok(decision)
    } else {
        Err(ApiError::RateLimited {
            retry_after: decision.reset_after,
        })
    }
}

fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::InvalidBody {
            status: rejection.status(),
            message: rejection.body_text(),
        })
}

pub async fn health() -> Json<HealthStatus> {
    Json(HealthStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub async fn session(State(state): State<AppState>, Caller(identity): Caller) -> Json<SessionView> {
    Json(SessionView {
        user_id: identity.user_id,
        role: identity.role,
        auth_bypassed: state.identity.bypass_enabled(),
    })
}

pub async fn knowledge_search(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Caller(identity): Caller,
    body: Result<Json<KnowledgeQuery>, JsonRejection>,
) -> Result<Json<KnowledgeResults>, ApiError> {
    let decision = admit(&state, RateLimitKey::new("kb", &ip), &state.limits.kb).await?;

    let query = json_body(body)?;
    if query.query.trim().is_empty() {
        return Err(ApiError::BadRequest("query must not be empty".into()));
    }

    let url = state
        .config
        .upstream
        .knowledge_search_url
        .as_deref()
        .ok_or(ApiError::NotConfigured("Knowledge search"))?;

    let request = state
        .upstream
        .client()
        .post(url)
        .json(&serde_json::json!({
            "query": query.query,
            "agent_id": query.agent_id,
            "top_k": query.top_k,
            "user_id": identity.user_id,
        }))
        .build()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let response = state.upstream.fetch(request).await?;
    let status = response.status();
    if !status.is_success() {
        tracing::warn!(status = %status, "Knowledge search upstream rejected query");
        return Err(ApiError::UpstreamStatus(status));
    }

    let results = response
        .json::<Value>()
        .await
        .map_err(|e| ApiError::Internal(format!("invalid knowledge search body: {e}")))?;

    Ok(Json(KnowledgeResults {
        remaining: decision.remaining,
        results,
    }))
}

pub async fn deploy_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    ClientIp(ip): ClientIp,
    Caller(identity): Caller,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<(StatusCode, Json<DeployAccepted>), ApiError> {
    identity.require_role(Role::Operator)?;

    let subject = match &identity.user_id {
        Some(user_id) => user_id.to_string(),
        None => ip,
    };
    admit(&state, RateLimitKey::new("deploy", subject), &state.limits.deploy).await?;

    let config = json_body(body)?;
    let url = state
        .config
        .upstream
        .deploy_webhook_url
        .as_deref()
        .ok_or(ApiError::NotConfigured("Deploy webhook"))?;

    let request = state
        .upstream
        .client()
        .post(url)
        .json(&DeployPayload {
            agent_id: &agent_id,
            requested_by: identity.user_id.as_ref(),
            config,
        })
        .build()
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let response = state.upstream.fetch(request).await?;
    let status = response.status();
    if !status.is_success() {
        tracing::warn!(agent_id = %agent_id, status = %status, "Deploy webhook failed");
        return Err(ApiError::UpstreamStatus(status));
    }

    tracing::info!(agent_id = %agent_id, user_id = ?identity.user_id, "Agent deployment accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(DeployAccepted {
            agent_id,
            upstream_status: status.as_u16(),
        }),
    ))
}

pub async fn admin_status(
    State(state): State<AppState>,
    Caller(identity): Caller,
) -> Result<Json<AdminStatus>, ApiError> {
    identity.require_role(Role::SuperAdmin)?;

    let policy = state.upstream.policy();
    Ok(Json(AdminStatus {
        version: env!("CARGO_PKG_VERSION"),
        auth_bypassed: state.identity.bypass_enabled(),
        rate_limiting_enabled: state.limiter.is_enabled(),
        tracked_rate_limit_keys: state.limiter.tracked_keys(),
        max_retries: policy.max_retries,
        retry_base_delay_ms: policy.base_delay.as_millis(),
    }))
}

pub async fn not_found() -> ApiError {
    ApiError::NotFound
}
