//! Caller identity and role resolution.
//!
//! # Responsibilities
//! - Resolve the caller's user id from session state
//! - Reject unauthenticated callers of protected endpoints
//! - Look up the caller's role, defaulting to the least-privileged
//!   operational role
//!
//! # Design Decisions
//! - Resolved fresh on every request; nothing is cached across requests
//! - A global bypass skips session checks for local/test deployments
//! - Role lookup never falls back to `super_admin`

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::AuthConfig;
use crate::observability::metrics;

/// Name of the cookie carrying a session token.
pub const SESSION_COOKIE: &str = "session";

/// Opaque user identifier issued by the session store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Operator console roles, most privileged first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    #[default]
    Operator,
    ClientViewer,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Operator => "operator",
            Role::ClientViewer => "client_viewer",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Role::SuperAdmin => 2,
            Role::Operator => 1,
            Role::ClientViewer => 0,
        }
    }

    /// Whether this role grants at least the privileges of `required`.
    pub fn satisfies(self, required: Role) -> bool {
        self.rank() >= required.rank()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unrecognized role {0:?}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "super_admin" => Ok(Role::SuperAdmin),
            "operator" => Ok(Role::Operator),
            "client_viewer" => Ok(Role::ClientViewer),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Result of a successful auth check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// `None` only when auth is bypassed.
    pub user_id: Option<UserId>,
}

/// A caller with a resolved role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub user_id: Option<UserId>,
    pub role: Role,
}

impl Identity {
    pub fn require_role(&self, required: Role) -> Result<(), AuthRejection> {
        if self.role.satisfies(required) {
            Ok(())
        } else {
            tracing::warn!(
                user_id = ?self.user_id,
                role = %self.role,
                required = %required,
                "Insufficient role"
            );
            metrics::record_auth_rejection("forbidden");
            Err(AuthRejection::Forbidden)
        }
    }
}

/// Why a protected endpoint refused the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Forbidden")]
    Forbidden,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session store unavailable: {0}")]
    Unavailable(String),
}

/// Resolves request credentials to a user id.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// `Ok(None)` means no valid session.
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<UserId>, SessionError>;
}

/// Looks up the raw role value stored on a user's profile.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn role_of(&self, user_id: &UserId) -> Result<Option<String>, SessionError>;
}

/// Session tokens configured up front, presented as a bearer token or a
/// `session` cookie.
#[derive(Debug, Clone, Default)]
pub struct StaticSessionStore {
    tokens: BTreeMap<String, UserId>,
}

impl StaticSessionStore {
    pub fn new(tokens: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            tokens: tokens
                .into_iter()
                .map(|(token, user)| (token, UserId::new(user)))
                .collect(),
        }
    }
}

#[async_trait]
impl SessionStore for StaticSessionStore {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Option<UserId>, SessionError> {
        Ok(session_token(headers).and_then(|token| self.tokens.get(token).cloned()))
    }
}

/// Roles configured up front.
#[derive(Debug, Clone, Default)]
pub struct StaticProfileStore {
    roles: BTreeMap<UserId, String>,
}

impl StaticProfileStore {
    pub fn new(roles: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            roles: roles
                .into_iter()
                .map(|(user, role)| (UserId::new(user), role))
                .collect(),
        }
    }
}

#[async_trait]
impl ProfileStore for StaticProfileStore {
    async fn role_of(&self, user_id: &UserId) -> Result<Option<String>, SessionError> {
        Ok(self.roles.get(user_id).cloned())
    }
}

/// Bearer token first, then the session cookie.
pub fn session_token(headers: &HeaderMap) -> Option<&str> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim())
        .filter(|t| !t.is_empty())
}

/// Auth gate for protected endpoints.
#[derive(Clone)]
pub struct IdentityResolver {
    bypass: bool,
    sessions: Arc<dyn SessionStore>,
    profiles: Arc<dyn ProfileStore>,
}

impl fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("bypass", &self.bypass)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    pub fn new(bypass: bool, sessions: Arc<dyn SessionStore>, profiles: Arc<dyn ProfileStore>) -> Self {
        Self {
            bypass,
            sessions,
            profiles,
        }
    }

    /// Resolver backed by the static stores in `config`.
    pub fn from_config(config: &AuthConfig) -> Self {
        if config.disabled {
            tracing::warn!("Authentication is DISABLED; every caller is treated as an operator");
        }
        Self::new(
            config.disabled,
            Arc::new(StaticSessionStore::new(config.sessions.clone())),
            Arc::new(StaticProfileStore::new(config.roles.clone())),
        )
    }

    pub fn bypass_enabled(&self) -> bool {
        self.bypass
    }

    /// Succeeds with the caller's user id, or with no user id when bypassed.
    pub async fn require_auth(&self, headers: &HeaderMap) -> Result<AuthContext, AuthRejection> {
        if self.bypass {
            return Ok(AuthContext { user_id: None });
        }

        match self.sessions.resolve(headers).await {
            Ok(Some(user_id)) => Ok(AuthContext {
                user_id: Some(user_id),
            }),
            Ok(None) => {
                tracing::debug!("No valid session");
                metrics::record_auth_rejection("unauthenticated");
                Err(AuthRejection::Unauthenticated)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session lookup failed, rejecting caller");
                metrics::record_auth_rejection("session_error");
                Err(AuthRejection::Unauthenticated)
            }
        }
    }

    /// The user's role; unknown users, lookup failures and unrecognized
    /// values all yield [`Role::Operator`].
    pub async fn profile_role(&self, user_id: &UserId) -> Role {
        match self.profiles.role_of(user_id).await {
            Ok(Some(raw)) => raw.parse().unwrap_or_else(|e: UnknownRole| {
                tracing::warn!(user_id = %user_id, error = %e, "Defaulting to operator");
                Role::default()
            }),
            Ok(None) => Role::default(),
            Err(e) => {
                tracing::warn!(user_id = %user_id, error = %e, "Role lookup failed, defaulting to operator");
                Role::default()
            }
        }
    }

    /// [`require_auth`](Self::require_auth) followed by role lookup.
    pub async fn identity(&self, headers: &HeaderMap) -> Result<Identity, AuthRejection> {
        let ctx = self.require_auth(headers).await?;
        let role = match &ctx.user_id {
            Some(user_id) => self.profile_role(user_id).await,
            None => Role::default(),
        };
        Ok(Identity {
            user_id: ctx.user_id,
            role,
        })
    }
}
