//! Bearer token authorization.
//!
//! The [`Authorizer`] turns an `Authorization` header value into an
//! [`AuthGrant`] or a uniform [`Unauthorized`] rejection.  Two credential
//! styles are understood:
//!
//! - development tokens of the form `cloudkeep-<user>`, honoured first in
//!   development mode and as the only option when no verifier is configured;
//! - JWT access tokens checked by a managed [`TokenVerifier`]
//!   (see [`jwt::JwtVerifier`]).
//!
//! Callers never learn *why* a credential was rejected; the reason is only
//! logged.

pub mod jwt;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{AuthConfig, AuthMode};

const BEARER_PREFIX: &str = "Bearer ";

/// IAM-style policy language version stamped on every grant.
pub const POLICY_VERSION: &str = "2012-10-17";

/// The single action a grant allows.
pub const INVOKE_ACTION: &str = "execute-api:Invoke";

/// Uniform rejection signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unauthorized")]
pub struct Unauthorized;

/// The resolved user identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
}

impl Principal {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
        }
    }
}

/// Identity claims extracted by a [`TokenVerifier`].
#[derive(Debug, Clone, Default)]
pub struct VerifiedClaims {
    pub sub: Option<String>,
    pub username: Option<String>,
}

impl VerifiedClaims {
    /// `sub`, falling back to `username`.
    fn identity(self) -> Option<String> {
        self.sub
            .filter(|s| !s.is_empty())
            .or(self.username.filter(|u| !u.is_empty()))
    }
}

/// Managed token verification (signature + claims).
pub trait TokenVerifier: Send + Sync + 'static {
    fn verify(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<VerifiedClaims>> + Send + '_>>;
}

// ── Grant ──────────────────────────────────────────────────────────

/// Successful authorization: principal, allow policy and context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthGrant {
    pub principal_id: String,
    pub policy_document: PolicyDocument,
    pub context: GrantContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statement: Vec<PolicyStatement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyStatement {
    #[serde(rename = "Action")]
    pub action: String,
    #[serde(rename = "Effect")]
    pub effect: String,
    #[serde(rename = "Resource")]
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantContext {
    pub user_id: String,
    /// RFC 3339 issue time.
    pub timestamp: String,
}

impl AuthGrant {
    /// Allow `principal_id` to invoke exactly `resource`.
    pub fn allow(principal_id: String, resource: &str) -> Self {
        Self {
            policy_document: PolicyDocument {
                version: POLICY_VERSION.to_string(),
                statement: vec![PolicyStatement {
                    action: INVOKE_ACTION.to_string(),
                    effect: "Allow".to_string(),
                    resource: resource.to_string(),
                }],
            },
            context: GrantContext {
                user_id: principal_id.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
            principal_id,
        }
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.principal_id.clone())
    }
}

// ── Authorizer ─────────────────────────────────────────────────────

pub struct Authorizer {
    mode: AuthMode,
    token_prefix: String,
    default_identity: String,
    verifier: Option<Arc<dyn TokenVerifier>>,
}

impl Authorizer {
    pub fn new(config: &AuthConfig, verifier: Option<Arc<dyn TokenVerifier>>) -> Self {
        Self {
            mode: config.mode,
            token_prefix: config.token_prefix.clone(),
            default_identity: config.default_identity.clone(),
            verifier,
        }
    }

    /// Resolve `credential` (the raw `Authorization` header value) into a
    /// grant scoped to `resource`.
    pub async fn authorize(
        &self,
        credential: Option<&str>,
        resource: &str,
    ) -> Result<AuthGrant, Unauthorized> {
        let credential = match credential {
            Some(c) if !c.is_empty() => c,
            _ => {
                debug!("No authorization credential for {}", resource);
                return Err(Unauthorized);
            }
        };
        let token = credential.strip_prefix(BEARER_PREFIX).unwrap_or(credential);

        if self.mode == AuthMode::Development {
            if let Some(user_id) = self.prefixed_identity(token) {
                return Ok(AuthGrant::allow(user_id, resource));
            }
        }

        match &self.verifier {
            Some(verifier) => match verifier.verify(token).await {
                Ok(claims) => match claims.identity() {
                    Some(user_id) => Ok(AuthGrant::allow(user_id, resource)),
                    None => {
                        warn!("Verified token carries neither sub nor username");
                        Err(Unauthorized)
                    }
                },
                Err(e) => {
                    warn!("Token verification failed: {e:#}");
                    Err(Unauthorized)
                }
            },
            None => match self.prefixed_identity(token) {
                Some(user_id) => Ok(AuthGrant::allow(user_id, resource)),
                None => {
                    debug!("Rejected token without the development prefix");
                    Err(Unauthorized)
                }
            },
        }
    }

    /// `cloudkeep-alice` -> `alice`; `cloudkeep-` -> the default identity.
    fn prefixed_identity(&self, token: &str) -> Option<String> {
        let suffix = token.strip_prefix(self.token_prefix.as_str())?;
        if suffix.is_empty() {
            Some(self.default_identity.clone())
        } else {
            Some(suffix.to_string())
        }
    }
}
