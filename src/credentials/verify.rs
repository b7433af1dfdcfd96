//! Credential verification outcomes

use super::Credential;
use async_trait::async_trait;
use serde::Serialize;

/// Result of probing one credential against its API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TokenStatus {
    /// Accepted by the API
    Valid {
        /// Remaining quota reported by the probe, if the API exposes it
        remaining: Option<u64>,
        /// Quota limit reported by the probe, if the API exposes it
        limit: Option<u64>,
    },
    /// Rejected as unknown, revoked or expired (401)
    InvalidOrExpired,
    /// Authenticated but lacking scopes for the probe (403)
    InsufficientPermissions,
    /// Anything else, including network failures during the probe
    UnknownError(String),
}

impl TokenStatus {
    /// Whether the credential may be used.
    pub fn is_valid(&self) -> bool {
        matches!(self, TokenStatus::Valid { .. })
    }

    /// Remaining quota for valid credentials.
    pub fn remaining(&self) -> Option<u64> {
        match self {
            TokenStatus::Valid { remaining, .. } => *remaining,
            _ => None,
        }
    }

    /// Short classification label for logs and CLI output.
    pub fn label(&self) -> &'static str {
        match self {
            TokenStatus::Valid { .. } => "valid",
            TokenStatus::InvalidOrExpired => "invalid or expired",
            TokenStatus::InsufficientPermissions => "insufficient permissions",
            TokenStatus::UnknownError(_) => "unknown error",
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenStatus::Valid {
                remaining: Some(remaining),
                ..
            } => write!(f, "valid ({remaining} remaining)"),
            TokenStatus::UnknownError(detail) => write!(f, "unknown error: {detail}"),
            other => f.write_str(other.label()),
        }
    }
}

/// Issues the lightweight authenticated probe for a credential.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    /// Probe `credential` and classify the outcome. Never fails: transport errors
    /// become [`TokenStatus::UnknownError`].
    async fn verify(&self, credential: &Credential) -> TokenStatus;
}
