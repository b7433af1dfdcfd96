//! Credential pools
//!
//! A [`CredentialPool`] is built once per job from a delimited credential list,
//! verified up front, and then owned by that job's fetcher. Pool membership never
//! changes after load; the active index moves, and a credential that fails
//! verification or is rejected mid-run is never rotated back onto.

use crate::config::{MinerConfig, ProviderSettings};
use crate::Provider;
use std::fmt;
use tracing::{debug, info, warn};

pub mod verify;

pub use verify::{CredentialVerifier, TokenStatus};

/// Delimiter between credentials in configuration values.
pub const CREDENTIAL_DELIMITER: char = ',';

/// Credential errors
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// Credential configuration is missing or incomplete
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Every configured credential failed verification
    #[error("no valid credential among {attempted} configured: {details}")]
    NoValidCredential {
        /// Number of credentials probed
        attempted: usize,
        /// Per-credential classification summary
        details: String,
    },
}

/// An opaque API secret and its position in the pool
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    index: usize,
    secret: String,
    identity: Option<String>,
}

impl Credential {
    /// Position in the pool.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw secret, for request signing only.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    /// Companion identity shared by every credential in the pool.
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Secret with everything but the last four characters hidden.
    pub fn masked(&self) -> String {
        let tail: String = self
            .secret
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        if self.secret.chars().count() <= 4 {
            "****".to_string()
        } else {
            format!("****{tail}")
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("index", &self.index)
            .field("secret", &self.masked())
            .field("identity", &self.identity.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// Outcome of [`CredentialPool::rotate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rotation {
    /// Active index moved from `from` to `to`
    Switched {
        /// Previous active index
        from: usize,
        /// New active index
        to: usize,
    },
    /// No other usable credential to rotate to
    NoAlternative,
}

/// Ordered, immutable set of credentials with one active entry
#[derive(Debug, Clone)]
pub struct CredentialPool {
    credentials: Vec<Credential>,
    usable: Vec<bool>,
    active: usize,
}

impl CredentialPool {
    /// Parse a delimited credential list.
    ///
    /// # Errors
    ///
    /// [`CredentialError::Configuration`] if the list has no non-blank entry, or if
    /// `identity_required` is set and `identity` is absent or blank.
    pub fn load(
        raw: Option<&str>,
        identity: Option<&str>,
        identity_required: bool,
    ) -> Result<Self, CredentialError> {
        let identity = identity.map(str::trim).filter(|s| !s.is_empty());
        if identity_required && identity.is_none() {
            return Err(CredentialError::Configuration(
                "credentials require a companion identity (account email) but none is configured"
                    .to_string(),
            ));
        }

        let credentials: Vec<Credential> = raw
            .unwrap_or_default()
            .split(CREDENTIAL_DELIMITER)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
            .map(|(index, secret)| Credential {
                index,
                secret: secret.to_string(),
                identity: identity.map(str::to_string),
            })
            .collect();

        if credentials.is_empty() {
            return Err(CredentialError::Configuration(
                "credential list is empty".to_string(),
            ));
        }

        debug!(count = credentials.len(), "Loaded credential pool");
        Ok(Self {
            usable: vec![true; credentials.len()],
            credentials,
            active: 0,
        })
    }

    /// Build the pool for `provider` from loaded configuration.
    pub fn for_provider(
        provider: Provider,
        settings: &ProviderSettings,
    ) -> Result<Self, CredentialError> {
        Self::load(
            settings.raw_tokens.as_deref(),
            settings.identity.as_deref(),
            provider.requires_identity(),
        )
        .map_err(|e| match e {
            CredentialError::Configuration(msg) => CredentialError::Configuration(format!(
                "{provider}: {msg} (set {})",
                MinerConfig::token_variable(provider)
            )),
            other => other,
        })
    }

    /// Number of credentials.
    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    /// Always false: a loaded pool holds at least one credential.
    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    /// Active credential.
    pub fn current(&self) -> &Credential {
        &self.credentials[self.active]
    }

    /// Active index.
    pub fn active_index(&self) -> usize {
        self.active
    }

    /// Credential at `index`.
    pub fn get(&self, index: usize) -> Option<&Credential> {
        self.credentials.get(index)
    }

    /// All credentials in pool order.
    pub fn iter(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.iter()
    }

    /// Whether any usable credential besides the active one exists.
    pub fn has_alternative(&self) -> bool {
        !self.others().is_empty()
    }

    /// Whether the credential at `index` passed verification and has not been
    /// rejected since.
    pub fn is_usable(&self, index: usize) -> bool {
        self.usable.get(index).copied().unwrap_or(false)
    }

    /// Number of usable credentials.
    pub fn usable_count(&self) -> usize {
        self.usable.iter().filter(|u| **u).count()
    }

    /// Take the credential at `index` out of rotation for the rest of the run.
    pub fn mark_rejected(&mut self, index: usize) {
        if !self.is_usable(index) {
            return;
        }
        self.usable[index] = false;
        warn!(
            credential = index,
            usable = self.usable_count(),
            "Credential rejected, removed from rotation"
        );
    }

    /// Advance the active index circularly to the next usable credential.
    pub fn rotate(&mut self) -> Rotation {
        let Some(&to) = self.others().first() else {
            return Rotation::NoAlternative;
        };
        let from = self.active;
        self.active = to;
        debug!(from, to, "Rotated credential");
        Rotation::Switched { from, to }
    }

    /// Make `index` the active credential. Returns false if out of range.
    pub fn select(&mut self, index: usize) -> bool {
        if index >= self.credentials.len() {
            return false;
        }
        self.active = index;
        true
    }

    /// Indices of every usable non-active credential, in circular order after
    /// the active one.
    pub fn others(&self) -> Vec<usize> {
        let n = self.credentials.len();
        (1..n)
            .map(|offset| (self.active + offset) % n)
            .filter(|&index| self.usable[index])
            .collect()
    }

    /// Verify every credential once and activate the valid one with the most
    /// remaining quota (first in pool order wins ties).
    ///
    /// Returns each credential's classification in pool order.
    ///
    /// # Errors
    ///
    /// [`CredentialError::NoValidCredential`] when nothing verifies as valid.
    pub async fn initialize(
        &mut self,
        verifier: &dyn CredentialVerifier,
    ) -> Result<Vec<TokenStatus>, CredentialError> {
        let mut statuses = Vec::with_capacity(self.credentials.len());
        for credential in &self.credentials {
            let status = verifier.verify(credential).await;
            if status.is_valid() {
                debug!(credential = credential.index, %status, "Credential verified");
            } else {
                warn!(credential = credential.index, %status, "Credential failed verification");
            }
            statuses.push(status);
        }
        self.usable = statuses.iter().map(TokenStatus::is_valid).collect();

        let mut best: Option<(usize, u64)> = None;
        for (index, status) in statuses.iter().enumerate() {
            if !status.is_valid() {
                continue;
            }
            let remaining = status.remaining().unwrap_or(0);
            match best {
                Some((_, best_remaining)) if remaining <= best_remaining => {}
                _ => best = Some((index, remaining)),
            }
        }

        let Some((index, remaining)) = best else {
            let details = statuses
                .iter()
                .enumerate()
                .map(|(i, s)| format!("#{i}: {}", s.label()))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(CredentialError::NoValidCredential {
                attempted: statuses.len(),
                details,
            });
        };

        self.active = index;
        info!(
            credential = index,
            remaining,
            valid = statuses.iter().filter(|s| s.is_valid()).count(),
            total = statuses.len(),
            "Selected initial credential"
        );
        Ok(statuses)
    }
}
