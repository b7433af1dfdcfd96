//! Environment-driven configuration.
//!
//! Values come from the process environment, optionally seeded from a `.env`
//! file. [`MinerConfig::from_lookup`] runs the same parsing over any key lookup
//! so tests never have to mutate the real environment.

use crate::Provider;
use chrono::{FixedOffset, Offset, Utc};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Hard cap on page size accepted by every supported API.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed
    #[error("invalid value for {key}: {value:?}")]
    Invalid {
        /// Variable name
        key: String,
        /// Raw value found
        value: String,
    },

    /// A variable the requested provider needs is not set
    #[error("missing configuration: {0}")]
    Missing(String),
}

/// Top-level miner configuration
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// GitHub credentials and endpoint
    pub github: ProviderSettings,
    /// Jira credentials and endpoint
    pub jira: ProviderSettings,
    /// Stack Exchange credentials and endpoint
    pub stack_exchange: ProviderSettings,
    /// HTTP client settings
    pub http: HttpSettings,
    /// Rate-limit guard tunables
    pub guard: GuardSettings,
    /// Offset used when rendering reset times in logs
    pub display_offset: FixedOffset,
    /// Items requested per page
    pub page_size: u32,
    /// Days covered by each collection window
    pub interval_days: u32,
}

/// Credentials and base URL for one provider
#[derive(Clone, Default)]
pub struct ProviderSettings {
    /// Comma-delimited raw credential list, as configured
    pub raw_tokens: Option<String>,
    /// Companion identity (account email, access token)
    pub identity: Option<String>,
    /// API base URL without trailing slash
    pub base_url: String,
    /// Stack Exchange site parameter
    pub site: Option<String>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("raw_tokens", &self.raw_tokens.as_ref().map(|_| "<redacted>"))
            .field("identity", &self.identity.as_ref().map(|_| "<redacted>"))
            .field("base_url", &self.base_url)
            .field("site", &self.site)
            .finish()
    }
}

/// HTTP client settings
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Whole-request timeout
    pub request_timeout: Duration,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// Extra attempts after a connection failure, timeout or 5xx
    pub transient_retries: u32,
    /// Fixed delay between transient retries
    pub transient_delay: Duration,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            transient_retries: 3,
            transient_delay: Duration::from_secs(2),
        }
    }
}

/// Rate-limit guard tunables
#[derive(Debug, Clone)]
pub struct GuardSettings {
    /// Buffer added on top of `reset_at - now`
    pub safety_margin: Duration,
    /// Single extra wait when the post-reset probe still reports zero
    pub recheck_delay: Duration,
    /// Remaining quota above which an alternative credential is taken immediately
    pub min_usable_quota: u64,
    /// Wait used when an API reports exhaustion without any reset hint
    pub fallback_wait: Duration,
    /// Rate-limit recoveries allowed for a single request before giving up
    pub max_recoveries: u32,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            safety_margin: Duration::from_secs(5),
            recheck_delay: Duration::from_secs(5),
            min_usable_quota: 100,
            fallback_wait: Duration::from_secs(60),
            max_recoveries: 10,
        }
    }
}

impl MinerConfig {
    /// Load configuration from `.env` (if present) and the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a map, for tests and embedding.
    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let github = ProviderSettings {
            raw_tokens: get("GITHUB_TOKENS"),
            identity: None,
            base_url: trim_url(get("GITHUB_API_URL").unwrap_or_else(|| "https://api.github.com".into())),
            site: None,
        };

        let jira = ProviderSettings {
            raw_tokens: get("JIRA_API_TOKEN"),
            identity: get("JIRA_EMAIL"),
            base_url: trim_url(get("JIRA_BASE_URL").unwrap_or_default()),
            site: None,
        };

        let stack_exchange = ProviderSettings {
            raw_tokens: get("STACK_TOKENS"),
            identity: get("STACK_ACCESS_TOKEN"),
            base_url: trim_url(
                get("STACK_API_URL").unwrap_or_else(|| "https://api.stackexchange.com".into()),
            ),
            site: Some(get("STACK_SITE").unwrap_or_else(|| "stackoverflow".into())),
        };

        let http_defaults = HttpSettings::default();
        let http = HttpSettings {
            request_timeout: secs(&get, "MINER_HTTP_TIMEOUT_SECS", http_defaults.request_timeout)?,
            connect_timeout: secs(&get, "MINER_CONNECT_TIMEOUT_SECS", http_defaults.connect_timeout)?,
            transient_retries: parse_or(&get, "MINER_TRANSIENT_RETRIES", http_defaults.transient_retries)?,
            transient_delay: secs(&get, "MINER_TRANSIENT_DELAY_SECS", http_defaults.transient_delay)?,
        };

        let guard_defaults = GuardSettings::default();
        let guard = GuardSettings {
            safety_margin: secs(&get, "MINER_SAFETY_MARGIN_SECS", guard_defaults.safety_margin)?,
            recheck_delay: secs(&get, "MINER_RECHECK_DELAY_SECS", guard_defaults.recheck_delay)?,
            min_usable_quota: parse_or(&get, "MINER_MIN_USABLE_QUOTA", guard_defaults.min_usable_quota)?,
            fallback_wait: secs(&get, "MINER_FALLBACK_WAIT_SECS", guard_defaults.fallback_wait)?,
            max_recoveries: parse_or(&get, "MINER_MAX_RATE_LIMIT_RECOVERIES", guard_defaults.max_recoveries)?,
        };

        let offset_hours: i32 = parse_or(&get, "MINER_DISPLAY_UTC_OFFSET_HOURS", -3)?;
        let display_offset = offset_hours
            .checked_mul(3600)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| ConfigError::Invalid {
                key: "MINER_DISPLAY_UTC_OFFSET_HOURS".into(),
                value: offset_hours.to_string(),
            })?;

        let page_size: u32 = parse_or(&get, "MINER_PAGE_SIZE", MAX_PAGE_SIZE)?;
        if page_size == 0 {
            return Err(ConfigError::Invalid {
                key: "MINER_PAGE_SIZE".into(),
                value: page_size.to_string(),
            });
        }

        let interval_days: u32 = parse_or(&get, "MINER_INTERVAL_DAYS", 1)?;
        if interval_days == 0 {
            return Err(ConfigError::Invalid {
                key: "MINER_INTERVAL_DAYS".into(),
                value: interval_days.to_string(),
            });
        }

        Ok(Self {
            github,
            jira,
            stack_exchange,
            http,
            guard,
            display_offset,
            page_size: page_size.min(MAX_PAGE_SIZE),
            interval_days,
        })
    }

    /// Settings for `provider`, checked for the fields every request needs.
    ///
    /// Credential presence is checked later by [`crate::CredentialPool::load`].
    pub fn provider(&self, provider: Provider) -> Result<&ProviderSettings, ConfigError> {
        let settings = match provider {
            Provider::GitHub => &self.github,
            Provider::Jira => &self.jira,
            Provider::StackExchange => &self.stack_exchange,
        };

        if settings.base_url.is_empty() {
            return Err(ConfigError::Missing(match provider {
                Provider::Jira => "JIRA_BASE_URL".into(),
                other => format!("base URL for {other}"),
            }));
        }

        Ok(settings)
    }

    /// Environment variable holding the credential list for `provider`.
    pub fn token_variable(provider: Provider) -> &'static str {
        match provider {
            Provider::GitHub => "GITHUB_TOKENS",
            Provider::Jira => "JIRA_API_TOKEN",
            Provider::StackExchange => "STACK_TOKENS",
        }
    }
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            github: ProviderSettings {
                base_url: "https://api.github.com".into(),
                ..Default::default()
            },
            jira: ProviderSettings::default(),
            stack_exchange: ProviderSettings {
                base_url: "https://api.stackexchange.com".into(),
                site: Some("stackoverflow".into()),
                ..Default::default()
            },
            http: HttpSettings::default(),
            guard: GuardSettings::default(),
            display_offset: FixedOffset::west_opt(3 * 3600).unwrap_or_else(|| Utc.fix()),
            page_size: MAX_PAGE_SIZE,
            interval_days: 1,
        }
    }
}

fn trim_url(url: String) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            key: key.to_string(),
            value: raw,
        }),
    }
}

fn secs<G>(get: &G, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_secs()).map(Duration::from_secs)
}
