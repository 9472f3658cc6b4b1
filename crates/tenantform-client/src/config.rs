//! Provider configuration.
//!
//! Options may be set explicitly on [`ProviderSettings`]; every option left
//! unset is read from the matching `TENANTFORM_*` environment variable.
//! Resolution is fail-fast: a missing base URL, missing credentials, or a
//! value that does not parse is reported as a [`ConfigError`].

use crate::auth::Credentials;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;
use validator::Validate;

pub const ENV_BASE_URL: &str = "TENANTFORM_BASE_URL";
pub const ENV_API_TOKEN: &str = "TENANTFORM_API_TOKEN";
pub const ENV_OAUTH_CLIENT_ID: &str = "TENANTFORM_OAUTH_CLIENT_ID";
pub const ENV_OAUTH_SCOPES: &str = "TENANTFORM_OAUTH_SCOPES";
pub const ENV_OAUTH_PRIVATE_KEY: &str = "TENANTFORM_OAUTH_PRIVATE_KEY";
pub const ENV_REQUEST_TIMEOUT: &str = "TENANTFORM_REQUEST_TIMEOUT";
pub const ENV_MAX_API_CAPACITY: &str = "TENANTFORM_MAX_API_CAPACITY";
pub const ENV_RETRY_MAX_WAIT: &str = "TENANTFORM_RETRY_MAX_WAIT";
pub const ENV_RETRY_MAX_ATTEMPTS: &str = "TENANTFORM_RETRY_MAX_ATTEMPTS";
pub const ENV_PARALLELISM: &str = "TENANTFORM_PARALLELISM";
pub const ENV_CLASSIC_ORG: &str = "TENANTFORM_CLASSIC_ORG";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_API_CAPACITY: u8 = 100;
const DEFAULT_RETRY_MAX_WAIT_SECS: u64 = 30;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_PARALLELISM: usize = 4;

/// Configuration errors that can occur while resolving settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting: {0}")]
    MissingVar(String),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

impl ConfigError {
    fn invalid(var: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            var: var.to_string(),
            message: message.into(),
        }
    }
}

/// Options as declared by the user. Every field is optional; see
/// [`ProviderConfig::with_env_fallback`].
#[derive(Clone, Default, Deserialize)]
pub struct ProviderSettings {
    pub base_url: Option<String>,
    pub api_token: Option<String>,
    pub oauth_client_id: Option<String>,
    pub oauth_scopes: Option<Vec<String>>,
    pub oauth_private_key: Option<String>,
    /// Seconds.
    pub request_timeout: Option<u64>,
    pub max_api_capacity: Option<u8>,
    /// Seconds.
    pub retry_max_wait: Option<u64>,
    pub retry_max_attempts: Option<u32>,
    pub parallelism: Option<usize>,
    pub classic_org: Option<bool>,
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("oauth_client_id", &self.oauth_client_id)
            .field("oauth_scopes", &self.oauth_scopes)
            .field(
                "oauth_private_key",
                &self.oauth_private_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("request_timeout", &self.request_timeout)
            .field("max_api_capacity", &self.max_api_capacity)
            .field("retry_max_wait", &self.retry_max_wait)
            .field("retry_max_attempts", &self.retry_max_attempts)
            .field("parallelism", &self.parallelism)
            .field("classic_org", &self.classic_org)
            .finish()
    }
}

/// Resolved, validated provider configuration.
#[derive(Debug, Clone, Validate)]
pub struct ProviderConfig {
    /// Tenant root, e.g. `https://acme.example.com`.
    pub base_url: Url,
    pub credentials: Credentials,
    /// Per-request HTTP timeout.
    pub request_timeout: Duration,
    /// Share (percent) of the remote rate-limit budget this provider may use.
    #[validate(range(min = 1, max = 100))]
    pub max_api_capacity: u8,
    /// Cap on a single backoff delay.
    pub retry_max_wait: Duration,
    #[validate(range(min = 1, max = 100))]
    pub retry_max_attempts: u32,
    /// Bound on concurrently running resource callbacks.
    #[validate(range(min = 1))]
    pub parallelism: usize,
    /// Classic tenants lack next-generation features.
    pub classic_org: bool,
}

impl ProviderConfig {
    /// Config with defaults for everything but the URL and credentials.
    #[must_use]
    pub fn new(base_url: Url, credentials: Credentials) -> Self {
        Self {
            base_url,
            credentials,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            max_api_capacity: DEFAULT_MAX_API_CAPACITY,
            retry_max_wait: Duration::from_secs(DEFAULT_RETRY_MAX_WAIT_SECS),
            retry_max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            parallelism: DEFAULT_PARALLELISM,
            classic_org: false,
        }
    }

    /// Load the configuration entirely from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::with_env_fallback(ProviderSettings::default())
    }

    /// Resolve explicit settings, reading unset options from the environment.
    pub fn with_env_fallback(settings: ProviderSettings) -> Result<Self, ConfigError> {
        Self::resolve_with(settings, |name| env::var(name).ok())
    }

    /// Resolve explicit settings, reading unset options through `lookup`.
    pub fn resolve_with<F>(settings: ProviderSettings, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |explicit: Option<String>, var: &str| {
            explicit.or_else(|| lookup(var).filter(|v| !v.trim().is_empty()))
        };

        let base_url = text(settings.base_url, ENV_BASE_URL)
            .ok_or_else(|| ConfigError::MissingVar(ENV_BASE_URL.to_string()))?;
        let base_url = Url::parse(&base_url)
            .map_err(|e| ConfigError::invalid(ENV_BASE_URL, e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ConfigError::invalid(ENV_BASE_URL, "must be an absolute http(s) URL"));
        }

        let api_token = text(settings.api_token, ENV_API_TOKEN);
        let client_id = text(settings.oauth_client_id, ENV_OAUTH_CLIENT_ID);
        let private_key = text(settings.oauth_private_key, ENV_OAUTH_PRIVATE_KEY);
        let scopes = settings.oauth_scopes.or_else(|| {
            lookup(ENV_OAUTH_SCOPES).map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
        });
        let credentials = credentials(api_token, client_id, scopes, private_key)?;

        let mut config = Self::new(base_url, credentials);
        if let Some(secs) = parsed(settings.request_timeout, &lookup, ENV_REQUEST_TIMEOUT)? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(capacity) = parsed(settings.max_api_capacity, &lookup, ENV_MAX_API_CAPACITY)? {
            config.max_api_capacity = capacity;
        }
        if let Some(secs) = parsed(settings.retry_max_wait, &lookup, ENV_RETRY_MAX_WAIT)? {
            config.retry_max_wait = Duration::from_secs(secs);
        }
        if let Some(attempts) =
            parsed(settings.retry_max_attempts, &lookup, ENV_RETRY_MAX_ATTEMPTS)?
        {
            config.retry_max_attempts = attempts;
        }
        if let Some(parallelism) = parsed(settings.parallelism, &lookup, ENV_PARALLELISM)? {
            config.parallelism = parallelism;
        }
        config.classic_org = match settings.classic_org {
            Some(flag) => flag,
            None => match lookup(ENV_CLASSIC_ORG) {
                Some(raw) => parse_bool(ENV_CLASSIC_ORG, &raw)?,
                None => false,
            },
        };

        config.check()?;
        Ok(config)
    }

    /// Range validation on an already-built config.
    pub fn check(&self) -> Result<(), ConfigError> {
        self.validate()
            .map_err(|e| ConfigError::invalid("provider configuration", e.to_string()))
    }
}

fn credentials(
    api_token: Option<String>,
    client_id: Option<String>,
    scopes: Option<Vec<String>>,
    private_key: Option<String>,
) -> Result<Credentials, ConfigError> {
    let any_oauth = client_id.is_some() || private_key.is_some();
    match (api_token, client_id, scopes, private_key) {
        (Some(_), _, _, _) if any_oauth => Err(ConfigError::invalid(
            ENV_API_TOKEN,
            "api_token and OAuth credentials are mutually exclusive",
        )),
        (Some(token), _, _, _) => Ok(Credentials::ApiToken { token }),
        (None, Some(client_id), Some(scopes), Some(private_key)) if !scopes.is_empty() => {
            Ok(Credentials::PrivateKey {
                client_id,
                scopes,
                private_key,
            })
        }
        (None, Some(_), _, Some(_)) => Err(ConfigError::MissingVar(ENV_OAUTH_SCOPES.to_string())),
        (None, Some(_), _, None) => {
            Err(ConfigError::MissingVar(ENV_OAUTH_PRIVATE_KEY.to_string()))
        }
        (None, None, _, Some(_)) => Err(ConfigError::MissingVar(ENV_OAUTH_CLIENT_ID.to_string())),
        (None, None, _, None) => Err(ConfigError::MissingVar(ENV_API_TOKEN.to_string())),
    }
}

fn parsed<T, F>(explicit: Option<T>, lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    if explicit.is_some() {
        return Ok(explicit);
    }
    match lookup(var) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(var, e.to_string())),
        _ => Ok(None),
    }
}

fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(ConfigError::invalid(var, format!("expected a boolean, got '{other}'"))),
    }
}
