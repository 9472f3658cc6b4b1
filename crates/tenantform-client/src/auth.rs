//! Tenant authentication: static API token or OAuth service app.
//!
//! The OAuth flow signs a `private_key_jwt` client assertion and exchanges it
//! for an access token at `<base_url>/oauth2/v1/token`. Tokens are cached per
//! handle and refreshed 30 seconds before they expire.

use crate::error::{ApiError, ApiResult};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

const CLIENT_ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 300;
const EXPIRY_MARGIN_SECS: u64 = 30;

/// Credentials for the management API.
///
/// The [`Debug`] impl redacts secrets.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Long-lived API token, sent as `SSWS <token>`.
    ApiToken { token: String },
    /// OAuth service app authenticating with a signed client assertion.
    PrivateKey {
        client_id: String,
        scopes: Vec<String>,
        /// PEM-encoded RSA private key.
        private_key: String,
    },
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ApiToken { .. } => f
                .debug_struct("ApiToken")
                .field("token", &"[REDACTED]")
                .finish(),
            Self::PrivateKey {
                client_id, scopes, ..
            } => f
                .debug_struct("PrivateKey")
                .field("client_id", client_id)
                .field("scopes", scopes)
                .field("private_key", &"[REDACTED]")
                .finish(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    sub: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
    jti: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Option<Instant>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }
}

/// Produces the `Authorization` header for each request.
#[derive(Debug, Clone)]
pub struct Authenticator {
    credentials: Credentials,
    token_url: Url,
    http_client: reqwest::Client,
    cached_token: Arc<RwLock<Option<CachedToken>>>,
}

impl Authenticator {
    /// Build an authenticator for the tenant rooted at `base_url`.
    pub fn new(credentials: Credentials, base_url: &Url, http_client: reqwest::Client) -> ApiResult<Self> {
        let token_url = base_url
            .join("/oauth2/v1/token")
            .map_err(|e| ApiError::InvalidConfig(format!("invalid token url: {e}")))?;
        Ok(Self {
            credentials,
            token_url,
            http_client,
            cached_token: Arc::new(RwLock::new(None)),
        })
    }

    #[must_use]
    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Header value for the next request.
    pub async fn authorization(&self) -> ApiResult<String> {
        match &self.credentials {
            Credentials::ApiToken { token } => Ok(format!("SSWS {token}")),
            Credentials::PrivateKey {
                client_id,
                scopes,
                private_key,
            } => {
                {
                    let cache = self.cached_token.read().await;
                    if let Some(cached) = cache.as_ref().filter(|c| !c.is_expired()) {
                        return Ok(format!("Bearer {}", cached.access_token));
                    }
                }
                let token = self.fetch_token(client_id, scopes, private_key).await?;
                Ok(format!("Bearer {token}"))
            }
        }
    }

    /// Attach the `Authorization` header to a request.
    pub async fn apply(&self, builder: RequestBuilder) -> ApiResult<RequestBuilder> {
        let value = self.authorization().await?;
        Ok(builder.header(reqwest::header::AUTHORIZATION, value))
    }

    /// Drop the cached access token, e.g. after a 401.
    pub async fn invalidate(&self) {
        let mut cache = self.cached_token.write().await;
        *cache = None;
    }

    fn client_assertion(&self, client_id: &str, private_key: &str) -> ApiResult<String> {
        let key = EncodingKey::from_rsa_pem(private_key.as_bytes())
            .map_err(|e| ApiError::Auth(format!("invalid private key: {e}")))?;
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: client_id,
            sub: client_id,
            aud: self.token_url.as_str(),
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ApiError::Auth(format!("failed to sign client assertion: {e}")))
    }

    async fn fetch_token(&self, client_id: &str, scopes: &[String], private_key: &str) -> ApiResult<String> {
        debug!(token_url = %self.token_url, client_id = client_id, "Requesting OAuth access token");
        let assertion = self.client_assertion(client_id, private_key)?;
        let scope = scopes.join(" ");
        let form = [
            ("grant_type", "client_credentials"),
            ("scope", scope.as_str()),
            ("client_assertion_type", CLIENT_ASSERTION_TYPE),
            ("client_assertion", assertion.as_str()),
        ];

        let response = self
            .http_client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| ApiError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            return Err(ApiError::Auth(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ApiError::Auth(format!("failed to parse token response: {e}")))?;

        let expires_at = token
            .expires_in
            .map(|secs| Instant::now() + Duration::from_secs(secs.saturating_sub(EXPIRY_MARGIN_SECS)));
        let access_token = token.access_token.clone();
        {
            let mut cache = self.cached_token.write().await;
            *cache = Some(CachedToken {
                access_token: token.access_token,
                expires_at,
            });
        }
        Ok(access_token)
    }
}
