//! OAuth2 access tokens for the Vertex AI API.
//!
//! Service-account keys are exchanged for bearer tokens with the JWT-bearer
//! grant: we sign an RS256 assertion with the key's private key and post it to
//! the key's `token_uri`. Tokens are cached until shortly before they expire.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::credentials::ServiceAccountKey;

const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Assertions are valid for one hour, the maximum Google accepts.
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Refresh this many seconds before the reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Failures obtaining an access token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid service-account private key: {0}")]
    InvalidKey(#[source] jsonwebtoken::errors::Error),

    #[error("failed to sign token assertion: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    #[error("token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Source of bearer tokens for API calls.
#[async_trait::async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a currently valid access token.
    async fn token(&self) -> Result<String, AuthError>;
}

/// A fixed, externally issued token.
#[derive(Clone)]
pub struct StaticTokenSource {
    token: String,
}

impl std::fmt::Debug for StaticTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenSource").finish_non_exhaustive()
    }
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait::async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<String, AuthError> {
        Ok(self.token.clone())
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

/// Exchanges a service-account key for access tokens.
pub struct ServiceAccountTokenSource {
    http: reqwest::Client,
    key: ServiceAccountKey,
    signing_key: EncodingKey,
    cached: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ServiceAccountTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountTokenSource")
            .field("client_email", &self.key.client_email)
            .field("token_uri", &self.key.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountTokenSource {
    /// Parse the key's PEM private key up front so a bad key fails early.
    pub fn new(http: reqwest::Client, key: ServiceAccountKey) -> Result<Self, AuthError> {
        let signing_key =
            EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(AuthError::InvalidKey)?;
        Ok(Self {
            http,
            key,
            signing_key,
            cached: Mutex::new(None),
        })
    }

    fn assertion(&self, now: DateTime<Utc>) -> Result<String, AuthError> {
        let iat = now.timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: CLOUD_PLATFORM_SCOPE,
            aud: &self.key.token_uri,
            iat,
            exp: iat + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid.clone_from(&self.key.private_key_id);
        jsonwebtoken::encode(&header, &claims, &self.signing_key).map_err(AuthError::Signing)
    }

    async fn fetch(&self, now: DateTime<Utc>) -> Result<CachedToken, AuthError> {
        let assertion = self.assertion(now)?;
        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = resp.json().await?;
        tracing::debug!(
            client_email = %self.key.client_email,
            expires_in = body.expires_in,
            "Access token refreshed"
        );

        Ok(CachedToken {
            value: body.access_token,
            expires_at: now + chrono::Duration::seconds(body.expires_in),
        })
    }
}

#[async_trait::async_trait]
impl TokenSource for ServiceAccountTokenSource {
    async fn token(&self) -> Result<String, AuthError> {
        let mut guard = self.cached.lock().await;
        let now = Utc::now();
        if let Some(cached) = guard.as_ref().filter(|t| t.is_fresh(now)) {
            return Ok(cached.value.clone());
        }

        let fresh = self.fetch(now).await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let source = StaticTokenSource::new("ya29.test");
        assert_eq!(source.token().await.unwrap(), "ya29.test");
        assert!(!format!("{source:?}").contains("ya29"));
    }

    #[test]
    fn test_cached_token_freshness() {
        let now = Utc::now();
        let fresh = CachedToken {
            value: "a".into(),
            expires_at: now + chrono::Duration::seconds(600),
        };
        assert!(fresh.is_fresh(now));

        let nearly_expired = CachedToken {
            value: "b".into(),
            expires_at: now + chrono::Duration::seconds(30),
        };
        assert!(!nearly_expired.is_fresh(now));
    }

    #[test]
    fn test_invalid_private_key_rejected() {
        let key = ServiceAccountKey {
            client_email: "bot@example.iam.gserviceaccount.com".into(),
            private_key: "not a pem".into(),
            private_key_id: None,
            token_uri: "https://oauth2.googleapis.com/token".into(),
            project_id: None,
        };
        let err = ServiceAccountTokenSource::new(reqwest::Client::new(), key).unwrap_err();
        assert!(matches!(err, AuthError::InvalidKey(_)));
    }
}
