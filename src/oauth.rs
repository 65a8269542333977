//! Service-account access tokens for the Sheets API
//!
//! A signed RS256 assertion is exchanged at the OAuth2 token endpoint using
//! the JWT bearer grant. Tokens are cached until shortly before they expire.

use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tokio::sync::Mutex;

pub const SPREADSHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECS: i64 = 3600;
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Failed to read service account key: {0}")]
    KeyFile(#[from] std::io::Error),

    #[error("Malformed service account key: {0}")]
    KeyFormat(#[from] serde_json::Error),

    #[error("Service account email missing from configuration and key file")]
    MissingEmail,

    #[error("Neither an access token nor a service account key is configured")]
    MissingCredentials,

    #[error("Failed to sign assertion: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    #[error("Token request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Get access token. HTTP error! status: {0}")]
    Rejected(u16),
}

#[derive(Deserialize)]
struct ServiceAccountKey {
    private_key: String,
    #[serde(default)]
    client_email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_TTL_SECS
}

struct CachedToken {
    value: String,
    expires_at: i64,
}

/// Mints access tokens for a Google service account
pub struct ServiceAccount {
    email: String,
    encoding_key: EncodingKey,
    token_url: String,
    http: reqwest::Client,
    cache: Mutex<Option<CachedToken>>,
}

impl ServiceAccount {
    /// Load the private key from a service-account JSON file. `email`
    /// overrides the key file's `client_email`.
    pub fn from_key_file(
        email: Option<String>,
        key_path: &Path,
        http: reqwest::Client,
    ) -> Result<Self, OAuthError> {
        let key: ServiceAccountKey = serde_json::from_str(&fs::read_to_string(key_path)?)?;
        let email = email.or(key.client_email).ok_or(OAuthError::MissingEmail)?;
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())?;

        Ok(Self {
            email,
            encoding_key,
            token_url: TOKEN_URL.to_string(),
            http,
            cache: Mutex::new(None),
        })
    }

    /// Point the token exchange at another endpoint.
    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    /// Signed assertion issued at `now` (unix seconds)
    pub fn assertion(&self, now: i64) -> Result<String, OAuthError> {
        let claims = AssertionClaims {
            iss: self.email.clone(),
            scope: SPREADSHEETS_SCOPE.to_string(),
            aud: TOKEN_URL.to_string(),
            exp: now + ASSERTION_TTL_SECS,
            iat: now,
        };
        Ok(encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)?)
    }

    pub async fn access_token(&self) -> Result<String, OAuthError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now().timestamp();

        if let Some(token) = cache.as_ref() {
            if token.expires_at - REFRESH_MARGIN_SECS > now {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting access token for {}", self.email);
        let assertion = self.assertion(now)?;
        let response = self
            .http
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(OAuthError::Rejected(response.status().as_u16()));
        }

        let body: TokenResponse = response.json().await?;
        *cache = Some(CachedToken {
            value: body.access_token.clone(),
            expires_at: now + body.expires_in,
        });
        Ok(body.access_token)
    }
}

/// Where bearer tokens for the Sheets API come from
pub enum TokenSource {
    Static(String),
    ServiceAccount(ServiceAccount),
}

impl TokenSource {
    pub async fn access_token(&self) -> Result<String, OAuthError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::ServiceAccount(account) => account.access_token().await,
        }
    }
}
