//! Resolved credentials and cached token state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tokens expiring within this window are treated as already expired.
const EXPIRY_SKEW_MINUTES: i64 = 5;

/// A resolved authorization artifact, ready to become an `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// `Bearer <token>`
    Bearer(String),
    /// `Basic <base64 credentials>`
    Basic(String),
}

impl Credential {
    /// Render the `Authorization` header value.
    pub fn header_value(&self) -> String {
        match self {
            Credential::Bearer(token) => format!("Bearer {}", token),
            Credential::Basic(encoded) => format!("Basic {}", encoded),
        }
    }
}

/// How often a resolver re-acquires its credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Same value on every request
    Static,
    /// Acquired again before every request
    PerRequest,
    /// Cached and re-acquired once expired
    OnExpiry,
}

/// OAuth2 access token with optional refresh token and expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenCredentials {
    /// The access token for API requests
    pub access_token: String,

    /// The refresh token for obtaining new access tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Token type (usually "Bearer")
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// When the access token expires
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenCredentials {
    /// Create credentials from a token response
    pub fn new(
        access_token: String,
        refresh_token: Option<String>,
        expires_in_secs: Option<i64>,
    ) -> Self {
        let expires_at = expires_in_secs.map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Self {
            access_token,
            refresh_token,
            token_type: default_token_type(),
            expires_at,
        }
    }

    /// True if the token expires within the skew window.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires) => Utc::now() + chrono::Duration::minutes(EXPIRY_SKEW_MINUTES) >= expires,
            None => false,
        }
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }
}
