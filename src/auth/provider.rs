//! Token sources - pluggable credential acquisition
//!
//! A [`TokenSource`] knows how to obtain a bearer token, basic credentials,
//! or a full token with expiry. Resolvers decide when to call it.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use crate::Result;
use crate::error::Error;
use super::credentials::TokenCredentials;

/// Pluggable token-acquisition capability
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Obtain a token with optional expiry. `previous` is the last cached
    /// token, offered so sources can use its refresh token.
    async fn fetch_token(&self, previous: Option<&TokenCredentials>) -> Result<TokenCredentials>;

    /// Obtain a bearer token for a single request.
    async fn bearer_token(&self) -> Result<String> {
        Ok(self.fetch_token(None).await?.access_token)
    }

    /// Obtain base64-encoded basic credentials.
    async fn basic_credentials(&self) -> Result<String> {
        Err(Error::Auth("Token source does not provide basic credentials".to_string()))
    }
}

/// Token source returning fixed, pre-provisioned values
#[derive(Debug, Clone, Default)]
pub struct StaticTokenSource {
    token: Option<String>,
    basic: Option<String>,
}

impl StaticTokenSource {
    pub fn bearer(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            basic: None,
        }
    }

    /// Basic credentials that are already base64-encoded
    pub fn basic(encoded: impl Into<String>) -> Self {
        Self {
            token: None,
            basic: Some(encoded.into()),
        }
    }

    /// Basic credentials built from a username and password
    pub fn basic_from_pair(user: &str, password: &str) -> Self {
        Self::basic(encode_basic(user, password))
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch_token(&self, _previous: Option<&TokenCredentials>) -> Result<TokenCredentials> {
        let token = self
            .token
            .clone()
            .ok_or_else(|| Error::Auth("No bearer token configured".to_string()))?;
        Ok(TokenCredentials::new(token, None, None))
    }

    async fn basic_credentials(&self) -> Result<String> {
        self.basic
            .clone()
            .ok_or_else(|| Error::Auth("No basic credentials configured".to_string()))
    }
}

/// OAuth2 token response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

/// Client credentials grant request
#[derive(Debug, Serialize)]
struct ClientCredentialsRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a str>,
}

/// Token refresh request
#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    grant_type: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

/// OAuth2 token source using the client credentials grant
///
/// Refreshes with the refresh token when one was issued, falling back to a
/// fresh client credentials grant if the refresh is rejected.
#[derive(Clone)]
pub struct OAuthTokenSource {
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: Option<String>,
    http_client: Client,
}

impl OAuthTokenSource {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scope: None,
            http_client: Client::new(),
        }
    }

    pub fn with_scope(mut self, scope: Option<String>) -> Self {
        self.scope = scope;
        self
    }

    async fn request_token<T: Serialize + ?Sized>(&self, form: &T, what: &str) -> Result<TokenResponse> {
        let response = self
            .http_client
            .post(&self.token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("{} request failed: {}", what, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(Error::Auth(format!("{} failed ({}): {}", what, status, error_text)));
        }

        response
            .json()
            .await
            .map_err(|e| Error::Auth(format!("Invalid {} response: {}", what, e)))
    }

    async fn client_credentials_grant(&self) -> Result<TokenCredentials> {
        let request = ClientCredentialsRequest {
            grant_type: "client_credentials",
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            scope: self.scope.as_deref(),
        };

        let token = self.request_token(&request, "Token request").await?;
        Ok(TokenCredentials::new(token.access_token, token.refresh_token, token.expires_in))
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenCredentials> {
        let request = RefreshRequest {
            grant_type: "refresh_token",
            client_id: &self.client_id,
            client_secret: &self.client_secret,
            refresh_token,
        };

        let token = self.request_token(&request, "Token refresh").await?;

        // Preserve the refresh token if not returned in response
        let refresh = token.refresh_token.or_else(|| Some(refresh_token.to_string()));
        Ok(TokenCredentials::new(token.access_token, refresh, token.expires_in))
    }
}

#[async_trait]
impl TokenSource for OAuthTokenSource {
    async fn fetch_token(&self, previous: Option<&TokenCredentials>) -> Result<TokenCredentials> {
        if let Some(refresh_token) = previous.and_then(|p| p.refresh_token.as_deref()) {
            tracing::info!("Access token expired, refreshing");
            match self.refresh(refresh_token).await {
                Ok(creds) => return Ok(creds),
                Err(e) => tracing::warn!("Token refresh failed: {}, requesting a new token", e),
            }
        }

        tracing::debug!("Requesting access token from {}", self.token_url);
        self.client_credentials_grant().await
    }

    async fn basic_credentials(&self) -> Result<String> {
        Ok(encode_basic(&self.client_id, &self.client_secret))
    }
}

/// Base64-encode `user:password` for a basic `Authorization` header
pub fn encode_basic(user: &str, password: &str) -> String {
    STANDARD.encode(format!("{}:{}", user, password))
}
