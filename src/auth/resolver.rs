//! Credential resolvers - one per authentication mode

use std::sync::Arc;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use tokio::sync::{Mutex, OnceCell};
use crate::Result;
use crate::error::Error;
use super::credentials::{Credential, Freshness, TokenCredentials};
use super::provider::TokenSource;

/// Attaches credentials to outbound requests.
///
/// The provider client only ever calls [`CredentialResolver::apply`], so it
/// never needs to know which mode is active.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    /// Resolve the credential for the next request, if any.
    async fn credential(&self) -> Result<Option<Credential>>;

    fn freshness(&self) -> Freshness;

    /// Return `request` with its `Authorization` header set.
    async fn apply(&self, mut request: Request) -> Result<Request> {
        if let Some(credential) = self.credential().await? {
            let mut value = HeaderValue::from_str(&credential.header_value())
                .map_err(|e| Error::Auth(format!("Invalid authorization header value: {}", e)))?;
            value.set_sensitive(true);
            request.headers_mut().insert(AUTHORIZATION, value);
        }
        Ok(request)
    }
}

/// Fixed API key or bearer token. An empty resolver sends no header.
#[derive(Debug, Clone, Default)]
pub struct StaticKeyResolver {
    credential: Option<Credential>,
}

impl StaticKeyResolver {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            credential: api_key.filter(|k| !k.is_empty()).map(Credential::Bearer),
        }
    }
}

#[async_trait]
impl CredentialResolver for StaticKeyResolver {
    async fn credential(&self) -> Result<Option<Credential>> {
        Ok(self.credential.clone())
    }

    fn freshness(&self) -> Freshness {
        Freshness::Static
    }
}

/// SSO: a new bearer token is acquired before every request.
pub struct SsoResolver {
    source: Arc<dyn TokenSource>,
}

impl SsoResolver {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self { source }
    }
}

#[async_trait]
impl CredentialResolver for SsoResolver {
    async fn credential(&self) -> Result<Option<Credential>> {
        let token = self.source.bearer_token().await?;
        Ok(Some(Credential::Bearer(token)))
    }

    fn freshness(&self) -> Freshness {
        Freshness::PerRequest
    }
}

/// Basic credentials; the server side handles token refresh.
///
/// Credentials are acquired on first use and reused afterwards. A failed
/// acquisition is not cached, so the next request tries again.
pub struct BasicCredentialsResolver {
    source: Arc<dyn TokenSource>,
    encoded: OnceCell<String>,
}

impl BasicCredentialsResolver {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            encoded: OnceCell::new(),
        }
    }
}

#[async_trait]
impl CredentialResolver for BasicCredentialsResolver {
    async fn credential(&self) -> Result<Option<Credential>> {
        let encoded = self
            .encoded
            .get_or_try_init(|| self.source.basic_credentials())
            .await?;
        Ok(Some(Credential::Basic(encoded.clone())))
    }

    fn freshness(&self) -> Freshness {
        Freshness::Static
    }
}

/// Client-side refresh: caches a token and re-acquires it once expired.
pub struct ClientRefreshResolver {
    source: Arc<dyn TokenSource>,
    cache: Mutex<Option<TokenCredentials>>,
}

impl ClientRefreshResolver {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            source,
            cache: Mutex::new(None),
        }
    }

    /// Return the cached token, refreshing it first if missing or expired.
    pub async fn valid_token(&self) -> Result<String> {
        let mut cache = self.cache.lock().await;

        if let Some(creds) = cache.as_ref() {
            if !creds.is_expired() {
                tracing::debug!("Using cached access token");
                return Ok(creds.access_token.clone());
            }
        }

        let fresh = self.source.fetch_token(cache.as_ref()).await?;
        let token = fresh.access_token.clone();
        *cache = Some(fresh);
        Ok(token)
    }
}

#[async_trait]
impl CredentialResolver for ClientRefreshResolver {
    async fn credential(&self) -> Result<Option<Credential>> {
        Ok(Some(Credential::Bearer(self.valid_token().await?)))
    }

    fn freshness(&self) -> Freshness {
        Freshness::OnExpiry
    }
}
