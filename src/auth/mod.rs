//! Authentication - credential resolution for outbound requests
//!
//! This module provides:
//! - [`CredentialResolver`], the single `apply(request)` capability used by the provider client
//! - Four resolvers: static key, SSO, basic credentials, client-side refresh
//! - [`TokenSource`] implementations that acquire tokens for them
//!
//! The mode is chosen once per session by [`AuthMode::select`] and never
//! re-evaluated mid-session.

mod credentials;
mod provider;
mod resolver;

pub use credentials::{Credential, Freshness, TokenCredentials};
pub use provider::{encode_basic, OAuthTokenSource, StaticTokenSource, TokenSource};
pub use resolver::{
    BasicCredentialsResolver, ClientRefreshResolver, CredentialResolver, SsoResolver,
    StaticKeyResolver,
};

use std::sync::Arc;
use serde::{Deserialize, Serialize};
use crate::config::{AuthConfig, Config};
use crate::Result;
use crate::error::Error;

/// Authentication mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Fixed API key (or none) on every request
    Static,
    /// Bearer token acquired before each request
    Sso,
    /// Basic credentials, server-side token refresh
    Basic,
    /// Cached bearer token refreshed in-process on expiry
    ClientRefresh,
}

impl AuthMode {
    /// Pick the mode for a session.
    ///
    /// An explicit `auth.mode` wins. Otherwise SSO, then server-side refresh,
    /// then a static API key, then client-side refresh when a token endpoint
    /// is configured. With nothing configured requests go out anonymously.
    pub fn select(auth: &AuthConfig, has_api_key: bool) -> Self {
        if let Some(mode) = auth.mode {
            return mode;
        }
        if auth.use_sso {
            AuthMode::Sso
        } else if auth.server_side_token_refresh {
            AuthMode::Basic
        } else if has_api_key {
            AuthMode::Static
        } else if auth.token_url.is_some() {
            AuthMode::ClientRefresh
        } else {
            AuthMode::Static
        }
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AuthMode::Static => "static",
            AuthMode::Sso => "sso",
            AuthMode::Basic => "basic",
            AuthMode::ClientRefresh => "client_refresh",
        };
        f.write_str(name)
    }
}

/// Build the resolver for a session from configuration.
pub fn resolver_from_config(config: &Config) -> Result<Box<dyn CredentialResolver>> {
    let auth = &config.auth;
    let mode = AuthMode::select(auth, config.llm.api_key.is_some());
    tracing::info!("Using {} authentication", mode);

    let resolver: Box<dyn CredentialResolver> = match mode {
        AuthMode::Static => Box::new(StaticKeyResolver::new(config.llm.api_key.clone())),
        AuthMode::Sso => {
            let source: Arc<dyn TokenSource> = match auth.sso_token.as_ref() {
                Some(token) => Arc::new(StaticTokenSource::bearer(token.clone())),
                None => Arc::new(oauth_source(auth, mode)?),
            };
            Box::new(SsoResolver::new(source))
        }
        AuthMode::Basic => {
            let source: Arc<dyn TokenSource> = match (&auth.basic_credentials, &auth.client_id, &auth.client_secret) {
                (Some(encoded), _, _) => Arc::new(StaticTokenSource::basic(encoded.clone())),
                (None, Some(id), Some(secret)) => Arc::new(StaticTokenSource::basic_from_pair(id, secret)),
                _ => {
                    return Err(Error::Config(
                        "basic authentication requires auth.basic_credentials or auth.client_id and auth.client_secret"
                            .to_string(),
                    ))
                }
            };
            Box::new(BasicCredentialsResolver::new(source))
        }
        AuthMode::ClientRefresh => Box::new(ClientRefreshResolver::new(Arc::new(oauth_source(auth, mode)?))),
    };

    Ok(resolver)
}

fn oauth_source(auth: &AuthConfig, mode: AuthMode) -> Result<OAuthTokenSource> {
    match (&auth.token_url, &auth.client_id, &auth.client_secret) {
        (Some(url), Some(id), Some(secret)) => {
            Ok(OAuthTokenSource::new(url.clone(), id.clone(), secret.clone()).with_scope(auth.scope.clone()))
        }
        _ => Err(Error::Config(format!(
            "{} authentication requires auth.token_url, auth.client_id and auth.client_secret",
            mode
        ))),
    }
}
