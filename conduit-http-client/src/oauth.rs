//! OAuth2 client-credentials support.
//!
//! [`OAuthTransport`] asks its [`TokenSource`] for a token on every outbound
//! request and sets it as the `Authorization` header. Refreshing and caching
//! belong to the token source.

use async_trait::async_trait;
use http::HeaderValue;
use oauth2::basic::BasicClient;
use oauth2::{ClientId, ClientSecret, EndpointNotSet, EndpointSet, Scope, TokenResponse, TokenUrl};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::context::RequestContext;
use crate::transport::RoundTripper;
use crate::{HttpClientError, Result};

/// Tokens are refreshed this long before they expire.
const EXPIRY_DELTA: Duration = Duration::from_secs(10);

type CredentialsClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Client-credentials grant configuration.
#[derive(Debug, Clone)]
pub struct ClientCredentialsConfig {
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Token endpoint.
    pub token_url: String,
    /// Requested scopes.
    pub scopes: Vec<String>,
}

impl ClientCredentialsConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        token_url: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            token_url: token_url.into(),
            scopes: Vec::new(),
        }
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }
}

/// An access token and its expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Bearer token value.
    pub value: String,
    /// When the token stops being valid. `None` means it never expires.
    pub expires_at: Option<Instant>,
}

impl AccessToken {
    fn is_fresh(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Instant::now() + EXPIRY_DELTA < expires_at,
            None => true,
        }
    }
}

/// Supplies bearer tokens.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Return a valid token, fetching a new one if needed.
    async fn token(&self) -> Result<AccessToken>;
}

/// Token source that always returns the same token.
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: AccessToken,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken {
                value: token.into(),
                expires_at: None,
            },
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn token(&self) -> Result<AccessToken> {
        Ok(self.token.clone())
    }
}

/// Token source performing the client-credentials grant, caching the token
/// until shortly before it expires.
pub struct ClientCredentialsTokenSource {
    // Err holds the reason the token URL was rejected
    client: std::result::Result<CredentialsClient, String>,
    scopes: Vec<String>,
    http: reqwest::Client,
    cached: Mutex<Option<AccessToken>>,
}

impl ClientCredentialsTokenSource {
    /// Create a token source.
    ///
    /// A malformed token URL is logged here and reported as
    /// [`HttpClientError::OAuth`] by every [`token`](TokenSource::token) call.
    pub fn new(config: ClientCredentialsConfig) -> Result<Self> {
        let client = match TokenUrl::new(config.token_url.clone()) {
            Ok(token_url) => Ok(BasicClient::new(ClientId::new(config.client_id))
                .set_client_secret(ClientSecret::new(config.client_secret))
                .set_token_uri(token_url)),
            Err(e) => {
                tracing::warn!(token_url = %config.token_url, error = %e, "Malformed OAuth token URL");
                Err(format!("invalid token URL {:?}: {}", config.token_url, e))
            }
        };

        // Token endpoint redirects are never followed
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            scopes: config.scopes,
            http,
            cached: Mutex::new(None),
        })
    }

    async fn fetch(&self) -> Result<AccessToken> {
        let client = self
            .client
            .as_ref()
            .map_err(|e| HttpClientError::OAuth(e.clone()))?;
        let response = client
            .exchange_client_credentials()
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .request_async(&self.http)
            .await
            .map_err(|e| HttpClientError::OAuth(format!("token exchange failed: {}", e)))?;

        Ok(AccessToken {
            value: response.access_token().secret().clone(),
            expires_at: response.expires_in().map(|ttl| Instant::now() + ttl),
        })
    }
}

#[async_trait]
impl TokenSource for ClientCredentialsTokenSource {
    async fn token(&self) -> Result<AccessToken> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && token.is_fresh()
        {
            return Ok(token.clone());
        }

        tracing::debug!("Fetching OAuth access token");
        let token = self.fetch().await?;
        *cached = Some(token.clone());
        Ok(token)
    }
}

/// Transport that authorizes every request with a bearer token.
pub struct OAuthTransport<R> {
    source: Arc<dyn TokenSource>,
    base: R,
}

impl<R: RoundTripper> OAuthTransport<R> {
    pub fn new(source: Arc<dyn TokenSource>, base: R) -> Self {
        Self { source, base }
    }
}

#[async_trait]
impl<R: RoundTripper> RoundTripper for OAuthTransport<R> {
    async fn round_trip(
        &self,
        mut request: reqwest::Request,
        ctx: &RequestContext,
    ) -> Result<reqwest::Response> {
        let token = self.source.token().await?;
        let value = HeaderValue::from_str(&format!("Bearer {}", token.value))
            .map_err(|e| HttpClientError::OAuth(e.to_string()))?;
        request
            .headers_mut()
            .insert(http::header::AUTHORIZATION, value);

        self.base.round_trip(request, ctx).await
    }
}
