//! OAuth token acquisition for both authorities.
//!
//! The source authority is asked with a refresh-token grant, the destination
//! authority with a client-credentials grant. Tokens are cached per provider and
//! handed out until they come within [`TokenConfig::refresh_margin`] of expiry,
//! at which point the next caller triggers a fresh exchange.

use crate::config::{DestinationConfig, HttpConfig, SourceConfig, TokenConfig};
use crate::error::{AuthError, Result, response_body};
use crate::types::{Credential, Provider};
use chrono::Utc;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

/// Upper bound for an advertised token lifetime (one year)
const MAX_TOKEN_LIFETIME_SECS: i64 = 365 * 24 * 60 * 60;

/// Shape shared by both token endpoints
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    // Some authorities send this as a string
    #[serde(default)]
    expires_in: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl TokenResponse {
    fn expires_in_secs(&self) -> Option<i64> {
        match self.expires_in.as_ref()? {
            serde_json::Value::Number(n) => n.as_i64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Hands out bearer tokens for the source and destination APIs
pub struct CredentialBroker {
    client: reqwest::Client,
    source: SourceConfig,
    destination: DestinationConfig,
    tokens: TokenConfig,
    request_timeout: Duration,
    cache: Mutex<HashMap<Provider, Credential>>,
}

impl CredentialBroker {
    /// Create a broker sharing the given HTTP client
    pub fn new(
        client: reqwest::Client,
        source: SourceConfig,
        destination: DestinationConfig,
        tokens: TokenConfig,
    ) -> Self {
        Self {
            client,
            source,
            destination,
            tokens,
            request_timeout: HttpConfig::default().request_timeout,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Deadline for each token exchange
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Return a token for `provider` that is valid for at least the refresh margin
    ///
    /// Served from the cache when possible. The cache lock is held across the
    /// exchange so concurrent callers share a single round trip.
    pub async fn acquire_token(&self, provider: Provider) -> Result<String> {
        let mut cache = self.cache.lock().await;
        let margin = chrono::Duration::from_std(self.tokens.refresh_margin)
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        if let Some(credential) = cache.get(&provider)
            && credential.is_fresh(Utc::now(), margin)
        {
            tracing::trace!(provider = %provider, "using cached token");
            return Ok(credential.token.clone());
        }

        let credential = self.fetch_credential(provider).await?;
        let token = credential.token.clone();
        cache.insert(provider, credential);
        Ok(token)
    }

    /// Drop the cached token for `provider`, forcing the next call to exchange again
    pub async fn invalidate(&self, provider: Provider) {
        self.cache.lock().await.remove(&provider);
    }

    /// Perform a token exchange, bypassing the cache
    pub async fn fetch_credential(&self, provider: Provider) -> Result<Credential> {
        let request = match provider {
            Provider::Source => self.client.post(&self.source.token_url).query(&[
                ("refresh_token", self.source.refresh_token.as_str()),
                ("client_id", self.source.client_id.as_str()),
                ("client_secret", self.source.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ]),
            Provider::Destination => self.client.post(&self.destination.token_url).form(&[
                ("client_id", self.destination.client_id.as_str()),
                ("client_secret", self.destination.client_secret.as_str()),
                ("grant_type", "client_credentials"),
                ("scope", self.destination.scope.as_str()),
            ]),
        };

        let response = request
            .timeout(self.request_timeout)
            .send()
            .await
            .map_err(|source| AuthError::Request { provider, source })?;

        let status = response.status();
        if !status.is_success() {
            let body = response_body(response).await;
            tracing::warn!(provider = %provider, status = status.as_u16(), "token request rejected");
            return Err(AuthError::Rejected {
                provider,
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let text = response
            .text()
            .await
            .map_err(|source| AuthError::Request { provider, source })?;
        let parsed: TokenResponse = serde_json::from_str(&text).unwrap_or_default();

        let expires_in = parsed.expires_in_secs();
        let token = match parsed.access_token {
            Some(token) if !token.is_empty() => token,
            _ => {
                return Err(AuthError::MissingToken {
                    provider,
                    detail: parsed.error,
                }
                .into());
            }
        };

        let obtained_at = Utc::now();
        // Out-of-range lifetimes would overflow the expiry timestamp
        let lifetime = expires_in
            .map(|secs| chrono::Duration::seconds(secs.clamp(0, MAX_TOKEN_LIFETIME_SECS)))
            .or_else(|| chrono::Duration::from_std(self.tokens.default_lifetime).ok())
            .unwrap_or_else(|| chrono::Duration::hours(1));

        tracing::debug!(
            provider = %provider,
            expires_in_secs = lifetime.num_seconds(),
            "obtained access token"
        );

        Ok(Credential {
            provider,
            token,
            obtained_at,
            expires_at: obtained_at + lifetime,
        })
    }
}
