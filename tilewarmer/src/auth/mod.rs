//! OAuth2 bearer-token supply for authenticated cache areas.
//!
//! Tokens come from a client-credentials grant against the configured token
//! endpoint. The [`TokenProvider`] caches the most recent token and refreshes
//! it on a sequence-index cadence (`sequence % refresh_interval == 0`), the
//! same amortization the legacy tool used, with one improvement: the
//! `expires_in` reported by the endpoint is tracked, so a token past its
//! expiry is refreshed even between cadence boundaries rather than trusted
//! blindly.

use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::config::AuthSettings;

/// Errors raised while obtaining a bearer token.
///
/// A token failure abandons the one task that needed it; the run continues.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The token client could not be built.
    #[error("failed to build token client: {0}")]
    ClientBuild(#[source] reqwest::Error),

    /// The token endpoint could not be reached.
    #[error("token request failed: {0}")]
    Request(String),

    /// The token endpoint answered with a non-success status.
    #[error("token endpoint returned status {0}")]
    Status(u16),

    /// The token response body was not the expected JSON.
    #[error("malformed token response: {0}")]
    Parse(String),
}

/// A token returned by the endpoint, with its advertised lifetime.
#[derive(Debug, Clone)]
pub struct FetchedToken {
    pub token: String,
    pub expires_in: Option<Duration>,
}

/// Abstraction over the token endpoint call, for test doubles.
pub trait TokenFetcher: Send + Sync {
    /// Performs one client-credentials token request.
    fn fetch_token(
        &self,
        settings: &AuthSettings,
    ) -> impl std::future::Future<Output = Result<FetchedToken, AuthError>> + Send;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Real token fetcher speaking the OAuth2 client-credentials grant.
///
/// Issues `POST {auth_url}?grant_type=client_credentials` with HTTP basic
/// auth, matching the UAA-style endpoint the legacy tool consumed.
pub struct OAuthTokenFetcher {
    client: reqwest::Client,
}

impl OAuthTokenFetcher {
    /// Builds a token fetcher with the given request timeout.
    pub fn new(timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AuthError::ClientBuild)?;
        Ok(Self { client })
    }
}

impl TokenFetcher for OAuthTokenFetcher {
    async fn fetch_token(&self, settings: &AuthSettings) -> Result<FetchedToken, AuthError> {
        let response = self
            .client
            .post(&settings.auth_url)
            .query(&[("grant_type", "client_credentials")])
            .basic_auth(&settings.client_id, Some(&settings.client_secret))
            .send()
            .await
            .map_err(|e| AuthError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::Status(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Parse(e.to_string()))?;

        Ok(FetchedToken {
            token: body.access_token,
            expires_in: body.expires_in.map(Duration::from_secs),
        })
    }
}

/// Cached token value tagged with its origin and expiry.
#[derive(Debug, Clone)]
struct TokenState {
    token: String,
    fetched_at_sequence: u64,
    expires_at: Option<Instant>,
}

impl TokenState {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|deadline| Instant::now() >= deadline)
    }
}

/// Supplies bearer tokens for one cache area's run.
///
/// Owned by the dispatch loop and consulted sequentially at submission time,
/// so the cached state has a single writer and the refresh cadence follows
/// generation order exactly.
pub struct TokenProvider<F: TokenFetcher> {
    fetcher: F,
    settings: AuthSettings,
    state: Option<TokenState>,
}

impl<F: TokenFetcher> TokenProvider<F> {
    /// Creates a provider with no cached token.
    pub fn new(fetcher: F, settings: AuthSettings) -> Self {
        Self {
            fetcher,
            settings,
            state: None,
        }
    }

    /// Whether the given sequence index triggers a refresh.
    fn refresh_due(&self, sequence: u64) -> bool {
        if sequence % self.settings.refresh_interval == 0 {
            return true;
        }
        match &self.state {
            // Either a cadence-boundary refresh failed earlier or the
            // token outlived its advertised lifetime.
            None => true,
            Some(state) => state.is_expired(),
        }
    }

    /// Returns the token to attach to the task at `sequence`.
    ///
    /// On a refresh failure the error propagates (the task is skipped by the
    /// caller) while any previously cached token stays in place for
    /// subsequent tasks.
    pub async fn token_for(&mut self, sequence: u64) -> Result<String, AuthError> {
        if self.refresh_due(sequence) {
            debug!(sequence, "refreshing bearer token");
            let fetched = self.fetcher.fetch_token(&self.settings).await?;
            self.state = Some(TokenState {
                token: fetched.token,
                fetched_at_sequence: sequence,
                expires_at: fetched.expires_in.map(|ttl| Instant::now() + ttl),
            });
        }

        // A refresh either just succeeded or a previous one did.
        let state = self.state.as_ref().ok_or_else(|| {
            AuthError::Request("no cached token available".to_string())
        })?;
        Ok(state.token.clone())
    }

    /// Sequence index of the last successful refresh, if any.
    pub fn last_refresh_sequence(&self) -> Option<u64> {
        self.state.as_ref().map(|s| s.fetched_at_sequence)
    }
}
