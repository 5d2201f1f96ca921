//! Tile fetching over HTTP/HTTPS.
//!
//! The [`TileFetcher`] trait abstracts the network call so the dispatcher can
//! be exercised with test doubles; [`HttpTileFetcher`] is the real
//! implementation on top of reqwest.
//!
//! A fetch performs exactly one GET per task and always produces a
//! [`FetchOutcome`]: response bodies are read and discarded (the request
//! exists only to make the server render and cache the tile), failures are
//! classified rather than propagated, and there are no retries.

use std::time::Duration;

use thiserror::Error;

use crate::config::RunOptions;
use crate::task::Task;

/// Errors raised while constructing a fetcher.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The underlying HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Classified result of one tile fetch.
///
/// Every variant counts as "completed" for progress purposes; only
/// [`FetchOutcome::Success`] counts as succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Server answered 200 or 204.
    Success(u16),

    /// Server answered with any other status. An anomaly, not a halt:
    /// the tile may simply not exist at this zoom.
    HttpStatus(u16),

    /// No response within the configured socket timeout.
    TimedOut,

    /// Transport-level failure: DNS, refused connection, reset.
    Transport(String),
}

impl FetchOutcome {
    /// True for 200/204 responses.
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}

/// Abstraction over the per-task HTTP GET.
pub trait TileFetcher: Send + Sync {
    /// Fetches one tile, attaching `Authorization: Bearer <token>` when a
    /// token is supplied. Never fails: anomalies are folded into the outcome.
    fn fetch(
        &self,
        task: &Task,
        token: Option<&str>,
    ) -> impl std::future::Future<Output = FetchOutcome> + Send;
}

/// Real tile fetcher backed by reqwest.
///
/// Two clients are prepared up front: one that verifies TLS certificates and
/// one that does not. Each task selects its client by flag, so verification
/// is a per-request parameter rather than process-wide state and areas with
/// conflicting requirements can run in the same process.
pub struct HttpTileFetcher {
    verifying: reqwest::Client,
    trusting: reqwest::Client,
    timeout: Duration,
}

impl HttpTileFetcher {
    /// Builds a fetcher for the given run options.
    pub fn new(options: &RunOptions) -> Result<Self, FetchError> {
        let verifying = Self::builder(options)
            .build()
            .map_err(FetchError::ClientBuild)?;
        let trusting = Self::builder(options)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(FetchError::ClientBuild)?;
        Ok(Self {
            verifying,
            trusting,
            timeout: options.socket_timeout,
        })
    }

    fn builder(options: &RunOptions) -> reqwest::ClientBuilder {
        let mut builder = reqwest::Client::builder().timeout(options.socket_timeout);
        if !options.connection_pooling {
            builder = builder.pool_max_idle_per_host(0);
        }
        builder
    }

    fn client_for(&self, task: &Task) -> &reqwest::Client {
        if task.skip_tls_verify {
            &self.trusting
        } else {
            &self.verifying
        }
    }

    fn classify_send_error(error: &reqwest::Error) -> FetchOutcome {
        if error.is_timeout() {
            FetchOutcome::TimedOut
        } else {
            FetchOutcome::Transport(error.to_string())
        }
    }
}

impl TileFetcher for HttpTileFetcher {
    async fn fetch(&self, task: &Task, token: Option<&str>) -> FetchOutcome {
        let mut request = self
            .client_for(task)
            .get(task.url())
            .timeout(self.timeout);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => return Self::classify_send_error(&error),
        };

        let status = response.status().as_u16();

        // Drain the body so the server finishes rendering; the bytes are
        // never persisted. A failure mid-body is a transport failure.
        if let Err(error) = response.bytes().await {
            return Self::classify_send_error(&error);
        }

        match status {
            200 | 204 => FetchOutcome::Success(status),
            other => FetchOutcome::HttpStatus(other),
        }
    }
}
