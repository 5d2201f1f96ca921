//! Bounded-concurrency request dispatch.
//!
//! The [`RequestDispatcher`] keeps a sliding window of at most `workers`
//! fetches in flight: it fills the window from the task iterator, then each
//! completion frees a slot for the next queued task. Submission order is
//! generation order; completion order is whatever the network yields, which
//! is fine because the workload is uniform and order-insensitive.
//!
//! Token refreshes happen on the submission side, serialized in sequence
//! order, so the cadence invariant holds no matter how fetches interleave.
//! A refresh failure skips only the task that needed it.

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::auth::{TokenFetcher, TokenProvider};
use crate::fetch::{FetchOutcome, TileFetcher};
use crate::progress::ProgressTracker;
use crate::task::Task;

/// Final accounting for one dispatched cache area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Tasks that reached a terminal state, failures included.
    pub completed: u64,
    /// Tasks that did not get a 200/204 (anomalies, timeouts, transport
    /// errors and auth-skipped tasks).
    pub failed: u64,
}

/// Executes fetch tasks with a fixed in-flight bound.
pub struct RequestDispatcher<F: TileFetcher> {
    fetcher: F,
    workers: usize,
}

impl<F: TileFetcher> RequestDispatcher<F> {
    /// Creates a dispatcher running at most `workers` concurrent fetches.
    pub fn new(fetcher: F, workers: usize) -> Self {
        Self {
            fetcher,
            workers: workers.max(1),
        }
    }

    /// Runs every task to completion.
    ///
    /// The run finishes only when each submitted task has produced an
    /// outcome; individual failures never terminate the run early. Progress
    /// is recorded through `tracker`, which emits a status line on its
    /// report cadence.
    pub async fn run<I, T>(
        &self,
        mut tasks: I,
        mut auth: Option<&mut TokenProvider<T>>,
        tracker: &ProgressTracker,
    ) -> DispatchSummary
    where
        I: Iterator<Item = Task>,
        T: TokenFetcher,
    {
        let fetcher = &self.fetcher;
        let launch = |task: Task, token: Option<String>| async move {
            let outcome = fetcher.fetch(&task, token.as_deref()).await;
            match &outcome {
                FetchOutcome::Success(status) => {
                    debug!(status, path = %task.path, "tile fetched");
                }
                FetchOutcome::HttpStatus(status) => {
                    warn!(status, url = %task.url(), "unexpected status");
                }
                FetchOutcome::TimedOut => {
                    warn!(url = %task.url(), "socket timeout");
                }
                FetchOutcome::Transport(error) => {
                    warn!(url = %task.url(), error = %error, "transport error");
                }
            }
            outcome.is_success()
        };

        let mut in_flight = FuturesUnordered::new();

        loop {
            // Top up the window. An auth-skipped task frees its slot
            // immediately, so this may consume several tasks.
            while in_flight.len() < self.workers {
                let Some(task) = tasks.next() else { break };

                let token = if task.use_auth {
                    match auth.as_deref_mut() {
                        Some(provider) => match provider.token_for(task.sequence).await {
                            Ok(token) => Some(token),
                            Err(error) => {
                                warn!(
                                    sequence = task.sequence,
                                    error = %error,
                                    "skipping tile, token refresh failed"
                                );
                                if let Some(report) = tracker.record(false) {
                                    info!("{report}");
                                }
                                continue;
                            }
                        },
                        None => None,
                    }
                } else {
                    None
                };

                in_flight.push(launch(task, token));
            }

            // Reap one completion; when the window is empty the task
            // iterator is exhausted too, and the run is done.
            match in_flight.next().await {
                Some(success) => {
                    if let Some(report) = tracker.record(success) {
                        info!("{report}");
                    }
                }
                None => break,
            }
        }

        DispatchSummary {
            completed: tracker.completed(),
            failed: tracker.failed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthError, FetchedToken};
    use crate::config::{AuthSettings, Protocol};
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    type NoAuth<'a> = Option<&'a mut TokenProvider<NeverTokenFetcher>>;

    /// Token fetcher that must never be called.
    struct NeverTokenFetcher;

    impl TokenFetcher for NeverTokenFetcher {
        async fn fetch_token(&self, _settings: &AuthSettings) -> Result<FetchedToken, AuthError> {
            panic!("token fetcher should not be called");
        }
    }

    /// Token fetcher that always fails.
    struct FailingTokenFetcher;

    impl TokenFetcher for FailingTokenFetcher {
        async fn fetch_token(&self, _settings: &AuthSettings) -> Result<FetchedToken, AuthError> {
            Err(AuthError::Status(503))
        }
    }

    /// Instrumented fetcher recording the peak number of concurrent calls.
    struct CountingFetcher {
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: AtomicU64,
        outcome: FetchOutcome,
        tokens_seen: Mutex<Vec<Option<String>>>,
    }

    impl CountingFetcher {
        fn new(outcome: FetchOutcome) -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: AtomicU64::new(0),
                outcome,
                tokens_seen: Mutex::new(Vec::new()),
            }
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    impl TileFetcher for CountingFetcher {
        async fn fetch(&self, _task: &Task, token: Option<&str>) -> FetchOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.tokens_seen
                .lock()
                .unwrap()
                .push(token.map(str::to_string));

            tokio::time::sleep(Duration::from_millis(1)).await;

            self.current.fetch_sub(1, Ordering::SeqCst);
            self.outcome.clone()
        }
    }

    fn make_tasks(count: u64, use_auth: bool) -> Vec<Task> {
        (0..count)
            .map(|sequence| Task {
                protocol: Protocol::Http,
                host: "tiles.example.com".to_string(),
                port: 8080,
                path: format!("/maps?TILECOL={sequence}"),
                sequence,
                use_auth,
                skip_tls_verify: false,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_worker_bound_of_one_is_respected() {
        let dispatcher = RequestDispatcher::new(CountingFetcher::new(FetchOutcome::Success(200)), 1);
        let tracker = ProgressTracker::new(20, None);

        let summary = dispatcher
            .run(make_tasks(20, false).into_iter(), NoAuth::None, &tracker)
            .await;

        assert_eq!(summary.completed, 20);
        assert_eq!(summary.failed, 0);
        assert_eq!(dispatcher.fetcher.peak(), 1, "more than one task in flight");
    }

    #[tokio::test]
    async fn test_worker_bound_of_four_is_respected() {
        let dispatcher = RequestDispatcher::new(CountingFetcher::new(FetchOutcome::Success(200)), 4);
        let tracker = ProgressTracker::new(40, None);

        let summary = dispatcher
            .run(make_tasks(40, false).into_iter(), NoAuth::None, &tracker)
            .await;

        assert_eq!(summary.completed, 40);
        assert!(dispatcher.fetcher.peak() <= 4);
    }

    #[tokio::test]
    async fn test_all_timeouts_still_complete() {
        let dispatcher = RequestDispatcher::new(CountingFetcher::new(FetchOutcome::TimedOut), 1);
        let tracker = ProgressTracker::new(10, None);

        let summary = dispatcher
            .run(make_tasks(10, false).into_iter(), NoAuth::None, &tracker)
            .await;

        // Failures count as completed: the run never hangs or stops early.
        assert_eq!(summary.completed, 10);
        assert_eq!(summary.failed, 10);
    }

    #[tokio::test]
    async fn test_http_anomalies_counted_done_not_fatal() {
        let dispatcher =
            RequestDispatcher::new(CountingFetcher::new(FetchOutcome::HttpStatus(500)), 3);
        let tracker = ProgressTracker::new(9, None);

        let summary = dispatcher
            .run(make_tasks(9, false).into_iter(), NoAuth::None, &tracker)
            .await;

        assert_eq!(summary.completed, 9);
        assert_eq!(summary.failed, 9);
    }

    #[tokio::test]
    async fn test_tokens_attached_to_authenticated_tasks() {
        struct OneTokenFetcher;

        impl TokenFetcher for OneTokenFetcher {
            async fn fetch_token(
                &self,
                _settings: &AuthSettings,
            ) -> Result<FetchedToken, AuthError> {
                Ok(FetchedToken {
                    token: "bearer-token".to_string(),
                    expires_in: None,
                })
            }
        }

        let settings = AuthSettings {
            auth_url: "https://uaa.example.com/oauth/token".to_string(),
            client_id: "warmup".to_string(),
            client_secret: "secret".to_string(),
            refresh_interval: 100,
        };
        let mut provider = TokenProvider::new(OneTokenFetcher, settings);

        let dispatcher = RequestDispatcher::new(CountingFetcher::new(FetchOutcome::Success(200)), 2);
        let tracker = ProgressTracker::new(6, None);

        let summary = dispatcher
            .run(make_tasks(6, true).into_iter(), Some(&mut provider), &tracker)
            .await;

        assert_eq!(summary.completed, 6);
        let tokens = dispatcher.fetcher.tokens_seen.lock().unwrap();
        assert_eq!(tokens.len(), 6);
        assert!(tokens
            .iter()
            .all(|t| t.as_deref() == Some("bearer-token")));
    }

    #[tokio::test]
    async fn test_token_failure_skips_tasks_without_stalling() {
        let settings = AuthSettings {
            auth_url: "https://uaa.example.com/oauth/token".to_string(),
            client_id: "warmup".to_string(),
            client_secret: "secret".to_string(),
            refresh_interval: 5,
        };
        let mut provider = TokenProvider::new(FailingTokenFetcher, settings);

        let fetcher = CountingFetcher::new(FetchOutcome::Success(200));
        let dispatcher = RequestDispatcher::new(fetcher, 2);
        let tracker = ProgressTracker::new(12, None);

        let summary = dispatcher
            .run(make_tasks(12, true).into_iter(), Some(&mut provider), &tracker)
            .await;

        // Every refresh fails, so every task is skipped, counted completed
        // and no fetch is ever issued; the run still terminates.
        assert_eq!(summary.completed, 12);
        assert_eq!(summary.failed, 12);
        assert_eq!(dispatcher.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_task_stream_completes_immediately() {
        let dispatcher = RequestDispatcher::new(CountingFetcher::new(FetchOutcome::Success(200)), 4);
        let tracker = ProgressTracker::new(0, None);

        let summary = dispatcher
            .run(Vec::new().into_iter(), NoAuth::None, &tracker)
            .await;

        assert_eq!(summary.completed, 0);
        assert_eq!(summary.failed, 0);
    }
}
