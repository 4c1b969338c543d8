use crate::fetcher::{
    client::ContentFetcher,
    errors::FetchError,
    retry::RetryPolicy,
    types::{FetchFailure, FetchOutcome},
};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::sleep,
};
use tracing::{debug, instrument, warn};

/// A [`ContentFetcher`] behind a counting semaphore, a per-request timeout
/// and a retry policy. Cloning shares the semaphore.
#[derive(Clone)]
pub struct BoundedFetcher {
    inner: Arc<dyn ContentFetcher>,
    limiter: Arc<Semaphore>,
    limit: usize,
    retry: RetryPolicy,
    timeout: Duration,
    headers: HeaderMap,
}

impl BoundedFetcher {
    pub fn new(
        inner: Arc<dyn ContentFetcher>,
        limit: usize,
        retry: RetryPolicy,
        timeout: Duration,
    ) -> Self {
        let limit = limit.max(1);
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("*/*"));

        Self {
            inner,
            limiter: Arc::new(Semaphore::new(limit)),
            limit,
            retry,
            timeout,
            headers,
        }
    }

    /// Sends `user_agent` on every request. An unrepresentable value is
    /// skipped with a warning.
    pub fn with_user_agent(mut self, user_agent: &str) -> Self {
        match HeaderValue::from_str(user_agent) {
            Ok(value) => {
                self.headers.insert(USER_AGENT, value);
            }
            Err(e) => warn!(user_agent, error = %e, "ignoring invalid user agent"),
        }
        self
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Takes one slot of the concurrency budget. `None` once the limiter
    /// has been closed.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.limiter.clone().acquire_owned().await.ok()
    }

    /// Refuses any further permits. Fetches already holding one finish.
    pub fn close(&self) {
        self.limiter.close();
    }

    /// Fetches `url` under its own permit.
    pub async fn fetch(&self, url: &str) -> FetchOutcome {
        let Some(permit) = self.acquire().await else {
            return FetchOutcome::Failure(FetchFailure::Cancelled);
        };
        self.fetch_with_permit(&permit, url).await
    }

    /// Fetches `url` under a permit the caller already holds, so several
    /// sequential requests can share one slot.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_with_permit(&self, _permit: &OwnedSemaphorePermit, url: &str) -> FetchOutcome {
        let mut attempt = 0;
        loop {
            attempt += 1;
            // Enforced here as well, for transports that ignore `timeout`.
            let attempt_result = tokio::time::timeout(
                self.timeout,
                self.inner.get(url, &self.headers, self.timeout),
            )
            .await
            .unwrap_or(Err(FetchError::RequestTimeout));

            match attempt_result {
                Ok(response) => return FetchOutcome::Success(response),
                Err(err) if !err.should_retry() => {
                    debug!(attempt, error = %err, "terminal fetch failure");
                    return FetchOutcome::Failure(FetchFailure::Terminal(err));
                }
                Err(err) => {
                    if !self.retry.allows_retry(attempt) {
                        debug!(attempt, error = %err, "retries exhausted");
                        return FetchOutcome::Failure(FetchFailure::TransientExhausted {
                            attempts: attempt,
                            last: err,
                        });
                    }
                    let delay = self.retry.delay(attempt - 1);
                    debug!(attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying");
                    sleep(delay).await;
                }
            }
        }
    }
}
