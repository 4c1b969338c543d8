use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::Config;
use crate::fetcher::{BoundedFetcher, ContentFetcher, FetchError, FetchOutcome, RetryPolicy};
use crate::pipeline::{StageStats, Transport};
use crate::relay::{TargetFormat, relay_query_url};

/// Outcome of one relay validation call.
///
/// `unconfirmed` means no relay gave positive evidence, not that the
/// subscription is dead. URLs still in flight at cancellation are in neither set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ValidationRun {
    pub confirmed: BTreeSet<String>,
    pub unconfirmed: BTreeSet<String>,
    pub stats: StageStats,
    pub cancelled: bool,
}

/// Checks subscriptions through third-party conversion relays.
pub struct RelayValidationPipeline {
    config: Config,
    transport: Transport,
}

impl RelayValidationPipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transport: Transport::Http,
        }
    }

    pub fn with_fetcher(config: Config, fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self {
            config,
            transport: Transport::Shared(fetcher),
        }
    }

    pub async fn validate_all<I, S>(
        &self,
        urls: I,
        target: &TargetFormat,
    ) -> Result<ValidationRun, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.validate_all_until(urls, target, &CancellationToken::new())
            .await
    }

    pub async fn validate_all_until<I, S>(
        &self,
        urls: I,
        target: &TargetFormat,
        cancel: &CancellationToken,
    ) -> Result<ValidationRun, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: BTreeSet<String> = urls.into_iter().map(Into::into).collect();
        let input = urls.len();
        if input == 0 {
            return Ok(ValidationRun::default());
        }

        // Relays get no retry: an unhelpful relay hands over to the next one.
        let fetcher = BoundedFetcher::new(
            self.transport.open(&self.config)?,
            self.config.relay_concurrency(),
            RetryPolicy::none(),
            self.config.relay_timeout(),
        )
        .with_user_agent(self.config.user_agent());
        let relays: Arc<[String]> = self.config.relay_hosts().into();

        info!(
            urls = input,
            format = %target,
            relays = relays.len(),
            concurrency = fetcher.limit(),
            "validating subscriptions through relays"
        );

        let mut tasks = JoinSet::new();
        for url in urls {
            let fetcher = fetcher.clone();
            let relays = relays.clone();
            let target = target.clone();
            let span = info_span!("validate", url = %url);
            tasks.spawn(
                async move {
                    let confirmed = walk_relays(&fetcher, &relays, &target, &url).await;
                    (url, confirmed)
                }
                .instrument(span),
            );
        }

        let mut run = ValidationRun::default();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    run.cancelled = true;
                    fetcher.close();
                    tasks.abort_all();
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok((url, true))) => {
                        run.confirmed.insert(url);
                    }
                    Some(Ok((url, false))) => {
                        run.unconfirmed.insert(url);
                    }
                    Some(Err(e)) => {
                        if !e.is_cancelled() {
                            warn!(error = %e, "validation task failed");
                        }
                    }
                },
            }
        }

        run.stats = StageStats::new(input, run.confirmed.len());
        info!(
            input = run.stats.input,
            confirmed = run.confirmed.len(),
            unconfirmed = run.unconfirmed.len(),
            cancelled = run.cancelled,
            "relay validation finished"
        );
        Ok(run)
    }
}

/// Walks the relays in priority order under a single permit and stops at
/// the first one whose answer passes the target format's check.
async fn walk_relays(
    fetcher: &BoundedFetcher,
    relays: &[String],
    target: &TargetFormat,
    url: &str,
) -> bool {
    let Some(permit) = fetcher.acquire().await else {
        return false;
    };

    for relay in relays {
        let query = relay_query_url(relay, target, url);
        match fetcher.fetch_with_permit(&permit, &query).await {
            FetchOutcome::Success(response) if target.accepts(&response.body) => {
                debug!(relay = %relay, "relay confirmed subscription");
                return true;
            }
            FetchOutcome::Success(response) => {
                debug!(
                    relay = %relay,
                    length = response.body.len(),
                    "relay body inconclusive"
                );
            }
            FetchOutcome::Failure(failure) => {
                debug!(relay = %relay, %failure, "relay unavailable");
            }
        }
    }

    debug!("no relay confirmed subscription");
    false
}
