use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::classifier::{ClassificationResult, Classifier, SubscriptionKind};
use crate::config::Config;
use crate::fetcher::{BoundedFetcher, ContentFetcher, FetchError, FetchOutcome};
use crate::links::first_url;
use crate::pipeline::{StageStats, Transport};
use crate::report::SubscriptionSet;

/// Results of one classification call. `results` is in completion order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassificationRun {
    pub results: Vec<ClassificationResult>,
    pub stats: StageStats,
    pub cancelled: bool,
}

impl ClassificationRun {
    /// URLs per kind, sorted.
    pub fn by_kind(&self) -> BTreeMap<SubscriptionKind, Vec<String>> {
        let mut grouped: BTreeMap<SubscriptionKind, BTreeSet<String>> = BTreeMap::new();
        for result in &self.results {
            grouped
                .entry(result.kind)
                .or_default()
                .insert(result.url.clone());
        }
        grouped
            .into_iter()
            .map(|(kind, urls)| (kind, urls.into_iter().collect()))
            .collect()
    }

    /// Results sorted by URL.
    pub fn into_sorted(mut self) -> Vec<ClassificationResult> {
        self.results.sort_by(|a, b| a.url.cmp(&b.url));
        self.results
    }
}

/// Fetches candidate URLs and classifies what they serve.
pub struct ClassificationPipeline {
    config: Config,
    classifier: Arc<Classifier>,
    transport: Transport,
}

impl ClassificationPipeline {
    /// Uses a fresh HTTP connection pool for every call.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            classifier: Arc::new(Classifier::default()),
            transport: Transport::Http,
        }
    }

    /// Drives an injected fetcher instead of HTTP.
    pub fn with_fetcher(config: Config, fetcher: Arc<dyn ContentFetcher>) -> Self {
        Self {
            config,
            classifier: Arc::new(Classifier::default()),
            transport: Transport::Shared(fetcher),
        }
    }

    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = Arc::new(classifier);
        self
    }

    pub async fn classify_all<I, S>(&self, urls: I) -> Result<ClassificationRun, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.classify_all_until(urls, &CancellationToken::new()).await
    }

    /// Like [`classify_all`](Self::classify_all), but stops when `cancel`
    /// fires and returns whatever was collected by then.
    ///
    /// Only building the transport can fail; per-URL failures just leave
    /// the URL out of the results.
    pub async fn classify_all_until<I, S>(
        &self,
        urls: I,
        cancel: &CancellationToken,
    ) -> Result<ClassificationRun, FetchError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let urls: BTreeSet<String> = urls.into_iter().map(Into::into).collect();
        let input = urls.len();
        if input == 0 {
            return Ok(ClassificationRun::default());
        }

        let fetcher = BoundedFetcher::new(
            self.transport.open(&self.config)?,
            self.config.classify_concurrency(),
            self.config.retry_policy(),
            self.config.classify_timeout(),
        )
        .with_user_agent(self.config.user_agent());

        info!(
            urls = input,
            concurrency = fetcher.limit(),
            "classifying subscriptions"
        );

        let mut tasks = JoinSet::new();
        for url in urls {
            let fetcher = fetcher.clone();
            let classifier = self.classifier.clone();
            let span = info_span!("classify", url = %url);
            tasks.spawn(
                async move {
                    match fetcher.fetch(&url).await {
                        FetchOutcome::Success(response) => classifier.classify_response(&response),
                        FetchOutcome::Failure(failure) => {
                            debug!(%failure, "dropping url");
                            None
                        }
                    }
                }
                .instrument(span),
            );
        }

        let mut results = Vec::new();
        let mut cancelled = false;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    fetcher.close();
                    tasks.abort_all();
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(Some(result))) => results.push(result),
                    Some(Ok(None)) => {}
                    Some(Err(e)) => {
                        if !e.is_cancelled() {
                            warn!(error = %e, "classification task failed");
                        }
                    }
                },
            }
        }

        let stats = StageStats::new(input, results.len());
        info!(
            input = stats.input,
            classified = stats.output,
            cancelled,
            "classification finished"
        );

        Ok(ClassificationRun {
            results,
            stats,
            cancelled,
        })
    }

    /// Re-classifies every stored subscription (including URLs embedded in
    /// annotated entries) and keeps only the ones that still classify, under
    /// the bucket of their current kind.
    pub async fn revalidate(
        &self,
        existing: &SubscriptionSet,
        cancel: &CancellationToken,
    ) -> Result<(SubscriptionSet, ClassificationRun), FetchError> {
        let mut urls: BTreeSet<String> = existing.all_urls();
        urls.extend(
            existing
                .play()
                .iter()
                .filter_map(|entry| first_url(entry))
                .map(str::to_string),
        );

        let run = self.classify_all_until(urls, cancel).await?;
        let refreshed = SubscriptionSet::from_results(&run.results);
        info!(
            before = existing.total(),
            after = refreshed.total(),
            "existing subscriptions revalidated"
        );
        Ok((refreshed, run))
    }

    /// Re-checks `stored` and lays `fresh` over what survives, so a URL
    /// found again takes its newest bucket. An interrupted re-check keeps
    /// `stored` unchanged instead of dropping what was not reached.
    pub async fn merge_with_stored(
        &self,
        stored: &SubscriptionSet,
        fresh: &SubscriptionSet,
        cancel: &CancellationToken,
    ) -> Result<(SubscriptionSet, ClassificationRun), FetchError> {
        let (refreshed, run) = self.revalidate(stored, cancel).await?;
        let mut merged = if run.cancelled {
            warn!("revalidation interrupted, keeping stored subscriptions");
            stored.clone()
        } else {
            refreshed
        };
        merged.merge(fresh);

        info!(
            changes = ?merged.diff_counts(stored),
            total = merged.total(),
            "subscriptions merged"
        );
        Ok((merged, run))
    }
}
