//! Bounded-parallelism drivers: one task per URL, each gated by the
//! semaphore of a [`BoundedFetcher`](crate::fetcher::BoundedFetcher) that
//! lives only as long as one call.

pub mod classify;
pub mod validate;

pub use classify::{ClassificationPipeline, ClassificationRun};
pub use validate::{RelayValidationPipeline, ValidationRun};

use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::fetcher::{ContentFetcher, FetchError, HttpFetcher};

/// Size of a URL set before and after one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    pub input: usize,
    pub output: usize,
}

impl StageStats {
    pub fn new(input: usize, output: usize) -> Self {
        Self { input, output }
    }

    pub fn dropped(&self) -> usize {
        self.input.saturating_sub(self.output)
    }
}

/// Where a pipeline gets its transport from.
#[derive(Clone)]
pub(crate) enum Transport {
    /// A fresh `reqwest` pool per call.
    Http,
    /// An injected fetcher, shared across calls.
    Shared(Arc<dyn ContentFetcher>),
}

impl Transport {
    pub(crate) fn open(&self, config: &Config) -> Result<Arc<dyn ContentFetcher>, FetchError> {
        match self {
            Self::Http => Ok(Arc::new(HttpFetcher::new(config)?)),
            Self::Shared(fetcher) => Ok(fetcher.clone()),
        }
    }
}
