//! Deduplicated, sorted subscription sets handed to the persistence layer.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::classifier::{Bucket, ClassificationResult};
use crate::links::first_url;

const PLAY_HEADER: &str = "-- play_list --";
const SUB_HEADER: &str = "-- sub_list --";

/// One sorted set per bucket, plus annotated quota entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionSet {
    #[serde(default)]
    airport: BTreeSet<String>,
    #[serde(default)]
    clash: BTreeSet<String>,
    #[serde(default)]
    v2: BTreeSet<String>,
    /// `"<info> <url>"` lines for quota subscriptions.
    #[serde(default)]
    play: BTreeSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_results<'a, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'a ClassificationResult>,
    {
        let mut set = Self::new();
        for result in results {
            set.insert(result.kind.bucket(), result.url.clone());
            if let Some(entry) = result.annotated() {
                set.insert_play(entry);
            }
        }
        set
    }

    /// Files `url` under `bucket`. A URL lives in one bucket only, so any
    /// earlier placement and its annotated entry are dropped.
    pub fn insert(&mut self, bucket: Bucket, url: impl Into<String>) -> bool {
        let url = url.into();
        for other in Bucket::ALL {
            if other != bucket {
                self.bucket_mut(other).remove(&url);
            }
        }
        self.play.retain(|entry| first_url(entry) != Some(url.as_str()));
        self.bucket_mut(bucket).insert(url)
    }

    /// Adds an annotated `"<info> <url>"` entry, replacing any older entry
    /// for the same URL.
    pub fn insert_play(&mut self, entry: impl Into<String>) -> bool {
        let entry = entry.into();
        if let Some(url) = first_url(&entry) {
            self.play
                .retain(|existing| first_url(existing) != Some(url));
        }
        self.play.insert(entry)
    }

    pub fn bucket(&self, bucket: Bucket) -> &BTreeSet<String> {
        match bucket {
            Bucket::Airport => &self.airport,
            Bucket::Clash => &self.clash,
            Bucket::V2 => &self.v2,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut BTreeSet<String> {
        match bucket {
            Bucket::Airport => &mut self.airport,
            Bucket::Clash => &mut self.clash,
            Bucket::V2 => &mut self.v2,
        }
    }

    pub fn play(&self) -> &BTreeSet<String> {
        &self.play
    }

    /// Union with `other`. Where both sets know a URL, `other` wins: the
    /// URL moves to `other`'s bucket and takes `other`'s annotation.
    /// Merging the same set twice changes nothing.
    pub fn merge(&mut self, other: &SubscriptionSet) {
        for bucket in Bucket::ALL {
            for url in other.bucket(bucket) {
                self.insert(bucket, url.clone());
            }
        }
        for entry in &other.play {
            self.insert_play(entry.clone());
        }
    }

    /// Bucket currently holding `url`.
    pub fn bucket_of(&self, url: &str) -> Option<Bucket> {
        Bucket::ALL
            .into_iter()
            .find(|bucket| self.bucket(*bucket).contains(url))
    }

    /// Every URL across the three buckets.
    pub fn all_urls(&self) -> BTreeSet<String> {
        Bucket::ALL
            .iter()
            .flat_map(|b| self.bucket(*b).iter().cloned())
            .collect()
    }

    /// Entry count per bucket. `play` is reported under its own key.
    pub fn counts(&self) -> BTreeMap<&'static str, usize> {
        let mut counts: BTreeMap<&'static str, usize> = Bucket::ALL
            .iter()
            .map(|b| (b.as_str(), self.bucket(*b).len()))
            .collect();
        counts.insert("play", self.play.len());
        counts
    }

    pub fn total(&self) -> usize {
        self.counts().values().sum()
    }

    /// Signed change per bucket relative to `before`.
    pub fn diff_counts(&self, before: &SubscriptionSet) -> BTreeMap<&'static str, i64> {
        let old = before.counts();
        self.counts()
            .into_iter()
            .map(|(name, now)| {
                let was = old.get(name).copied().unwrap_or(0);
                (name, now as i64 - was as i64)
            })
            .collect()
    }

    /// Rebuilds a set from text written by
    /// [`render_sub_store`](Self::render_sub_store). `sub_list` lines land
    /// in `airport`; play entries keep their annotation.
    pub fn from_sub_store(text: &str) -> Self {
        let mut set = Self::new();
        for url in parse_sub_list(text) {
            set.airport.insert(url);
        }
        for entry in parse_play_list(text) {
            set.insert_play(entry);
        }
        set
    }

    /// Text consumed by the sub-store uploader.
    pub fn render_sub_store(&self) -> String {
        format!(
            "{}\n\n{}\n\n{}\n\n{}",
            PLAY_HEADER,
            join_lines(&self.play),
            SUB_HEADER,
            join_lines(&self.airport)
        )
    }
}

fn join_lines(set: &BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
}

/// Reads the `-- sub_list --` section back, up to the next `--` header.
pub fn parse_sub_list(text: &str) -> Vec<String> {
    parse_section(text, SUB_HEADER)
}

/// Reads the annotated entries of the `-- play_list --` section.
pub fn parse_play_list(text: &str) -> Vec<String> {
    parse_section(text, PLAY_HEADER)
}

fn parse_section(text: &str, header: &str) -> Vec<String> {
    let mut in_section = false;
    let mut lines = Vec::new();

    for line in text.lines().map(str::trim) {
        if line == header {
            in_section = true;
        } else if in_section && line.starts_with("--") {
            break;
        } else if in_section && !line.is_empty() {
            lines.push(line.to_string());
        }
    }
    lines
}
