//! Candidate URL extraction from scraped page bodies.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://[-A-Za-z0-9+&@#/%?=~_|!:,.;]+[-A-Za-z0-9+&@#/%=~_|]").unwrap()
});

static FIRST_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").unwrap());

const CHANNEL_PREVIEW_PREFIX: &str = "https://t.me/s/";

/// Extracts URLs from `body` in document order, dropping any URL that
/// contains a denylisted fragment.
pub fn extract_links<S: AsRef<str>>(body: &str, denylist: &[S]) -> Vec<String> {
    URL_REGEX
        .find_iter(body)
        .map(|m| m.as_str())
        .filter(|url| !denylist.iter().any(|d| url.contains(d.as_ref())))
        .map(str::to_string)
        .collect()
}

/// Deduplicated union of the links of several documents.
pub fn extract_unique<D, S>(documents: D, denylist: &[S]) -> BTreeSet<String>
where
    D: IntoIterator,
    D::Item: AsRef<str>,
    S: AsRef<str>,
{
    documents
        .into_iter()
        .flat_map(|doc| extract_links(doc.as_ref(), denylist))
        .collect()
}

/// Rewrites a channel link to its public preview page:
/// `https://t.me/name` becomes `https://t.me/s/name`.
pub fn channel_preview_url(channel: &str) -> Option<String> {
    let id = channel
        .trim()
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty() && !id.contains(':'))?;
    Some(format!("{}{}", CHANNEL_PREVIEW_PREFIX, id))
}

/// First URL inside an annotated entry such as `"remaining: 1.00 GB https://x/y"`.
pub fn first_url(entry: &str) -> Option<&str> {
    FIRST_URL_REGEX.find(entry).map(|m| m.as_str())
}
