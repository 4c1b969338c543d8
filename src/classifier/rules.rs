//! Independent classification rules, evaluated in priority order by
//! [`Classifier`](crate::classifier::Classifier).

use base64::{
    Engine,
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
};
use regex::Regex;
use reqwest::header::HeaderMap;
use std::sync::LazyLock;

use crate::classifier::model::{ClassificationInfo, SubscriptionKind};

pub const QUOTA_HEADER: &str = "subscription-userinfo";
pub const PROXY_SCHEMES: [&str; 5] = ["ss://", "ssr://", "vmess://", "trojan://", "vless://"];
pub const CONFIG_KEYWORDS: [&str; 6] = ["server", "port", "password", "method", "host", "path"];

const PROXY_LIST_MARKER: &str = "proxies:";
const NAME_MARKER: &str = "name:";
const SERVER_MARKER: &str = "server:";
const ENTRY_MARKER: &str = "- name:";

const MIN_BODY_CHARS: usize = 10;
const MIN_ENCODED_CHARS: usize = 20;
const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

// `\b` keeps the `ss://` inside `vmess://` or `vless://` from counting twice.
static SCHEME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:ssr|ss|vmess|trojan|vless)://").unwrap());

static DIGITS_REGEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

static LENIENT_BASE64: LazyLock<GeneralPurpose> = LazyLock::new(|| {
    GeneralPurpose::new(
        &alphabet::STANDARD,
        GeneralPurposeConfig::new()
            .with_decode_padding_mode(DecodePaddingMode::Indifferent)
            .with_decode_allow_trailing_bits(true),
    )
});

/// What a rule says about a response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleOutcome {
    Matched(SubscriptionKind, ClassificationInfo),
    /// Stop: the response is unclassifiable.
    Reject,
    /// No opinion, try the next rule.
    Continue,
}

/// Borrowed view of one 200 response.
#[derive(Debug, Clone, Copy)]
pub struct RuleInput<'a> {
    pub headers: &'a HeaderMap,
    pub body: &'a str,
}

pub trait ClassificationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome;
}

/// Empty or near-empty bodies carry no evidence at all.
pub struct RejectTrivial;

impl ClassificationRule for RejectTrivial {
    fn name(&self) -> &'static str {
        "reject_trivial"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        if input.body.trim().chars().count() < MIN_BODY_CHARS {
            RuleOutcome::Reject
        } else {
            RuleOutcome::Continue
        }
    }
}

/// Usage counters in the `subscription-userinfo` header.
pub struct QuotaHeader;

impl ClassificationRule for QuotaHeader {
    fn name(&self) -> &'static str {
        "quota_header"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let Some(value) = input.headers.get(QUOTA_HEADER).and_then(|v| v.to_str().ok()) else {
            return RuleOutcome::Continue;
        };

        match remaining_quota_gb(value) {
            Some(gb) => RuleOutcome::Matched(
                SubscriptionKind::Quota,
                ClassificationInfo::RemainingGb(gb),
            ),
            None => RuleOutcome::Continue,
        }
    }
}

/// Parses `upload=..; download=..; total=..` into the remaining capacity.
/// The first three integers are taken in that order.
pub fn remaining_quota_gb(header_value: &str) -> Option<f64> {
    let numbers: Vec<u128> = DIGITS_REGEX
        .find_iter(header_value)
        .take(3)
        .map(|m| m.as_str().parse::<u128>())
        .collect::<Result<_, _>>()
        .ok()?;

    let [upload, download, total] = numbers[..] else {
        return None;
    };
    if total == 0 {
        return None;
    }

    let used = upload.saturating_add(download);
    if total <= used {
        return None;
    }

    let gb = (total - used) as f64 / BYTES_PER_GB;
    Some((gb * 100.0).round() / 100.0)
}

/// Clash-style YAML with named proxy entries.
pub struct StructuredConfig;

impl ClassificationRule for StructuredConfig {
    fn name(&self) -> &'static str {
        "structured_config"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        match structured_entry_count(input.body) {
            Some(count) => RuleOutcome::Matched(
                SubscriptionKind::StructuredConfig,
                ClassificationInfo::Nodes {
                    count,
                    encoded: false,
                },
            ),
            None => RuleOutcome::Continue,
        }
    }
}

/// Number of `- name:` entries when `body` looks like a proxy list.
pub fn structured_entry_count(body: &str) -> Option<usize> {
    if !body.contains(PROXY_LIST_MARKER) {
        return None;
    }
    if !body.contains(NAME_MARKER) && !body.contains(SERVER_MARKER) {
        return None;
    }
    let count = body.matches(ENTRY_MARKER).count();
    (count > 0).then_some(count)
}

/// Base64 bodies: node lists first, configuration text second.
pub struct EncodedBody;

impl ClassificationRule for EncodedBody {
    fn name(&self) -> &'static str {
        "encoded_body"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let cleaned: String = input.body.chars().filter(|c| !c.is_whitespace()).collect();
        if cleaned.chars().count() <= MIN_ENCODED_CHARS {
            return RuleOutcome::Continue;
        }

        let Some(decoded) = decode_base64_lenient(&cleaned) else {
            return RuleOutcome::Continue;
        };

        let nodes = count_scheme_prefixes(&decoded);
        if nodes > 0 {
            return RuleOutcome::Matched(
                SubscriptionKind::EncodedNodeList,
                ClassificationInfo::Nodes {
                    count: nodes,
                    encoded: true,
                },
            );
        }

        let lowered = decoded.to_lowercase();
        if CONFIG_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            let lines = decoded.lines().filter(|l| !l.trim().is_empty()).count();
            if lines > 0 {
                return RuleOutcome::Matched(
                    SubscriptionKind::EncodedConfig,
                    ClassificationInfo::ConfigLines(lines),
                );
            }
        }

        RuleOutcome::Continue
    }
}

/// Decodes base64 while skipping characters outside the alphabet.
/// URL-safe characters are folded onto the standard alphabet and padding
/// is optional. `None` when what is left is not decodable.
pub fn decode_base64_lenient(text: &str) -> Option<String> {
    let filtered: String = text
        .chars()
        .filter_map(|c| match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '+' | '/' => Some(c),
            '-' => Some('+'),
            '_' => Some('/'),
            _ => None,
        })
        .collect();

    if filtered.is_empty() {
        return None;
    }

    let bytes = LENIENT_BASE64.decode(filtered.as_bytes()).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

/// Plain text that already lists proxy URLs.
pub struct RawNodeList;

impl ClassificationRule for RawNodeList {
    fn name(&self) -> &'static str {
        "raw_node_list"
    }

    fn apply(&self, input: &RuleInput<'_>) -> RuleOutcome {
        let nodes = count_scheme_prefixes(input.body);
        if nodes > 0 {
            RuleOutcome::Matched(
                SubscriptionKind::RawNodeList,
                ClassificationInfo::Nodes {
                    count: nodes,
                    encoded: false,
                },
            )
        } else {
            RuleOutcome::Continue
        }
    }
}

/// Occurrences of any proxy scheme prefix.
pub fn count_scheme_prefixes(text: &str) -> usize {
    SCHEME_REGEX.find_iter(text).count()
}
