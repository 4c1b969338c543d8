use serde::{Deserialize, Serialize};
use std::fmt;

/// What a subscription endpoint serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionKind {
    /// Reports usage counters in a response header.
    Quota,
    /// Already a structured proxy list with named entries.
    StructuredConfig,
    /// Base64 body that decodes to proxy-scheme URLs.
    EncodedNodeList,
    /// Base64 body that decodes to configuration lines.
    EncodedConfig,
    /// Plain-text body of proxy-scheme URLs.
    RawNodeList,
}

impl SubscriptionKind {
    pub const ALL: [SubscriptionKind; 5] = [
        Self::Quota,
        Self::StructuredConfig,
        Self::EncodedNodeList,
        Self::EncodedConfig,
        Self::RawNodeList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quota => "quota",
            Self::StructuredConfig => "structured_config",
            Self::EncodedNodeList => "encoded_node_list",
            Self::EncodedConfig => "encoded_config",
            Self::RawNodeList => "raw_node_list",
        }
    }

    /// The persistence bucket results of this kind are stored under.
    pub fn bucket(&self) -> Bucket {
        match self {
            Self::Quota => Bucket::Airport,
            Self::StructuredConfig => Bucket::Clash,
            Self::EncodedNodeList | Self::EncodedConfig | Self::RawNodeList => Bucket::V2,
        }
    }
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persistence buckets. Several kinds share the `V2` bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Airport,
    Clash,
    V2,
}

impl Bucket {
    pub const ALL: [Bucket; 3] = [Self::Airport, Self::Clash, Self::V2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Airport => "airport",
            Self::Clash => "clash",
            Self::V2 => "v2",
        }
    }

    /// Relay target format used when re-checking this bucket.
    pub fn target_format(&self) -> &'static str {
        match self {
            Self::Airport => "loon",
            Self::Clash => "clash",
            Self::V2 => "v2ray",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationInfo {
    /// Remaining quota in GB, rounded to 2 decimals.
    RemainingGb(f64),
    Nodes { count: usize, encoded: bool },
    /// Non-empty lines of a decoded configuration.
    ConfigLines(usize),
}

impl fmt::Display for ClassificationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemainingGb(gb) => write!(f, "remaining: {:.2} GB", gb),
            Self::Nodes { count, encoded: false } => write!(f, "{} nodes", count),
            Self::Nodes { count, encoded: true } => write!(f, "{} nodes (base64)", count),
            Self::ConfigLines(lines) => write!(f, "{} config lines (base64)", lines),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationResult {
    pub url: String,
    pub kind: SubscriptionKind,
    pub info: Option<ClassificationInfo>,
}

impl ClassificationResult {
    /// `"<info> <url>"` entry kept for quota subscriptions.
    pub fn annotated(&self) -> Option<String> {
        match (self.kind, &self.info) {
            (SubscriptionKind::Quota, Some(info)) => Some(format!("{} {}", info, self.url)),
            _ => None,
        }
    }
}
