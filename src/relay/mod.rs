//! Relay query construction and the per-format acceptance checks applied
//! to relay responses.

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::classifier::rules::structured_entry_count;

/// Everything except RFC 3986 unreserved characters is escaped, `/` included.
const QUERY_VALUE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Bodies shorter than this (after trimming) are inconclusive for any format.
pub const MIN_RELAY_BODY_CHARS: usize = 50;
/// Generic formats only need a non-trivial config.
const GENERIC_MIN_CHARS: usize = 100;
const LOON_SECTION: &str = "[Proxy]";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum TargetFormat {
    Clash,
    Loon,
    V2ray,
    Other(String),
}

impl TargetFormat {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Clash => "clash",
            Self::Loon => "loon",
            Self::V2ray => "v2ray",
            Self::Other(name) => name,
        }
    }

    /// Whether a relay body converted to this format is positive evidence.
    pub fn accepts(&self, body: &str) -> bool {
        let trimmed = body.trim();
        if trimmed.chars().count() < MIN_RELAY_BODY_CHARS {
            return false;
        }

        match self {
            Self::Clash => structured_entry_count(body).is_some(),
            Self::Loon => body.contains(LOON_SECTION) || body.contains('='),
            Self::V2ray | Self::Other(_) => trimmed.chars().count() > GENERIC_MIN_CHARS,
        }
    }
}

impl From<&str> for TargetFormat {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "clash" => Self::Clash,
            "loon" => Self::Loon,
            "v2ray" => Self::V2ray,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for TargetFormat {
    fn from(value: String) -> Self {
        Self::from(value.as_str())
    }
}

impl From<TargetFormat> for String {
    fn from(value: TargetFormat) -> Self {
        value.as_str().to_string()
    }
}

impl FromStr for TargetFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Builds the conversion query for `subscription` on `relay_host`.
/// The layout is what the public relays expect and must not change.
///
/// A bare hostname is reached over https; a host given with a scheme
/// (a self-hosted converter on `http://127.0.0.1:25500`) is used as is.
pub fn relay_query_url(relay_host: &str, target: &TargetFormat, subscription: &str) -> String {
    format!(
        "{}/sub?target={}&url={}&insert=false&config=config%2FACL4SSR.ini",
        relay_base(relay_host),
        target.as_str(),
        encode_subscription(subscription)
    )
}

fn relay_base(relay_host: &str) -> String {
    let host = relay_host.trim().trim_end_matches('/');
    if host.contains("://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

pub fn encode_subscription(subscription: &str) -> String {
    utf8_percent_encode(subscription, QUERY_VALUE).to_string()
}
