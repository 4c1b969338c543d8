//! Runtime configuration for the classification and relay pipelines.
//!
//! Nothing in the crate reads module-level settings: every pipeline takes a
//! `Config` in its constructor. `Config::from_env` layers `SUBSCOUT_*`
//! environment variables over the built-in defaults.

use std::env;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use crate::fetcher::retry::{Backoff, RetryPolicy};

/// Environment variable names. Public so tests and the binary can refer to them.
pub const ENV_RELAY_HOSTS: &str = "SUBSCOUT_RELAY_HOSTS";
pub const ENV_CLASSIFY_CONCURRENCY: &str = "SUBSCOUT_CLASSIFY_CONCURRENCY";
pub const ENV_RELAY_CONCURRENCY: &str = "SUBSCOUT_RELAY_CONCURRENCY";
pub const ENV_PER_HOST_CONNECTIONS: &str = "SUBSCOUT_PER_HOST_CONNECTIONS";
pub const ENV_CONNECT_TIMEOUT_SECS: &str = "SUBSCOUT_CONNECT_TIMEOUT_SECS";
pub const ENV_CLASSIFY_TIMEOUT_SECS: &str = "SUBSCOUT_CLASSIFY_TIMEOUT_SECS";
pub const ENV_RELAY_TIMEOUT_SECS: &str = "SUBSCOUT_RELAY_TIMEOUT_SECS";
pub const ENV_RETRY_ATTEMPTS: &str = "SUBSCOUT_RETRY_ATTEMPTS";
pub const ENV_RETRY_BACKOFF: &str = "SUBSCOUT_RETRY_BACKOFF";
pub const ENV_RETRY_BACKOFF_MS: &str = "SUBSCOUT_RETRY_BACKOFF_MS";
pub const ENV_RETRY_BACKOFF_CAP_MS: &str = "SUBSCOUT_RETRY_BACKOFF_CAP_MS";
pub const ENV_USER_AGENT: &str = "SUBSCOUT_USER_AGENT";

const ALL_ENV_VARS: [&str; 12] = [
    ENV_RELAY_HOSTS,
    ENV_CLASSIFY_CONCURRENCY,
    ENV_RELAY_CONCURRENCY,
    ENV_PER_HOST_CONNECTIONS,
    ENV_CONNECT_TIMEOUT_SECS,
    ENV_CLASSIFY_TIMEOUT_SECS,
    ENV_RELAY_TIMEOUT_SECS,
    ENV_RETRY_ATTEMPTS,
    ENV_RETRY_BACKOFF,
    ENV_RETRY_BACKOFF_MS,
    ENV_RETRY_BACKOFF_CAP_MS,
    ENV_USER_AGENT,
];

pub const DEFAULT_RELAY_HOSTS: [&str; 4] = [
    "api.dler.io",
    "sub.xeton.dev",
    "sub.id9.cc",
    "sub.maoxiongnet.com",
];
pub const DEFAULT_LINK_DENYLIST: [&str; 2] = ["//t.me/", "cdn-telegram.org"];
const DEFAULT_CLASSIFY_CONCURRENCY: usize = 50;
const DEFAULT_RELAY_CONCURRENCY: usize = 20;
const DEFAULT_PER_HOST_CONNECTIONS: usize = 20;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CLASSIFY_TIMEOUT_SECS: u64 = 12;
const DEFAULT_RELAY_TIMEOUT_SECS: u64 = 20;
const DEFAULT_RETRY_ATTEMPTS: u32 = 2;
const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
const DEFAULT_RETRY_BACKOFF_CAP_MS: u64 = 30_000;
pub const DEFAULT_USER_AGENT: &str = "ClashforWindows/0.18.1";

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    relay_hosts: Vec<String>,
    classify_concurrency: usize,
    relay_concurrency: usize,
    per_host_connections: usize,
    connect_timeout: Duration,
    classify_timeout: Duration,
    relay_timeout: Duration,
    retry_attempts: u32,
    retry_backoff: Backoff,
    user_agent: String,
    link_denylist: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_hosts: DEFAULT_RELAY_HOSTS.iter().map(|h| h.to_string()).collect(),
            classify_concurrency: DEFAULT_CLASSIFY_CONCURRENCY,
            relay_concurrency: DEFAULT_RELAY_CONCURRENCY,
            per_host_connections: DEFAULT_PER_HOST_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            classify_timeout: Duration::from_secs(DEFAULT_CLASSIFY_TIMEOUT_SECS),
            relay_timeout: Duration::from_secs(DEFAULT_RELAY_TIMEOUT_SECS),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: Backoff::Fixed(Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS)),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            link_denylist: DEFAULT_LINK_DENYLIST.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Config {
    /// Load from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let relay_hosts = match env::var(ENV_RELAY_HOSTS) {
            Ok(raw) => parse_host_list(&raw)?,
            Err(_) => defaults.relay_hosts,
        };

        let config = Self {
            relay_hosts,
            classify_concurrency: env_or(
                ENV_CLASSIFY_CONCURRENCY,
                "classify_concurrency",
                defaults.classify_concurrency,
            )?,
            relay_concurrency: env_or(
                ENV_RELAY_CONCURRENCY,
                "relay_concurrency",
                defaults.relay_concurrency,
            )?,
            per_host_connections: env_or(
                ENV_PER_HOST_CONNECTIONS,
                "per_host_connections",
                defaults.per_host_connections,
            )?,
            connect_timeout: Duration::from_secs(env_or(
                ENV_CONNECT_TIMEOUT_SECS,
                "connect_timeout",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )?),
            classify_timeout: Duration::from_secs(env_or(
                ENV_CLASSIFY_TIMEOUT_SECS,
                "classify_timeout",
                DEFAULT_CLASSIFY_TIMEOUT_SECS,
            )?),
            relay_timeout: Duration::from_secs(env_or(
                ENV_RELAY_TIMEOUT_SECS,
                "relay_timeout",
                DEFAULT_RELAY_TIMEOUT_SECS,
            )?),
            retry_attempts: env_or(ENV_RETRY_ATTEMPTS, "retry_attempts", DEFAULT_RETRY_ATTEMPTS)?,
            retry_backoff: backoff_from_env()?,
            user_agent: env::var(ENV_USER_AGENT).unwrap_or(defaults.user_agent),
            link_denylist: defaults.link_denylist,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.classify_concurrency == 0 {
            return Err(ConfigError::invalid("classify_concurrency", "must be at least 1"));
        }
        if self.relay_concurrency == 0 {
            return Err(ConfigError::invalid("relay_concurrency", "must be at least 1"));
        }
        if self.per_host_connections == 0 {
            return Err(ConfigError::invalid("per_host_connections", "must be at least 1"));
        }
        if self.retry_attempts == 0 {
            return Err(ConfigError::invalid("retry_attempts", "must be at least 1"));
        }
        if self.connect_timeout > self.classify_timeout || self.connect_timeout > self.relay_timeout {
            return Err(ConfigError::invalid(
                "connect_timeout",
                "must not exceed the request timeouts",
            ));
        }
        Ok(())
    }

    pub fn with_relay_hosts<I, S>(mut self, hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relay_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_classify_concurrency(mut self, limit: usize) -> Self {
        self.classify_concurrency = limit.max(1);
        self
    }

    pub fn with_relay_concurrency(mut self, limit: usize) -> Self {
        self.relay_concurrency = limit.max(1);
        self
    }

    pub fn with_timeouts(mut self, connect: Duration, classify: Duration, relay: Duration) -> Self {
        self.connect_timeout = connect;
        self.classify_timeout = classify;
        self.relay_timeout = relay;
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_backoff = Backoff::Fixed(backoff);
        self
    }

    /// Doubles the delay after every failed attempt, from `base` up to `cap`.
    pub fn with_exponential_retry(mut self, attempts: u32, base: Duration, cap: Duration) -> Self {
        self.retry_attempts = attempts.max(1);
        self.retry_backoff = Backoff::Exponential { base, cap };
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Relay hostnames in priority order.
    pub fn relay_hosts(&self) -> &[String] {
        &self.relay_hosts
    }
    pub fn classify_concurrency(&self) -> usize {
        self.classify_concurrency
    }
    pub fn relay_concurrency(&self) -> usize {
        self.relay_concurrency
    }
    /// Simultaneous connections allowed to any single origin.
    pub fn per_host_connections(&self) -> usize {
        self.per_host_connections
    }
    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
    pub fn classify_timeout(&self) -> Duration {
        self.classify_timeout
    }
    pub fn relay_timeout(&self) -> Duration {
        self.relay_timeout
    }
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }
    pub fn link_denylist(&self) -> &[String] {
        &self.link_denylist
    }

    /// Retry policy applied to classification fetches.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, self.retry_backoff)
    }
}

fn env_or<T: FromStr>(key: &str, field: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::invalid(field, format!("'{}' is not a valid number", raw))),
        Err(_) => Ok(default),
    }
}

/// `SUBSCOUT_RETRY_BACKOFF` picks `fixed` (default) or `exponential`;
/// `_MS` is the (base) delay and `_CAP_MS` bounds exponential growth.
fn backoff_from_env() -> Result<Backoff, ConfigError> {
    let base = Duration::from_millis(env_or(
        ENV_RETRY_BACKOFF_MS,
        "retry_backoff",
        DEFAULT_RETRY_BACKOFF_MS,
    )?);

    match env::var(ENV_RETRY_BACKOFF) {
        Err(_) => Ok(Backoff::Fixed(base)),
        Ok(kind) => match kind.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(Backoff::Fixed(base)),
            "exponential" => {
                let cap = Duration::from_millis(env_or(
                    ENV_RETRY_BACKOFF_CAP_MS,
                    "retry_backoff_cap",
                    DEFAULT_RETRY_BACKOFF_CAP_MS,
                )?);
                if cap < base {
                    return Err(ConfigError::invalid(
                        "retry_backoff_cap",
                        "must not be below the base delay",
                    ));
                }
                Ok(Backoff::Exponential { base, cap })
            }
            other => Err(ConfigError::invalid(
                "retry_backoff",
                format!("'{}' is neither 'fixed' nor 'exponential'", other),
            )),
        },
    }
}

fn parse_host_list(raw: &str) -> Result<Vec<String>, ConfigError> {
    let hosts: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect();

    if hosts.is_empty() {
        return Err(ConfigError::invalid("relay_hosts", "no relay host given"));
    }
    Ok(hosts)
}

/// Errors that can occur while building a configuration.
#[derive(Debug)]
pub enum ConfigError {
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl Error for ConfigError {}
