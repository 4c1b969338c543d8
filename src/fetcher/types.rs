use reqwest::{StatusCode, header::HeaderMap};

use crate::fetcher::errors::FetchError;

/// A response body that has already been decoded to UTF-8.
#[derive(Debug, Clone)]
pub struct SubResponse {
    pub url: String,
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl SubResponse {
    /// Builds a 200 response from literal parts. Used by stub fetchers.
    pub fn ok(url: impl Into<String>, headers: HeaderMap, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: StatusCode::OK,
            headers,
            body: body.into(),
        }
    }
}

/// Why a fetch produced no usable response.
#[derive(Debug)]
pub enum FetchFailure {
    /// Retrying would not help (403/404/410/500, invalid URL, oversized body).
    Terminal(FetchError),
    /// Every allowed attempt failed with a retryable error.
    TransientExhausted { attempts: u32, last: FetchError },
    /// The limiter was closed before a permit could be taken.
    Cancelled,
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Terminal(err) => write!(f, "terminal: {}", err),
            Self::TransientExhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::error::Error for FetchFailure {}

#[derive(Debug)]
pub enum FetchOutcome {
    Success(SubResponse),
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn into_response(self) -> Option<SubResponse> {
        match self {
            Self::Success(response) => Some(response),
            Self::Failure(_) => None,
        }
    }
}
