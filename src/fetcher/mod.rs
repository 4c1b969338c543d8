pub mod bounded;
pub mod client;
pub mod decode;
pub mod errors;
pub mod retry;
pub mod types;

pub use bounded::BoundedFetcher;
pub use client::{ContentFetcher, HttpFetcher};
pub use errors::FetchError;
pub use retry::{Backoff, RetryPolicy};
pub use types::{FetchFailure, FetchOutcome, SubResponse};
