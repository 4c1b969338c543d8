use crate::config::Config;
use crate::fetcher::{decode::decode_body, errors::FetchError, types::SubResponse};
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, ClientBuilder, StatusCode, header::HeaderMap};
use std::{sync::Arc, time::Duration};
use tokio::sync::Semaphore;
use tracing::{debug, instrument};

const MAX_BODY_SIZE: u64 = 5 * 1024 * 1024; // 5MB

/// The transport seam: one GET, no retries, no global limits.
///
/// Anything that is not a 200 is reported as [`FetchError::Http`], so
/// callers only ever see bodies worth inspecting.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<SubResponse, FetchError>;
}

/// `reqwest`-backed fetcher. One instance owns one connection pool, so a
/// pipeline invocation builds its own and drops it when the run ends.
pub struct HttpFetcher {
    client: Client,
    per_host: DashMap<String, Arc<Semaphore>>,
    per_host_limit: usize,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, FetchError> {
        let client = ClientBuilder::new()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.per_host_connections())
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(FetchError::from_reqwest_error)?;

        Ok(Self {
            client,
            per_host: DashMap::new(),
            per_host_limit: config.per_host_connections(),
        })
    }

    fn host_limiter(&self, host: &str) -> Arc<Semaphore> {
        self.per_host
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_host_limit)))
            .clone()
    }
}

#[async_trait]
impl ContentFetcher for HttpFetcher {
    #[instrument(skip_all, fields(url = %url))]
    async fn get(
        &self,
        url: &str,
        headers: &HeaderMap,
        timeout: Duration,
    ) -> Result<SubResponse, FetchError> {
        let parsed_url = url::Url::parse(url)?;
        let host = parsed_url.host_str().unwrap_or_default().to_string();

        let limiter = self.host_limiter(&host);
        let _host_permit = limiter
            .acquire_owned()
            .await
            .map_err(|e| FetchError::Unknown(e.to_string()))?;

        let response = self
            .client
            .get(parsed_url)
            .headers(headers.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        let status = response.status();
        if status != StatusCode::OK {
            debug!(status = status.as_u16(), "non-200 response");
            return Err(FetchError::from_status(status));
        }

        // Check content length before downloading
        if let Some(content_length) = response.content_length()
            && content_length > MAX_BODY_SIZE
        {
            return Err(FetchError::BodyTooLarge(content_length));
        }

        let headers = response.headers().clone();
        let content_type = headers
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .map(str::to_string);

        let body_bytes = response
            .bytes()
            .await
            .map_err(FetchError::from_reqwest_error)?;

        // Check body size after download (in case Content-Length was missing)
        if body_bytes.len() as u64 > MAX_BODY_SIZE {
            return Err(FetchError::BodyTooLarge(body_bytes.len() as u64));
        }

        let (body, encoding) = decode_body(content_type.as_deref(), &body_bytes);
        debug!(
            encoding = encoding.name(),
            bytes = body_bytes.len(),
            "body decoded"
        );

        Ok(SubResponse {
            url: url.to_string(),
            status,
            headers,
            body,
        })
    }
}
