//! # HTTP Source
//!
//! Fetches a dataset with a plain GET. The client is built on `reqwest` and
//! `reqwest-middleware`, with `reqwest-retry` retrying transient failures
//! (connection errors, 5xx, 429) using exponential backoff.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use tokio_util::sync::CancellationToken;
use url::Url;

use super::{FetchError, Source};

/// Transient failures are retried this many times before the fetch fails.
const MAX_RETRIES: u32 = 3;

/// # HTTP Source
pub struct HttpSource {
    /// The middleware-enabled client, reused across fetches for connection pooling.
    inner: ClientWithMiddleware,
    /// Absolute URL of the dataset.
    url: Url,
    /// An optional Bearer token used for authorization.
    auth_token: Option<String>,
}

impl HttpSource {
    /// Creates a source for `url`, which must be absolute.
    pub fn new(url: &str, auth_token: Option<String>) -> Result<Self, url::ParseError> {
        let url = Url::parse(url)?;
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let inner = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            inner,
            url,
            auth_token,
        })
    }

    async fn get(&self) -> Result<Vec<u8>, FetchError> {
        let mut req = self.inner.get(self.url.clone());
        if let Some(token) = &self.auth_token {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let response = req
            .send()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: self.url.to_string(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Source for HttpSource {
    fn describe(&self) -> String {
        self.url.to_string()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<u8>, FetchError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            body = self.get() => body,
        }
    }
}
