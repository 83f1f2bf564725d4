//! # Data Source Module
//!
//! A source knows how to fetch the raw bytes of one dataset and nothing else.
//! Parsing and applying the bytes is the streamer's job.
//!
//! ## Contained Modules:
//! - **`local`**: reads a file from the local filesystem.
//! - **`http`** (feature `http`): GETs a URL with automatic retries and
//!   exponential backoff.
//!
//! `StaticSource` lives here too; it serves bytes held in memory, which is handy
//! for pre-warming and for tests.
//!
//! Every fetch takes a `CancellationToken`. Implementations must return
//! `FetchError::Cancelled` promptly once the token fires, even mid-request.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

use std::path::PathBuf;

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Local filesystem source.
pub mod local;
/// HTTP source with retry middleware.
#[cfg(feature = "http")]
pub mod http;

pub use local::LocalFileSource;
#[cfg(feature = "http")]
pub use http::HttpSource;

/// # Fetch Error
#[derive(Debug, Error)]
pub enum FetchError {
    /// Reading a local file failed.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The file that could not be read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The HTTP request itself failed.
    #[error("http request failed: {0}")]
    Http(String),
    /// The server answered with a non-success status.
    #[error("http status {status} from {url}")]
    Status {
        /// Numeric HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },
    /// The caller cancelled the fetch.
    #[error("fetch cancelled")]
    Cancelled,
    /// The fetch did not finish within the configured deadline.
    #[error("fetch timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// # Source
#[async_trait]
pub trait Source: Send + Sync {
    /// Human-readable location used in logs (a path, a URL).
    fn describe(&self) -> String;

    /// Fetches the full current content of the source.
    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<u8>, FetchError>;
}

/// # Static Source
///
/// Serves an in-memory buffer that can be replaced at any time.
#[derive(Debug, Default)]
pub struct StaticSource {
    data: RwLock<Vec<u8>>,
}

impl StaticSource {
    /// Creates a source serving `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: RwLock::new(data.into()),
        }
    }

    /// Replaces the served buffer; the next fetch returns it.
    pub fn set(&self, data: impl Into<Vec<u8>>) {
        *self.data.write() = data.into();
    }
}

#[async_trait]
impl Source for StaticSource {
    fn describe(&self) -> String {
        "static".to_string()
    }

    async fn fetch(&self, cancel: &CancellationToken) -> Result<Vec<u8>, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        Ok(self.data.read().clone())
    }
}
