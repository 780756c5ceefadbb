//! Image Source Fetching
//!
//! Pulls source images over HTTP(S). Every failure maps to a typed error the
//! orchestrator turns into a per-image skip; nothing here aborts a run.

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::runtime::Runtime;
use tracing::debug;

/// Errors while fetching one image source
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("unexpected status {0}")]
    Status(u16),
}

/// Blocking HTTP fetcher for image sources.
///
/// Drives an async reqwest client on an owned runtime so callers stay
/// synchronous, matching the sequential pipeline model.
pub struct ImageFetcher {
    client: reqwest::Client,
    runtime: Runtime,
}

impl ImageFetcher {
    /// Create a fetcher. A timeout of None means fetches block until the
    /// server responds or the connection drops.
    pub fn new(user_agent: &str, timeout_secs: Option<u64>) -> Result<Self> {
        let mut builder = reqwest::Client::builder().user_agent(user_agent.to_string());
        if let Some(secs) = timeout_secs {
            builder = builder.timeout(std::time::Duration::from_secs(secs));
        }

        let client = builder.build().context("Failed to create HTTP client")?;
        let runtime = Runtime::new().context("Failed to create tokio runtime")?;

        Ok(Self { client, runtime })
    }

    /// Fetch the raw bytes for one image URL.
    ///
    /// Success is strictly HTTP 200; redirects are followed by the client,
    /// any other final status is an error.
    pub fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        self.runtime.block_on(async {
            let response = self
                .client
                .get(url.trim())
                .send()
                .await
                .map_err(|e| FetchError::Request(e.to_string()))?;

            let status = response.status();
            if status != reqwest::StatusCode::OK {
                return Err(FetchError::Status(status.as_u16()));
            }

            let bytes = response
                .bytes()
                .await
                .map_err(|e| FetchError::Request(e.to_string()))?;

            debug!("Fetched {} bytes from {}", bytes.len(), url.trim());
            Ok(bytes.to_vec())
        })
    }
}
