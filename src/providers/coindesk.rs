use crate::core::{PriceSnapshot, SnapshotSource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error, instrument};

pub const DEFAULT_URL: &str = "https://api.coindesk.com/v1/bpi/currentprice.json";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// HTTP client for the bitcoin price index endpoint.
pub struct CoindeskClient {
    client: reqwest::Client,
}

impl CoindeskClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(REQUEST_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("bpi-scraper/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

/// Decodes a response body, reporting and zeroing anything that isn't JSON of
/// the expected shape.
pub fn decode_snapshot(body: &str) -> PriceSnapshot {
    match serde_json::from_str(body) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!(
                error = %e,
                response = %body,
                "Failed to decode price snapshot"
            );
            PriceSnapshot::default()
        }
    }
}

#[async_trait]
impl SnapshotSource for CoindeskClient {
    #[instrument(name = "BpiFetch", skip(self), fields(url = %url))]
    async fn fetch(&self, url: &str) -> Result<PriceSnapshot> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?
            .error_for_status()
            .with_context(|| format!("Price source {url} returned an error status"))?;

        debug!(status = %response.status(), "Received price index response");

        let body = response
            .text()
            .await
            .with_context(|| format!("Failed to read response body from {url}"))?;

        Ok(decode_snapshot(&body))
    }
}
