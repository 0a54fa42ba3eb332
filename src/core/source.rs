//! Price source abstraction

use crate::core::snapshot::PriceSnapshot;
use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetches and decodes one payload from `url`.
    ///
    /// `Err` means the source could not be reached. A body that fails to
    /// decode is reported by the implementation and yields
    /// `PriceSnapshot::default()`.
    async fn fetch(&self, url: &str) -> Result<PriceSnapshot>;
}
