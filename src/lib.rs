pub mod core;
pub mod pipeline;
pub mod providers;
pub mod store;

use crate::pipeline::{Pipeline, PipelineSettings};
use crate::providers::CoindeskClient;
use crate::store::StoreClient;
use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::info;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Database config file; the default location is used when `None`.
    pub config_path: Option<PathBuf>,
    pub account: String,
    pub table: String,
    pub settings: PipelineSettings,
}

/// Resolves the account, then polls until `shutdown` fires.
///
/// Config and table errors are returned before the first poll.
pub async fn run(options: RunOptions, shutdown: broadcast::Receiver<()>) -> Result<()> {
    info!("BPI scraper starting...");

    let descriptor =
        crate::core::config::load_account(options.config_path.as_deref(), &options.account)?;
    let store = StoreClient::new(descriptor, &options.table)?;
    let source = CoindeskClient::new()?;

    let pipeline = Pipeline::new(Box::new(source), Box::new(store), options.settings);
    pipeline.report_last_row().await;
    pipeline.run(shutdown).await
}
