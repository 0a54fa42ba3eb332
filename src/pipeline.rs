//! The poll loop: fetch, derive the timestamp, persist, sleep.

use crate::core::layout::{self, DATETIME_LAYOUT, Layout, RFC3339_LAYOUT};
use crate::core::{PersistedRow, SnapshotSource, Store};
use crate::providers::coindesk::DEFAULT_URL;
use anyhow::Result;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Fetching,
    Parsing,
    Persisting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Payload failed to decode or carried no update time.
    EmptySnapshot,
    UnparseableTimestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Inserted(PersistedRow),
    Skipped(SkipReason),
    PersistenceFailed(String),
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub url: String,
    pub input_layout: Layout,
    pub output_layout: Layout,
    pub interval: Duration,
}

impl PipelineSettings {
    pub fn new(url: &str, input_layout: Layout, output_layout: Layout) -> Self {
        Self {
            url: url.to_string(),
            input_layout,
            output_layout,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Default source, RFC 3339 input and `YYYY-MM-DD hh:mm:ss` output.
    pub fn defaults() -> Result<Self> {
        Ok(Self::new(
            DEFAULT_URL,
            Layout::new(RFC3339_LAYOUT)?,
            Layout::new(DATETIME_LAYOUT)?,
        ))
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

pub struct Pipeline {
    source: Box<dyn SnapshotSource>,
    store: Box<dyn Store>,
    settings: PipelineSettings,
    state: watch::Sender<PipelineState>,
}

impl Pipeline {
    pub fn new(
        source: Box<dyn SnapshotSource>,
        store: Box<dyn Store>,
        settings: PipelineSettings,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            source,
            store,
            settings,
            state,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    fn set_state(&self, state: PipelineState) {
        self.state.send_replace(state);
    }

    /// Logs the newest row already in the store. Never fails the caller.
    pub async fn report_last_row(&self) {
        match self.store.last_timestamp().await {
            Ok(Some(timestamp)) => info!(%timestamp, "Last persisted row"),
            Ok(None) => info!("Store has no persisted rows yet"),
            Err(e) => warn!(error = %format!("{e:#}"), "Could not read last persisted row"),
        }
    }

    /// Runs one fetch, parse and persist pass.
    ///
    /// Only a failed fetch is returned as `Err`; everything after the fetch is
    /// reported through the outcome.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        self.set_state(PipelineState::Fetching);
        let snapshot = self.source.fetch(&self.settings.url).await?;

        self.set_state(PipelineState::Parsing);
        info!(
            updated = %snapshot.time.updated,
            rate = %snapshot.rates.usd.rate,
            "Current usd to bitcoin exchange rate"
        );
        if snapshot.is_empty() {
            warn!("Snapshot has no update time, skipping insert");
            return Ok(CycleOutcome::Skipped(SkipReason::EmptySnapshot));
        }

        let timestamp = match layout::reformat(
            &snapshot.time.updated_iso,
            &self.settings.input_layout,
            &self.settings.output_layout,
        ) {
            Ok(timestamp) => timestamp,
            Err(e) => {
                warn!(
                    error = %format!("{e:#}"),
                    input_layout = %self.settings.input_layout,
                    "Could not parse update time, skipping insert"
                );
                return Ok(CycleOutcome::Skipped(SkipReason::UnparseableTimestamp));
            }
        };

        let row = PersistedRow::new(timestamp, &snapshot);
        self.set_state(PipelineState::Persisting);
        match self.store.insert_row(&row).await {
            Ok(()) => {
                info!(
                    timestamp = %row.timestamp,
                    usd = row.usd_rate,
                    eur = row.eur_rate,
                    gbp = row.gbp_rate,
                    "Successfully inserted row"
                );
                Ok(CycleOutcome::Inserted(row))
            }
            Err(e) => {
                let reason = format!("{e:#}");
                error!(error = %reason, "Something has gone wrong with inserting");
                Ok(CycleOutcome::PersistenceFailed(reason))
            }
        }
    }

    /// Polls until `shutdown` fires or its sender is dropped.
    ///
    /// A fetch failure on the very first cycle means the source was never
    /// reachable and is returned as an error; later fetch failures skip the
    /// cycle. The sleep is a fixed interval after each cycle.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            url = %self.settings.url,
            interval = ?self.settings.interval,
            "Starting poll loop"
        );

        let mut cycle: u64 = 0;
        loop {
            cycle += 1;
            let result = self.run_cycle().await;
            self.set_state(PipelineState::Idle);

            match result {
                Ok(outcome) => debug!(cycle, ?outcome, "Poll cycle finished"),
                Err(e) if cycle == 1 => {
                    error!(error = %format!("{e:#}"), "Price source unreachable on first poll");
                    return Err(e.context("Price source unreachable on first poll"));
                }
                Err(e) => warn!(cycle, error = %format!("{e:#}"), "Fetch failed, skipping cycle"),
            }

            tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => {}
                _ = shutdown.recv() => {
                    info!("Poll loop received shutdown signal");
                    break;
                }
            }
        }

        Ok(())
    }
}
