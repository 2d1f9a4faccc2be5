//! Pass driver: backward scans over the EVM loader's signature history.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::config::IndexerConfig;
use crate::core::correlation::{Correlator, PassState};
use crate::core::fetcher::Fetcher;
use crate::storage::{Storage, StorageBackend};
use crate::types::{LedgerTransaction, SignatureInfo};
use crate::utils::error::Result;
use crate::utils::logging;
use crate::utils::retry::RetryingRpcProvider;
use crate::utils::rpc::DefaultRpcProvider;

/// What one pass saw and did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassSummary {
    /// Signatures visited, processed or not.
    pub scanned: usize,
    /// Transaction bodies pulled from the RPC.
    pub fetched: usize,
    pub records_written: usize,
    pub calls_dropped: usize,
    /// Holder buffers still unresolved when the pass ended.
    pub pending_holders: usize,
    /// Storage accounts still unresolved when the pass ended.
    pub pending_continuations: usize,
    /// Boundary recorded for the next pass.
    pub boundary: u64,
    /// The pass ended on the boundary rule rather than by exhausting history.
    pub stopped_at_boundary: bool,
    /// The pass was cut short by shutdown; the boundary was left untouched.
    pub interrupted: bool,
}

/// Rebuilds Ethereum transactions and receipts from EVM loader activity.
///
/// Each pass walks the program's signatures newest to oldest, correlating
/// fragments of multi-transaction calls in memory and committing finalized
/// records to storage. Passes are separated by `poll_interval_secs`.
pub struct EvmIndexer {
    config: IndexerConfig,
    storage: Arc<dyn StorageBackend>,
    fetcher: Arc<Fetcher>,
    correlator: Correlator,
    cancellation_token: CancellationToken,
}

impl EvmIndexer {
    /// Opens the SQLite store and an RPC client with retries.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use evm_receipt_indexer::{EvmIndexer, IndexerConfigBuilder};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let config = IndexerConfigBuilder::new()
    ///     .with_rpc("http://127.0.0.1:8899")
    ///     .with_database("sqlite://evm_indexer.db")
    ///     .program_id("eeLSJgWzzxrqKv1UxtRVVH8FX3qCQWUs9QuAjJpETGU")
    ///     .build()?;
    ///
    /// let indexer = EvmIndexer::new(config).await?;
    /// let summary = indexer.run_pass().await?;
    /// println!("{} records", summary.records_written);
    /// # Ok(())
    /// # }
    /// ```
    ///
    /// # Errors
    ///
    /// Fails if the database cannot be opened or its schema created.
    pub async fn new(config: IndexerConfig) -> Result<Self> {
        let storage = Arc::new(Storage::new(&config.database_url).await?);
        storage.initialize().await?;
        Ok(Self::new_with_storage(config, storage))
    }

    /// Creates an indexer over a caller-supplied storage backend.
    ///
    /// The backend is assumed to be initialized.
    #[must_use]
    pub fn new_with_storage(config: IndexerConfig, storage: Arc<dyn StorageBackend>) -> Self {
        let provider = RetryingRpcProvider::new(
            DefaultRpcProvider::new_with_commitment(&config.rpc_url, config.commitment()),
            config.retry.clone(),
        );
        let fetcher = Fetcher::with_provider(Arc::new(provider), config.commitment(), config.program_id)
            .with_page_size(config.page_size)
            .with_concurrency(config.fetch_concurrency);
        Self::with_components(config, Arc::new(fetcher), storage)
    }

    /// Creates an indexer from prebuilt parts.
    #[must_use]
    pub fn with_components(
        config: IndexerConfig,
        fetcher: Arc<Fetcher>,
        storage: Arc<dyn StorageBackend>,
    ) -> Self {
        let correlator = Correlator::new(config.program_id, config.holder_capacity);
        Self {
            config,
            storage,
            fetcher,
            correlator,
            cancellation_token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    /// Triggers a graceful shutdown programmatically.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
    }

    /// Returns a clone of the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Runs one backward scan from the newest signature.
    ///
    /// Already processed signatures are skipped without fetching. The scan stops
    /// at the first unprocessed signature at or below the previous boundary, but
    /// only while no holder or continuation is outstanding; otherwise it keeps
    /// going until history is exhausted. Bodies are fetched concurrently in
    /// chunks and applied strictly newest to oldest.
    ///
    /// In-memory correlation state is discarded when the pass returns.
    ///
    /// # Errors
    ///
    /// RPC and storage failures abort the pass without moving the boundary.
    pub async fn run_pass(&self) -> Result<PassSummary> {
        let previous = self.storage.get_scan_boundary().await?;
        let head = self.fetcher.get_slot().await?;
        tracing::debug!(head_slot = head, previous_boundary = ?previous, "Starting pass");

        let mut state = PassState::new();
        let mut summary = PassSummary::default();
        let mut max_observed = 0u64;
        let mut before: Option<String> = None;

        'pages: loop {
            if self.cancellation_token.is_cancelled() {
                summary.interrupted = true;
                break;
            }

            let page = self.fetcher.fetch_signatures_page(before.as_deref()).await?;
            let Some(last) = page.last() else {
                break;
            };
            before = Some(last.signature.clone());
            tracing::trace!(size = page.len(), cursor = ?before, "Fetched signature page");

            for chunk in page.chunks(self.fetcher.concurrency()) {
                let mut entries = Vec::with_capacity(chunk.len());
                for info in chunk {
                    let done = self.storage.is_processed(&info.signature).await?;
                    entries.push((info, done));
                }

                let mut fetched = self
                    .prefetch(&entries, previous, state.is_empty())
                    .await?;
                summary.fetched += fetched.len();

                for (info, done) in entries {
                    summary.scanned += 1;
                    if done {
                        max_observed = max_observed.max(info.slot);
                        continue;
                    }

                    if previous.is_some_and(|boundary| info.slot <= boundary) && state.is_empty()
                    {
                        tracing::debug!(slot = info.slot, signature = %info.signature, "Reached previous boundary");
                        summary.stopped_at_boundary = true;
                        break 'pages;
                    }
                    max_observed = max_observed.max(info.slot);

                    let tx = match fetched.remove(&info.signature) {
                        Some(tx) => tx,
                        None => {
                            summary.fetched += 1;
                            self.fetcher.fetch_transaction(&info.signature).await?
                        }
                    };

                    let outcome = self
                        .correlator
                        .apply(&mut state, &tx, self.storage.as_ref())
                        .await?;
                    summary.records_written += outcome.records_written;
                    summary.calls_dropped += outcome.calls_dropped;
                }
            }
        }

        summary.pending_holders = state.pending_holders();
        summary.pending_continuations = state.pending_continuations();
        summary.boundary = previous.unwrap_or(0).max(max_observed);

        if summary.interrupted {
            logging::log(logging::LogLevel::Warning, "Pass interrupted, boundary unchanged");
        } else {
            self.storage.set_scan_boundary(summary.boundary).await?;
        }

        Ok(summary)
    }

    /// Fetches the bodies a chunk is expected to need.
    ///
    /// With no outstanding state, signatures at or below the boundary are left
    /// out: the first of them ends the pass unless an earlier entry in the chunk
    /// opens a correlation, in which case it is fetched on demand.
    async fn prefetch(
        &self,
        entries: &[(&SignatureInfo, bool)],
        boundary: Option<u64>,
        state_empty: bool,
    ) -> Result<HashMap<String, LedgerTransaction>> {
        let wanted: Vec<SignatureInfo> = entries
            .iter()
            .filter(|(info, done)| {
                !done && !(state_empty && boundary.is_some_and(|b| info.slot <= b))
            })
            .map(|(info, _)| (*info).clone())
            .collect();

        if wanted.is_empty() {
            return Ok(HashMap::new());
        }

        let transactions = self.fetcher.fetch_transactions(&wanted).await?;
        Ok(transactions
            .into_iter()
            .map(|tx| (tx.signature.clone(), tx))
            .collect())
    }

    /// Runs passes until shutdown, sleeping `poll_interval_secs` between them.
    ///
    /// Installs a Ctrl+C handler that cancels the indexer's token. A failed
    /// pass is logged and retried after the idle delay.
    ///
    /// # Errors
    ///
    /// Currently always returns `Ok(())` once cancelled.
    pub async fn start(&self) -> Result<()> {
        let token = self.cancellation_token.clone();

        tokio::spawn({
            let token = token.clone();
            async move {
                if let Ok(()) = tokio::signal::ctrl_c().await {
                    logging::log(logging::LogLevel::Info, "Received Ctrl+C, shutting down...");
                    token.cancel();
                }
            }
        });

        logging::log_startup(
            &self.config.program_id.to_string(),
            &self.config.rpc_url,
            &self.config.database_url,
            self.config.poll_interval_secs,
        );

        let idle = Duration::from_secs(self.config.poll_interval_secs);

        loop {
            if token.is_cancelled() {
                logging::log(logging::LogLevel::Info, "Graceful shutdown complete.");
                break;
            }

            let started = Instant::now();
            match self.run_pass().await {
                Ok(summary) => {
                    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                    logging::log_pass(&summary, duration_ms);
                }
                Err(e) => logging::log_error("Pass failed (retrying next cycle)", &e.to_string()),
            }

            tokio::select! {
                _ = token.cancelled() => {
                    logging::log(logging::LogLevel::Info, "Graceful shutdown initiated...");
                }
                _ = tokio::time::sleep(idle) => {}
            }
        }

        Ok(())
    }
}
