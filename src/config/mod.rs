//! Configuration management for the EVM receipt indexer.
//!
//! Configuration is assembled with [`IndexerConfigBuilder`], either fluently or
//! from environment variables via [`IndexerConfigBuilder::from_env`].

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;

use crate::utils::error::{IndexerError, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://evm_indexer.db";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;
/// Largest page `getSignaturesForAddress` will serve.
pub const MAX_PAGE_SIZE: usize = 1000;
pub const DEFAULT_FETCH_CONCURRENCY: usize = 8;
/// Size of the in-memory copy of a holder account.
pub const DEFAULT_HOLDER_CAPACITY: usize = 128 * 1024;

/// Transaction commitment level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CommitmentLevel {
    Processed,
    #[default]
    Confirmed,
    Finalized,
}

impl From<CommitmentLevel> for CommitmentConfig {
    fn from(level: CommitmentLevel) -> Self {
        match level {
            CommitmentLevel::Processed => CommitmentConfig::processed(),
            CommitmentLevel::Confirmed => CommitmentConfig::confirmed(),
            CommitmentLevel::Finalized => CommitmentConfig::finalized(),
        }
    }
}

impl FromStr for CommitmentLevel {
    type Err = IndexerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "processed" => Ok(Self::Processed),
            "confirmed" => Ok(Self::Confirmed),
            "finalized" => Ok(Self::Finalized),
            other => Err(IndexerError::ConfigError(format!(
                "Unknown commitment level '{other}'"
            ))),
        }
    }
}

/// Backoff policy applied by [`crate::utils::retry::RetryingRpcProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub max_backoff_ms: u64,
    /// Scale each delay by a factor in `[0.75, 1.25]`.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff_ms: 250,
            backoff_multiplier: 2.0,
            max_backoff_ms: 10_000,
            jitter: true,
        }
    }
}

/// Runtime configuration of an [`crate::EvmIndexer`].
#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Solana JSON-RPC endpoint.
    pub rpc_url: String,

    /// SQLite connection URL (e.g. `sqlite://evm_indexer.db`, `sqlite::memory:`).
    pub database_url: String,

    /// Address of the EVM loader program whose history is scanned.
    pub program_id: Pubkey,

    /// Idle delay between two passes.
    pub poll_interval_secs: u64,

    /// Signatures requested per `getSignaturesForAddress` page.
    pub page_size: usize,

    /// Upper bound on concurrent `getTransaction` calls.
    pub fetch_concurrency: usize,

    /// Holder buffer capacity in bytes.
    pub holder_capacity: usize,

    pub commitment_level: CommitmentLevel,

    pub retry: RetryConfig,
}

impl IndexerConfig {
    #[must_use]
    pub fn commitment(&self) -> CommitmentConfig {
        self.commitment_level.into()
    }
}

/// Builder for [`IndexerConfig`].
///
/// RPC URL, database URL and program id are required; everything else falls
/// back to a default.
///
/// # Example
///
/// ```no_run
/// use evm_receipt_indexer::IndexerConfigBuilder;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = IndexerConfigBuilder::new()
///     .with_rpc("http://127.0.0.1:8899")
///     .with_database("sqlite://evm_indexer.db")
///     .program_id("eeLSJgWzzxrqKv1UxtRVVH8FX3qCQWUs9QuAjJpETGU")
///     .with_poll_interval(30)
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct IndexerConfigBuilder {
    rpc_url: Option<String>,
    database_url: Option<String>,
    program_id: Option<String>,
    poll_interval_secs: Option<u64>,
    page_size: Option<usize>,
    fetch_concurrency: Option<usize>,
    holder_capacity: Option<usize>,
    commitment_level: Option<CommitmentLevel>,
    retry: Option<RetryConfig>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: FromStr>(name: &str) -> Result<Option<T>> {
    env_var(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|_| IndexerError::ConfigError(format!("Invalid value for {name}: '{raw}'")))
        })
        .transpose()
}

impl IndexerConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a builder from the process environment.
    ///
    /// | Variable              | Field                |
    /// |-----------------------|----------------------|
    /// | `RPC_URL` / `SOLANA_URL` | `rpc_url`         |
    /// | `EVM_LOADER`          | `program_id`         |
    /// | `DATABASE_URL`        | `database_url`       |
    /// | `POLL_INTERVAL_SECS`  | `poll_interval_secs` |
    /// | `PAGE_SIZE`           | `page_size`          |
    /// | `FETCH_CONCURRENCY`   | `fetch_concurrency`  |
    /// | `COMMITMENT`          | `commitment_level`   |
    ///
    /// Missing variables leave the field unset so later setters or defaults apply.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::ConfigError` when a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rpc_url: env_var("RPC_URL").or_else(|| env_var("SOLANA_URL")),
            database_url: env_var("DATABASE_URL"),
            program_id: env_var("EVM_LOADER"),
            poll_interval_secs: parse_env("POLL_INTERVAL_SECS")?,
            page_size: parse_env("PAGE_SIZE")?,
            fetch_concurrency: parse_env("FETCH_CONCURRENCY")?,
            holder_capacity: None,
            commitment_level: parse_env("COMMITMENT")?,
            retry: None,
        })
    }

    #[must_use]
    pub fn with_rpc(mut self, url: impl Into<String>) -> Self {
        self.rpc_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_database(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Sets the EVM loader program id (parsed into a `Pubkey` by `build`).
    #[must_use]
    pub fn program_id(mut self, id: impl Into<String>) -> Self {
        self.program_id = Some(id.into());
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, secs: u64) -> Self {
        self.poll_interval_secs = Some(secs);
        self
    }

    /// Signatures per page; clamped to `1..=1000` by `build`.
    #[must_use]
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }

    #[must_use]
    pub fn with_fetch_concurrency(mut self, workers: usize) -> Self {
        self.fetch_concurrency = Some(workers);
        self
    }

    #[must_use]
    pub fn with_holder_capacity(mut self, bytes: usize) -> Self {
        self.holder_capacity = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_commitment(mut self, level: CommitmentLevel) -> Self {
        self.commitment_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::ConfigError` if:
    /// - the RPC URL or program id is missing
    /// - the program id is not a valid `Pubkey`
    /// - the holder capacity is too small to hold a signature and length prefix
    pub fn build(self) -> Result<IndexerConfig> {
        let rpc_url = self
            .rpc_url
            .ok_or_else(|| IndexerError::ConfigError("RPC URL is required".to_string()))?;

        let program_id_str = self
            .program_id
            .ok_or_else(|| IndexerError::ConfigError("Program ID is required".to_string()))?;

        let program_id = Pubkey::from_str(&program_id_str).map_err(|e| {
            IndexerError::ConfigError(format!("Invalid program ID '{program_id_str}': {e}"))
        })?;

        let holder_capacity = self.holder_capacity.unwrap_or(DEFAULT_HOLDER_CAPACITY);
        if holder_capacity < crate::core::correlation::HOLDER_HEADER_LEN {
            return Err(IndexerError::ConfigError(format!(
                "Holder capacity {holder_capacity} is smaller than the {} byte header",
                crate::core::correlation::HOLDER_HEADER_LEN
            )));
        }

        Ok(IndexerConfig {
            rpc_url,
            database_url: self
                .database_url
                .unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            program_id,
            poll_interval_secs: self.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
            page_size: self.page_size.unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
            fetch_concurrency: self
                .fetch_concurrency
                .unwrap_or(DEFAULT_FETCH_CONCURRENCY)
                .max(1),
            holder_capacity,
            commitment_level: self.commitment_level.unwrap_or_default(),
            retry: self.retry.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROGRAM: &str = "11111111111111111111111111111111";

    #[test]
    fn test_builder_missing_required_fields() {
        assert!(IndexerConfigBuilder::new().build().is_err());
        assert!(
            IndexerConfigBuilder::new()
                .with_rpc("http://127.0.0.1:8899")
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_builder_invalid_program_id() {
        let result = IndexerConfigBuilder::new()
            .with_rpc("http://127.0.0.1:8899")
            .program_id("invalid_pubkey")
            .build();

        match result {
            Err(IndexerError::ConfigError(msg)) => assert!(msg.contains("Invalid program ID")),
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }

    #[test]
    fn test_builder_defaults() {
        let config = IndexerConfigBuilder::new()
            .with_rpc("http://127.0.0.1:8899")
            .program_id(PROGRAM)
            .build()
            .unwrap();

        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.poll_interval_secs, 60);
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.fetch_concurrency, 8);
        assert_eq!(config.holder_capacity, 128 * 1024);
        assert_eq!(config.commitment_level, CommitmentLevel::Confirmed);
        assert_eq!(config.retry, RetryConfig::default());
    }

    #[test]
    fn test_builder_clamps_page_size_and_concurrency() {
        let config = IndexerConfigBuilder::new()
            .with_rpc("http://127.0.0.1:8899")
            .program_id(PROGRAM)
            .with_page_size(5000)
            .with_fetch_concurrency(0)
            .build()
            .unwrap();
        assert_eq!(config.page_size, 1000);
        assert_eq!(config.fetch_concurrency, 1);

        let config = IndexerConfigBuilder::new()
            .with_rpc("http://127.0.0.1:8899")
            .program_id(PROGRAM)
            .with_page_size(0)
            .build()
            .unwrap();
        assert_eq!(config.page_size, 1);
    }

    #[test]
    fn test_builder_rejects_tiny_holder_capacity() {
        let result = IndexerConfigBuilder::new()
            .with_rpc("http://127.0.0.1:8899")
            .program_id(PROGRAM)
            .with_holder_capacity(10)
            .build();
        assert!(matches!(result, Err(IndexerError::ConfigError(_))));
    }

    #[test]
    fn test_commitment_level_parsing() {
        assert_eq!(
            "Finalized".parse::<CommitmentLevel>().unwrap(),
            CommitmentLevel::Finalized
        );
        assert!("eventual".parse::<CommitmentLevel>().is_err());
        assert_eq!(
            CommitmentConfig::from(CommitmentLevel::Processed),
            CommitmentConfig::processed()
        );
    }
}
