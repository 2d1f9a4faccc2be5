//! `evm-receipt-indexer` rebuilds Ethereum transactions and receipts from the
//! instructions an EVM loader program executes on Solana.
//!
//! A logical Ethereum call can arrive in one Solana transaction or be spread
//! across many: chunked writes into a holder account, a partial call, any
//! number of continuations, and possibly a cancel. The indexer scans the
//! program's signature history newest to oldest, correlates those fragments in
//! memory, recovers the signed transaction from the unsigned RLP message and
//! its detached signature, and persists a receipt-shaped record keyed by the
//! Ethereum transaction hash.
//!
//! # Quick Start
//!
//! ```no_run
//! use evm_receipt_indexer::{EvmIndexer, IndexerConfigBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     dotenvy::dotenv().ok();
//!
//!     let config = IndexerConfigBuilder::from_env()?
//!         .with_poll_interval(30)
//!         .build()?;
//!
//!     let indexer = EvmIndexer::new(config).await?;
//!     indexer.start().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! 1. **Fetcher** - Pages signatures and fetches transaction bodies over RPC
//! 2. **Instruction classifier** - Decodes EVM loader opcodes and payloads
//! 3. **Result extractor** - Reads return and event markers from inner instructions
//! 4. **Correlator** - Joins holder writes, partial calls, continuations and cancels
//! 5. **Recovery** - Rebuilds the signed RLP transaction and its sender
//! 6. **Storage** - SQLite tables for processed signatures, records and the scan boundary

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub use crate::config::{CommitmentLevel, IndexerConfig, IndexerConfigBuilder, RetryConfig};
pub use crate::core::correlation::{Correlator, PassState};
pub use crate::core::fetcher::Fetcher;
pub use crate::core::indexer::{EvmIndexer, PassSummary};
pub use crate::core::instruction::{EvmInstruction, classify};
pub use crate::core::receipt::{FinalizedRecord, synthesize_record};
pub use crate::core::recovery::{RecoveredTransaction, recover_signed_transaction};
pub use crate::core::results::{CallResult, EventLog, TxStatus, extract_call_result};
pub use crate::storage::{Storage, StorageBackend};
pub use crate::types::{LedgerInstruction, LedgerTransaction, SignatureInfo};
pub use crate::utils::error::{IndexerError, Result};

pub mod config;
pub mod core;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod utils;
