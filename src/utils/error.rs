//! Error types for indexer operations.
//!
//! This module defines a comprehensive error enumeration using `thiserror`
//! to provide clear, actionable error reporting throughout the crate.

use thiserror::Error;

/// Custom error type for indexer operations.
///
/// This error type covers all failure modes of the indexer, from configuration
/// issues to runtime failures in RPC communication, storage operations,
/// instruction decoding and signed-transaction recovery.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Errors encountered during database operations.
    ///
    /// This variant automatically wraps `sqlx::Error` using the `#[from]` attribute,
    /// allowing seamless error propagation with the `?` operator.
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    /// Errors while decoding instruction payloads or result markers.
    ///
    /// The correlation engine treats these as "skip this instruction" and never
    /// aborts a pass because of them.
    #[error("Decoding error: {0}")]
    DecodingError(String),

    /// Errors while rebuilding a signed Ethereum transaction from an unsigned
    /// message and a detached signature.
    #[error("Recovery error: {0}")]
    RecoveryError(String),

    /// Errors interacting with the Solana RPC.
    ///
    /// This covers network failures, timeout errors, or unexpected responses
    /// from the Solana RPC endpoint.
    #[error("RPC error: {0}")]
    RpcError(String),

    /// Errors from the Solana RPC client.
    #[error("RPC client error: {0}")]
    RpcClientError(Box<solana_client::client_error::ClientError>),

    /// Errors related to configuration.
    ///
    /// This includes missing environment variables, invalid configuration values,
    /// or failures in parsing configuration data.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Errors from environment variable operations.
    #[error("Environment variable error: {0}")]
    EnvVarError(#[from] std::env::VarError),

    /// Errors during Solana public key parsing.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(#[from] solana_sdk::pubkey::ParsePubkeyError),

    /// Errors while (de)serializing persisted records.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic errors for operations that don't fit other categories.
    #[error("Internal error: {0}")]
    InternalError(String),

    /// All retry attempts were exhausted on a transient error.
    #[error("Retry exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Total number of attempts (initial call + retries).
        attempts: u32,
        /// String representation of the last error.
        last_error: String,
    },
}

/// Type alias for Results using `IndexerError`.
pub type Result<T> = std::result::Result<T, IndexerError>;

impl From<solana_client::client_error::ClientError> for IndexerError {
    fn from(err: solana_client::client_error::ClientError) -> Self {
        IndexerError::RpcClientError(Box::new(err))
    }
}

impl From<rlp::DecoderError> for IndexerError {
    fn from(err: rlp::DecoderError) -> Self {
        IndexerError::RecoveryError(format!("invalid RLP: {err}"))
    }
}

impl From<secp256k1::Error> for IndexerError {
    fn from(err: secp256k1::Error) -> Self {
        IndexerError::RecoveryError(format!("invalid signature: {err}"))
    }
}
