//! Durable store for the indexer.
//!
//! Four SQLite tables back the store:
//!
//! | Table                          | Contents                                         |
//! |--------------------------------|--------------------------------------------------|
//! | `processed_signatures`         | ledger signatures that need no further handling  |
//! | `ethereum_transactions`        | finalized records keyed by Ethereum hash (JSON)  |
//! | `ethereum_solana_transactions` | ledger signature to Ethereum hash cross-index    |
//! | `indexer_state`                | scan boundary of the last completed pass         |
//!
//! The pool holds a single connection so all writes are serialized.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};

use crate::core::receipt::FinalizedRecord;
use crate::types::SignatureInfo;
use crate::utils::error::Result;

const SCAN_BOUNDARY_KEY: &str = "scan_boundary";

/// Abstract interface for storage operations.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn is_processed(&self, signature: &str) -> Result<bool>;
    /// Write-once: already processed signatures are left untouched.
    async fn mark_processed(&self, signatures: &[SignatureInfo]) -> Result<()>;
    /// Persists `record`, maps each of `signatures` to its hash and marks them
    /// processed, all in one database transaction.
    async fn commit_record(
        &self,
        record: &FinalizedRecord,
        signatures: &[SignatureInfo],
    ) -> Result<()>;
    async fn get_record(&self, hash: &str) -> Result<Option<FinalizedRecord>>;
    async fn get_record_hash_for_signature(&self, signature: &str) -> Result<Option<String>>;
    async fn processed_count(&self) -> Result<u64>;
    async fn record_count(&self) -> Result<u64>;
    async fn get_scan_boundary(&self) -> Result<Option<u64>>;
    async fn set_scan_boundary(&self, slot: u64) -> Result<()>;
}

fn slot_to_db(slot: u64) -> i64 {
    i64::try_from(slot).unwrap_or(i64::MAX)
}

fn slot_from_db(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

/// SQLite-backed store.
///
/// # Example
///
/// ```no_run
/// use evm_receipt_indexer::Storage;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let storage = Storage::new("sqlite://evm_indexer.db").await?;
/// storage.initialize().await?;
/// # Ok(())
/// # }
/// ```
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Opens (creating if missing) the database at `database_url`.
    ///
    /// The file is opened in WAL mode with `synchronous = FULL` so a committed
    /// transaction survives a crash.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if the URL is invalid or the
    /// connection fails.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full);

        // `sqlite::memory:` lives as long as its connection, so never recycle it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the tables if they don't already exist.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if a statement fails.
    pub async fn initialize(&self) -> Result<()> {
        let statements = [
            r"
            CREATE TABLE IF NOT EXISTS processed_signatures (
                signature TEXT PRIMARY KEY,
                slot INTEGER NOT NULL,
                indexed_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
            r"
            CREATE INDEX IF NOT EXISTS idx_processed_signatures_slot
            ON processed_signatures(slot)
            ",
            r"
            CREATE TABLE IF NOT EXISTS ethereum_transactions (
                hash TEXT PRIMARY KEY,
                slot INTEGER NOT NULL,
                record TEXT NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS ethereum_solana_transactions (
                signature TEXT PRIMARY KEY,
                hash TEXT NOT NULL
            )
            ",
            r"
            CREATE TABLE IF NOT EXISTS indexer_state (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            )
            ",
        ];

        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Checks whether `signature` is in the processed set.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if the query fails.
    pub async fn is_processed(&self, signature: &str) -> Result<bool> {
        let result = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM processed_signatures WHERE signature = ?)",
        )
        .bind(signature)
        .fetch_one(&self.pool)
        .await?;

        Ok(result)
    }

    /// Adds `signatures` to the processed set in one transaction.
    ///
    /// Signatures already present keep their original slot.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if an insert or the commit fails;
    /// none of the signatures are marked in that case.
    pub async fn mark_processed(&self, signatures: &[SignatureInfo]) -> Result<()> {
        if signatures.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for info in signatures {
            sqlx::query(
                "INSERT INTO processed_signatures (signature, slot) VALUES (?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(&info.signature)
            .bind(slot_to_db(info.slot))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        Ok(())
    }

    /// Stores `record`, maps each of `signatures` to its hash and marks them
    /// processed, atomically.
    ///
    /// A record with the same hash is replaced.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::SerializationError` if the record cannot be
    /// encoded, or `IndexerError::DatabaseError` if a statement or the commit
    /// fails. Nothing is written in either case.
    pub async fn commit_record(
        &self,
        record: &FinalizedRecord,
        signatures: &[SignatureInfo],
    ) -> Result<()> {
        let json = serde_json::to_string(record)?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO ethereum_transactions (hash, slot, record) VALUES (?, ?, ?)
            ON CONFLICT(hash) DO UPDATE SET slot = excluded.slot, record = excluded.record
            ",
        )
        .bind(&record.hash)
        .bind(slot_to_db(record.slot))
        .bind(json)
        .execute(&mut *tx)
        .await?;

        for info in signatures {
            sqlx::query(
                r"
                INSERT INTO ethereum_solana_transactions (signature, hash) VALUES (?, ?)
                ON CONFLICT(signature) DO UPDATE SET hash = excluded.hash
                ",
            )
            .bind(&info.signature)
            .bind(&record.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO processed_signatures (signature, slot) VALUES (?, ?) ON CONFLICT DO NOTHING",
            )
            .bind(&info.signature)
            .bind(slot_to_db(info.slot))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Looks up a finalized record by its `0x`-prefixed hash.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if the query fails, or
    /// `IndexerError::SerializationError` if the stored JSON does not decode.
    pub async fn get_record(&self, hash: &str) -> Result<Option<FinalizedRecord>> {
        let json =
            sqlx::query_scalar::<_, String>("SELECT record FROM ethereum_transactions WHERE hash = ?")
                .bind(hash)
                .fetch_optional(&self.pool)
                .await?;

        Ok(json.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    /// Hash of the record a ledger signature contributed to, if any.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if the query fails.
    pub async fn get_record_hash_for_signature(&self, signature: &str) -> Result<Option<String>> {
        let hash = sqlx::query_scalar::<_, String>(
            "SELECT hash FROM ethereum_solana_transactions WHERE signature = ?",
        )
        .bind(signature)
        .fetch_optional(&self.pool)
        .await?;

        Ok(hash)
    }

    /// Number of processed signatures.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if the query fails.
    pub async fn processed_count(&self) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM processed_signatures")
            .fetch_one(&self.pool)
            .await?;
        Ok(slot_from_db(count))
    }

    /// Number of finalized records.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if the query fails.
    pub async fn record_count(&self) -> Result<u64> {
        let count = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM ethereum_transactions")
            .fetch_one(&self.pool)
            .await?;
        Ok(slot_from_db(count))
    }

    /// Boundary slot left by the last completed pass, `None` before the first.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if the query fails.
    pub async fn get_scan_boundary(&self) -> Result<Option<u64>> {
        let value = sqlx::query_scalar::<_, i64>("SELECT value FROM indexer_state WHERE key = ?")
            .bind(SCAN_BOUNDARY_KEY)
            .fetch_optional(&self.pool)
            .await?;

        Ok(value.map(slot_from_db))
    }

    /// Records `slot` as the boundary for the next pass.
    ///
    /// # Errors
    ///
    /// Returns `IndexerError::DatabaseError` if the upsert fails.
    pub async fn set_scan_boundary(&self, slot: u64) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO indexer_state (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            ",
        )
        .bind(SCAN_BOUNDARY_KEY)
        .bind(slot_to_db(slot))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Closes the pool, waiting for open connections to finish.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl StorageBackend for Storage {
    async fn initialize(&self) -> Result<()> {
        self.initialize().await
    }

    async fn is_processed(&self, signature: &str) -> Result<bool> {
        self.is_processed(signature).await
    }

    async fn mark_processed(&self, signatures: &[SignatureInfo]) -> Result<()> {
        self.mark_processed(signatures).await
    }

    async fn commit_record(
        &self,
        record: &FinalizedRecord,
        signatures: &[SignatureInfo],
    ) -> Result<()> {
        self.commit_record(record, signatures).await
    }

    async fn get_record(&self, hash: &str) -> Result<Option<FinalizedRecord>> {
        self.get_record(hash).await
    }

    async fn get_record_hash_for_signature(&self, signature: &str) -> Result<Option<String>> {
        self.get_record_hash_for_signature(signature).await
    }

    async fn processed_count(&self) -> Result<u64> {
        self.processed_count().await
    }

    async fn record_count(&self) -> Result<u64> {
        self.record_count().await
    }

    async fn get_scan_boundary(&self) -> Result<Option<u64>> {
        self.get_scan_boundary().await
    }

    async fn set_scan_boundary(&self, slot: u64) -> Result<()> {
        self.set_scan_boundary(slot).await
    }
}
