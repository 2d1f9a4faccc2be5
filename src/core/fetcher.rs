//! Ledger fetcher.
//!
//! Pages backward through the signatures that reference the EVM loader program
//! and turns JSON-encoded transactions into [`LedgerTransaction`]s with account
//! indices resolved to public keys and instruction data base58-decoded.
//!
//! Retries for transient errors are handled by the [`RpcProvider`] passed at
//! construction time, typically a
//! [`RetryingRpcProvider`](crate::utils::retry::RetryingRpcProvider).

use std::str::FromStr;
use std::sync::Arc;

use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signature;
use solana_transaction_status::option_serializer::OptionSerializer;
use solana_transaction_status::{
    EncodedConfirmedTransactionWithStatusMeta, EncodedTransaction, UiCompiledInstruction,
    UiInstruction, UiMessage,
};
use tokio::sync::Semaphore;

use crate::types::{InnerInstructionGroup, LedgerInstruction, LedgerTransaction, SignatureInfo};
use crate::utils::error::{IndexerError, Result};
use crate::utils::rpc::{DefaultRpcProvider, RpcProvider};

/// Reads the EVM loader's history through an [`RpcProvider`].
///
/// Signature pages are requested `page_size` at a time; transaction bodies are
/// fetched with at most `concurrency` requests in flight.
pub struct Fetcher {
    rpc: Arc<dyn RpcProvider>,
    commitment: CommitmentConfig,
    address: Pubkey,
    page_size: usize,
    concurrency: usize,
}

fn parse_signature(signature: &str) -> Result<Signature> {
    Signature::from_str(signature)
        .map_err(|e| IndexerError::DecodingError(format!("Invalid signature '{signature}': {e}")))
}

fn option_serializer<T>(value: OptionSerializer<T>) -> Option<T> {
    match value {
        OptionSerializer::Some(value) => Some(value),
        OptionSerializer::None | OptionSerializer::Skip => None,
    }
}

fn parse_keys(keys: &[String]) -> Result<Vec<Pubkey>> {
    keys.iter()
        .map(|key| Pubkey::from_str(key).map_err(IndexerError::from))
        .collect()
}

fn resolve_instruction(
    signature: &str,
    keys: &[Pubkey],
    ix: &UiCompiledInstruction,
) -> Option<LedgerInstruction> {
    let program_id = keys.get(usize::from(ix.program_id_index)).copied();
    let accounts = ix
        .accounts
        .iter()
        .map(|index| keys.get(usize::from(*index)).copied())
        .collect::<Option<Vec<_>>>();
    let data = bs58::decode(&ix.data).into_vec().ok();

    match (program_id, accounts, data) {
        (Some(program_id), Some(accounts), Some(data)) => Some(LedgerInstruction {
            program_id,
            accounts,
            data,
        }),
        _ => {
            tracing::debug!(signature, "Dropping unresolvable instruction");
            None
        }
    }
}

/// Converts an RPC transaction into the ledger model.
///
/// The account key space is the message's static keys followed by the
/// writable and then readonly addresses loaded from lookup tables.
///
/// # Errors
///
/// `DecodingError` if the transaction is not JSON encoded with a raw message;
/// `InvalidPublicKey` if an account key does not parse.
pub fn decode_transaction(
    signature: &str,
    encoded: EncodedConfirmedTransactionWithStatusMeta,
) -> Result<LedgerTransaction> {
    let EncodedTransaction::Json(ui_tx) = encoded.transaction.transaction else {
        return Err(IndexerError::DecodingError(format!(
            "Transaction {signature} is not JSON encoded"
        )));
    };
    let UiMessage::Raw(message) = ui_tx.message else {
        return Err(IndexerError::DecodingError(format!(
            "Transaction {signature} has a parsed message, expected raw"
        )));
    };

    let mut keys = parse_keys(&message.account_keys)?;
    let mut failed = false;
    let mut inner_raw = Vec::new();
    let mut log_messages = Vec::new();

    if let Some(meta) = encoded.transaction.meta {
        failed = meta.err.is_some();
        if let Some(loaded) = option_serializer(meta.loaded_addresses) {
            keys.extend(parse_keys(&loaded.writable)?);
            keys.extend(parse_keys(&loaded.readonly)?);
        }
        inner_raw = option_serializer(meta.inner_instructions).unwrap_or_default();
        log_messages = option_serializer(meta.log_messages).unwrap_or_default();
    }

    let instructions = message
        .instructions
        .iter()
        .filter_map(|ix| resolve_instruction(signature, &keys, ix))
        .collect();

    let inner_instructions = inner_raw
        .into_iter()
        .map(|group| InnerInstructionGroup {
            index: group.index,
            instructions: group
                .instructions
                .iter()
                .filter_map(|ix| match ix {
                    UiInstruction::Compiled(ix) => resolve_instruction(signature, &keys, ix),
                    UiInstruction::Parsed(_) => None,
                })
                .collect(),
        })
        .collect();

    Ok(LedgerTransaction {
        signature: signature.to_string(),
        slot: encoded.slot,
        failed,
        instructions,
        inner_instructions,
        log_messages,
    })
}

impl Fetcher {
    /// Creates a `Fetcher` for `address` backed by a [`DefaultRpcProvider`].
    #[must_use]
    pub fn new(rpc_url: impl Into<String>, commitment: CommitmentConfig, address: Pubkey) -> Self {
        let provider = DefaultRpcProvider::new_with_commitment(&rpc_url.into(), commitment);
        Self::with_provider(Arc::new(provider), commitment, address)
    }

    /// Creates a `Fetcher` backed by a custom [`RpcProvider`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// use evm_receipt_indexer::{Fetcher, RetryConfig};
    /// use evm_receipt_indexer::utils::retry::RetryingRpcProvider;
    /// use evm_receipt_indexer::utils::rpc::DefaultRpcProvider;
    /// use solana_sdk::commitment_config::CommitmentConfig;
    /// use solana_sdk::pubkey::Pubkey;
    /// use std::sync::Arc;
    ///
    /// let raw = DefaultRpcProvider::new_with_commitment("http://127.0.0.1:8899", CommitmentConfig::confirmed());
    /// let retrying = RetryingRpcProvider::new(raw, RetryConfig::default());
    /// let fetcher = Fetcher::with_provider(Arc::new(retrying), CommitmentConfig::confirmed(), Pubkey::new_unique());
    /// ```
    #[must_use]
    pub fn with_provider(
        rpc: Arc<dyn RpcProvider>,
        commitment: CommitmentConfig,
        address: Pubkey,
    ) -> Self {
        Self {
            rpc,
            commitment,
            address,
            page_size: crate::config::MAX_PAGE_SIZE,
            concurrency: crate::config::DEFAULT_FETCH_CONCURRENCY,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, crate::config::MAX_PAGE_SIZE);
        self
    }

    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    #[must_use]
    pub fn address(&self) -> &Pubkey {
        &self.address
    }

    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Next page of signatures referencing the scanned address, newest first.
    ///
    /// `before` is exclusive. An empty page means history is exhausted.
    ///
    /// # Errors
    ///
    /// `DecodingError` if `before` is not a valid signature; RPC errors are
    /// propagated.
    pub async fn fetch_signatures_page(&self, before: Option<&str>) -> Result<Vec<SignatureInfo>> {
        let before = before.map(parse_signature).transpose()?;
        let page = self
            .rpc
            .get_signatures_for_address(&self.address, before, self.page_size, Some(self.commitment))
            .await?;

        Ok(page
            .into_iter()
            .map(|status| SignatureInfo {
                signature: status.signature,
                slot: status.slot,
                failed: status.err.is_some(),
            })
            .collect())
    }

    /// Fetches and decodes one transaction.
    ///
    /// # Errors
    ///
    /// `DecodingError` if the signature does not parse or the body is not a
    /// JSON-encoded raw message; RPC errors, including a missing transaction,
    /// are propagated.
    pub async fn fetch_transaction(&self, signature: &str) -> Result<LedgerTransaction> {
        let parsed = parse_signature(signature)?;
        let encoded = self
            .rpc
            .get_transaction(&parsed, Some(self.commitment))
            .await?;
        decode_transaction(signature, encoded)
    }

    /// Fetches `signatures` with at most `concurrency` requests in flight.
    ///
    /// Results are returned in input order. The first failure fails the batch.
    ///
    /// # Errors
    ///
    /// Propagates RPC and decoding errors; `InternalError` if a task panics.
    pub async fn fetch_transactions(
        &self,
        signatures: &[SignatureInfo],
    ) -> Result<Vec<LedgerTransaction>> {
        let permits = Arc::new(Semaphore::new(self.concurrency));

        let handles: Vec<_> = signatures
            .iter()
            .map(|info| {
                let rpc = self.rpc.clone();
                let permits = permits.clone();
                let commitment = self.commitment;
                let signature = info.signature.clone();
                tokio::spawn(async move {
                    let _permit = permits
                        .acquire_owned()
                        .await
                        .map_err(|e| IndexerError::InternalError(format!("Semaphore closed: {e}")))?;
                    let parsed = parse_signature(&signature)?;
                    let encoded = rpc.get_transaction(&parsed, Some(commitment)).await?;
                    decode_transaction(&signature, encoded)
                })
            })
            .collect();

        let mut transactions = Vec::with_capacity(handles.len());
        for handle in handles {
            let tx = handle
                .await
                .map_err(|e| IndexerError::InternalError(format!("Task join error: {e}")))??;
            transactions.push(tx);
        }
        Ok(transactions)
    }

    /// Current ledger head.
    ///
    /// # Errors
    ///
    /// Propagates RPC errors.
    pub async fn get_slot(&self) -> Result<u64> {
        self.rpc.get_slot(Some(self.commitment)).await
    }
}
