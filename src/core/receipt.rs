//! Receipt synthesis: the persisted shape of one logical EVM call.

use serde::{Deserialize, Serialize};

use crate::core::recovery::RecoveredTransaction;
use crate::core::results::{CallResult, EventLog, TxStatus, hex_prefixed, hex_quantity};

/// A reconstructed Ethereum transaction together with its receipt fields.
///
/// Keyed by `hash` in the store; immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizedRecord {
    /// `0x`-prefixed keccak256 of `eth_trx`.
    pub hash: String,
    /// `0x`-prefixed RLP of the signed transaction.
    pub eth_trx: String,
    pub from: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contract_address: Option<String>,
    pub slot: u64,
    pub logs: Vec<EventLog>,
    pub status: TxStatus,
    pub gas_used: u64,
    pub return_value: String,
}

impl FinalizedRecord {
    /// Raw signed transaction bytes.
    ///
    /// # Errors
    ///
    /// Fails only if `eth_trx` was not produced by [`synthesize_record`].
    pub fn raw_transaction(&self) -> Result<Vec<u8>, hex::FromHexError> {
        hex::decode(self.eth_trx.trim_start_matches("0x"))
    }
}

/// Combines a recovered transaction with the call's accumulated result.
///
/// Every log is stamped with the transaction hash and renumbered so that
/// `logIndex` and `transactionLogIndex` increase from zero across the record.
#[must_use]
pub fn synthesize_record(tx: &RecoveredTransaction, result: CallResult) -> FinalizedRecord {
    let hash = tx.hash_hex();
    let logs = result
        .logs
        .into_iter()
        .enumerate()
        .map(|(index, mut log)| {
            let index = hex_quantity(index as u64);
            log.log_index = index.clone();
            log.transaction_log_index = index;
            log.transaction_hash = Some(hash.clone());
            log
        })
        .collect();

    FinalizedRecord {
        eth_trx: hex_prefixed(&tx.raw),
        from: tx.sender_hex(),
        contract_address: tx.contract.map(|address| hex_prefixed(&address)),
        slot: result.slot,
        logs,
        status: result.status,
        gas_used: result.gas_used,
        return_value: hex_prefixed(&result.return_value),
        hash,
    }
}
