//! Result extraction from the EVM loader's inner-instruction markers.
//!
//! While executing a call the program emits self-invocations whose data starts
//! with a marker byte:
//!
//! - `0x07` event: `address[1..21]`, topic count `[21..29]` (LE u64), `count * 32`
//!   topic bytes, trailing data.
//! - `0x06` return: status byte `[1]`, gas used `[2..10]` (LE u64), trailing return value.
//!
//! A transaction is resolvable only if it carries at least one return marker.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::core::instruction::read_u64_le;
use crate::types::LedgerTransaction;
use crate::utils::error::{IndexerError, Result};

pub const MARKER_RETURN: u8 = 0x06;
pub const MARKER_EVENT: u8 = 0x07;

/// Status bytes at or above this value mean the call failed.
pub const FAILURE_STATUS_THRESHOLD: u8 = 0xd0;

const EVENT_HEADER_LEN: usize = 29;
const TOPIC_LEN: usize = 32;
const RETURN_HEADER_LEN: usize = 10;

/// Receipt status as rendered by Ethereum JSON-RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxStatus {
    #[serde(rename = "0x1")]
    Success,
    #[serde(rename = "0x0")]
    Failure,
}

impl TxStatus {
    #[must_use]
    pub fn from_status_byte(byte: u8) -> Self {
        if byte < FAILURE_STATUS_THRESHOLD {
            Self::Success
        } else {
            Self::Failure
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "0x1",
            Self::Failure => "0x0",
        }
    }
}

/// One Ethereum log entry, hex encoded the way `eth_getTransactionReceipt` returns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventLog {
    pub address: String,
    pub topics: Vec<String>,
    pub data: String,
    pub log_index: String,
    pub transaction_log_index: String,
    /// Index of the top-level instruction whose inner group emitted the event.
    pub transaction_index: String,
    pub block_number: String,
    pub block_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_hash: Option<String>,
}

/// Decoded `0x07` marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent<'a> {
    pub address: &'a [u8],
    pub topics: Vec<&'a [u8]>,
    pub data: &'a [u8],
}

/// Decoded `0x06` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnMarker<'a> {
    pub status: TxStatus,
    pub gas_used: u64,
    pub return_value: &'a [u8],
}

/// Accumulated result of one logical call, or of one fragment of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    pub logs: Vec<EventLog>,
    pub status: TxStatus,
    pub gas_used: u64,
    pub return_value: Vec<u8>,
    pub slot: u64,
}

impl CallResult {
    /// Folds a later-encountered fragment into this one.
    ///
    /// Logs are appended in encounter order; status, gas and return value of
    /// the first-seen fragment are kept.
    pub fn merge(&mut self, other: CallResult) {
        self.logs.extend(other.logs);
    }
}

pub(crate) fn hex_prefixed(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub(crate) fn hex_quantity(value: u64) -> String {
    format!("{value:#x}")
}

/// Synthetic block hash for `slot`: the slot number as 32 big-endian bytes.
#[must_use]
pub fn block_hash_for_slot(slot: u64) -> String {
    format!("0x{slot:064x}")
}

/// Decodes an event marker.
///
/// # Errors
///
/// `DecodingError` if the tag is wrong or the record is shorter than its topic count implies.
pub fn decode_event(data: &[u8]) -> Result<RawEvent<'_>> {
    if data.first() != Some(&MARKER_EVENT) || data.len() < EVENT_HEADER_LEN {
        return Err(IndexerError::DecodingError(format!(
            "event marker needs {EVENT_HEADER_LEN} bytes, got {}",
            data.len()
        )));
    }

    let count = read_u64_le(data, 21).unwrap_or_default();
    let topics_end = usize::try_from(count)
        .ok()
        .and_then(|count| count.checked_mul(TOPIC_LEN))
        .and_then(|len| len.checked_add(EVENT_HEADER_LEN))
        .filter(|end| *end <= data.len())
        .ok_or_else(|| {
            IndexerError::DecodingError(format!(
                "event marker declares {count} topics but has {} bytes",
                data.len()
            ))
        })?;

    Ok(RawEvent {
        address: &data[1..21],
        topics: data[EVENT_HEADER_LEN..topics_end]
            .chunks_exact(TOPIC_LEN)
            .collect(),
        data: &data[topics_end..],
    })
}

/// Decodes a return marker.
///
/// # Errors
///
/// `DecodingError` if the tag is wrong or the fixed header is truncated.
pub fn decode_return(data: &[u8]) -> Result<ReturnMarker<'_>> {
    if data.first() != Some(&MARKER_RETURN) || data.len() < RETURN_HEADER_LEN {
        return Err(IndexerError::DecodingError(format!(
            "return marker needs {RETURN_HEADER_LEN} bytes, got {}",
            data.len()
        )));
    }

    Ok(ReturnMarker {
        status: TxStatus::from_status_byte(data[1]),
        gas_used: read_u64_le(data, 2).unwrap_or_default(),
        return_value: &data[RETURN_HEADER_LEN..],
    })
}

/// Scans the inner instructions of `tx` addressed to `program_id` for result markers.
///
/// Returns `None` when no return marker is present. When several are present
/// the last one wins. Malformed markers are skipped.
#[must_use]
pub fn extract_call_result(tx: &LedgerTransaction, program_id: &Pubkey) -> Option<CallResult> {
    let block_number = hex_quantity(tx.slot);
    let block_hash = block_hash_for_slot(tx.slot);
    let mut logs = Vec::new();
    let mut outcome: Option<(TxStatus, u64, Vec<u8>)> = None;

    for group in &tx.inner_instructions {
        for ix in group
            .instructions
            .iter()
            .filter(|ix| ix.program_id == *program_id)
        {
            match ix.data.first() {
                Some(&MARKER_EVENT) => match decode_event(&ix.data) {
                    Ok(event) => {
                        let log_index = hex_quantity(logs.len() as u64);
                        logs.push(EventLog {
                            address: hex_prefixed(event.address),
                            topics: event.topics.iter().map(|t| hex_prefixed(t)).collect(),
                            data: hex_prefixed(event.data),
                            log_index: log_index.clone(),
                            transaction_log_index: log_index,
                            transaction_index: hex_quantity(u64::from(group.index)),
                            block_number: block_number.clone(),
                            block_hash: block_hash.clone(),
                            transaction_hash: None,
                        });
                    }
                    Err(e) => {
                        tracing::debug!(signature = %tx.signature, error = %e, "Skipping event marker");
                    }
                },
                Some(&MARKER_RETURN) => match decode_return(&ix.data) {
                    Ok(ret) => {
                        outcome = Some((ret.status, ret.gas_used, ret.return_value.to_vec()));
                    }
                    Err(e) => {
                        tracing::debug!(signature = %tx.signature, error = %e, "Skipping return marker");
                    }
                },
                _ => {}
            }
        }
    }

    let (status, gas_used, return_value) = outcome?;
    Some(CallResult {
        logs,
        status,
        gas_used,
        return_value,
        slot: tx.slot,
    })
}
