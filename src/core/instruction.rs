//! Instruction classifier for EVM loader program payloads.
//!
//! The first byte of every instruction selects the opcode. Only the fields the
//! correlation engine needs are decoded; everything else is left opaque. Byte
//! ranges below are offsets into the full instruction data, tag byte included.
//!
//! | Tag    | Instruction                          | Decoded fields                               |
//! |--------|--------------------------------------|----------------------------------------------|
//! | `0x00` | `Write`                              | offset `[4..8]`, length `[8..16]`, payload `[16..]` |
//! | `0x01` | `Finalize`                           | -                                            |
//! | `0x02` | `CreateAccount`                      | ether address = trailing 21 bytes minus last |
//! | `0x03` | `Call`                               | -                                            |
//! | `0x04` | `CreateAccountWithSeed`              | -                                            |
//! | `0x05` | `CallFromRawTrx`                     | signature `[25..90]`, message `[90..]`       |
//! | `0x09` | `PartialCallFromRawEthereumTX`       | step count `[5..13]`, signature `[33..98]`, message `[98..]` |
//! | `0x0a` | `Continue`                           | -                                            |
//! | `0x0b` | `ExecuteTrxFromAccountDataIterative` | -                                            |
//! | `0x0c` | `Cancel`                             | -                                            |
//!
//! Tags `0x06..=0x08` belong to the program's result markers and are never
//! correlated. Tags above `0x0c` are `Unknown`.

use crate::utils::error::{IndexerError, Result};

/// Length of a detached Ethereum signature: `r || s || recovery id`.
pub const SIGNATURE_LEN: usize = 65;

pub const TAG_WRITE: u8 = 0x00;
pub const TAG_FINALIZE: u8 = 0x01;
pub const TAG_CREATE_ACCOUNT: u8 = 0x02;
pub const TAG_CALL: u8 = 0x03;
pub const TAG_CREATE_ACCOUNT_WITH_SEED: u8 = 0x04;
pub const TAG_CALL_FROM_RAW_TRX: u8 = 0x05;
pub const TAG_PARTIAL_CALL_FROM_RAW_ETHEREUM_TX: u8 = 0x09;
pub const TAG_CONTINUE: u8 = 0x0a;
pub const TAG_EXECUTE_TRX_FROM_ACCOUNT_DATA_ITERATIVE: u8 = 0x0b;
pub const TAG_CANCEL: u8 = 0x0c;

const WRITE_HEADER_LEN: usize = 16;
const CREATE_ACCOUNT_TRAILER_LEN: usize = 21;
const CALL_FROM_RAW_SIGNATURE_START: usize = 25;
const PARTIAL_CALL_STEP_COUNT: std::ops::Range<usize> = 5..13;
const PARTIAL_CALL_SIGNATURE_START: usize = 33;

/// A classified EVM loader instruction.
///
/// Account-list positions used by the engine:
/// - `PartialCallFromRawEthereumTX`, `Continue`, `Cancel`: index 0 is the storage account.
/// - `ExecuteTrxFromAccountDataIterative`: index 0 is the holder, index 1 the storage account.
/// - `Write`: index 0 is the destination holder account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvmInstruction<'a> {
    Write {
        offset: u32,
        payload: &'a [u8],
    },
    Finalize,
    CreateAccount {
        ether: &'a [u8],
    },
    Call,
    CreateAccountWithSeed,
    CallFromRawTrx {
        signature: &'a [u8],
        unsigned_msg: &'a [u8],
    },
    PartialCallFromRawEthereumTX {
        step_count: u64,
        signature: &'a [u8],
        unsigned_msg: &'a [u8],
    },
    Continue,
    ExecuteTrxFromAccountDataIterative,
    Cancel,
    /// A known tag with no correlation role (`0x06..=0x08`).
    Unhandled(u8),
    /// A tag above the highest known opcode.
    Unknown(u8),
}

impl EvmInstruction<'_> {
    /// Human readable instruction name, used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Write { .. } => "Write",
            Self::Finalize => "Finalize",
            Self::CreateAccount { .. } => "CreateAccount",
            Self::Call => "Call",
            Self::CreateAccountWithSeed => "CreateAccountWithSeed",
            Self::CallFromRawTrx { .. } => "CallFromRawTrx",
            Self::PartialCallFromRawEthereumTX { .. } => "PartialCallFromRawEthereumTX",
            Self::Continue => "Continue",
            Self::ExecuteTrxFromAccountDataIterative => "ExecuteTrxFromAccountDataIterative",
            Self::Cancel => "Cancel",
            Self::Unhandled(_) => "Unhandled",
            Self::Unknown(_) => "Unknown",
        }
    }
}

fn too_short(name: &str, needed: usize, got: usize) -> IndexerError {
    IndexerError::DecodingError(format!(
        "{name} instruction needs at least {needed} bytes, got {got}"
    ))
}

pub(crate) fn read_u32_le(data: &[u8], start: usize) -> Option<u32> {
    let bytes: [u8; 4] = data.get(start..start + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(bytes))
}

pub(crate) fn read_u64_le(data: &[u8], start: usize) -> Option<u64> {
    let bytes: [u8; 8] = data.get(start..start + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(bytes))
}

/// Splits `data[start..]` into a 65-byte signature and the trailing unsigned message.
fn signed_message<'a>(
    name: &str,
    data: &'a [u8],
    start: usize,
) -> Result<(&'a [u8], &'a [u8])> {
    let end = start + SIGNATURE_LEN;
    if data.len() < end {
        return Err(too_short(name, end, data.len()));
    }
    Ok((&data[start..end], &data[end..]))
}

/// Classifies a raw instruction payload.
///
/// # Errors
///
/// Returns `IndexerError::DecodingError` when the payload is empty or shorter
/// than the fixed layout of its opcode. Callers skip such instructions.
pub fn classify(data: &[u8]) -> Result<EvmInstruction<'_>> {
    let Some(&tag) = data.first() else {
        return Err(IndexerError::DecodingError(
            "empty instruction data".to_string(),
        ));
    };

    let instruction = match tag {
        TAG_WRITE => {
            if data.len() < WRITE_HEADER_LEN {
                return Err(too_short("Write", WRITE_HEADER_LEN, data.len()));
            }
            let offset = read_u32_le(data, 4).unwrap_or_default();
            let length = read_u64_le(data, 8).unwrap_or_default();
            let payload = &data[WRITE_HEADER_LEN..];
            let length = usize::try_from(length)
                .ok()
                .filter(|len| *len <= payload.len())
                .ok_or_else(|| {
                    IndexerError::DecodingError(format!(
                        "Write declares {length} bytes but carries {}",
                        payload.len()
                    ))
                })?;
            EvmInstruction::Write {
                offset,
                payload: &payload[..length],
            }
        }
        TAG_FINALIZE => EvmInstruction::Finalize,
        TAG_CREATE_ACCOUNT => {
            if data.len() < CREATE_ACCOUNT_TRAILER_LEN + 1 {
                return Err(too_short(
                    "CreateAccount",
                    CREATE_ACCOUNT_TRAILER_LEN + 1,
                    data.len(),
                ));
            }
            let end = data.len() - 1;
            EvmInstruction::CreateAccount {
                ether: &data[end - 20..end],
            }
        }
        TAG_CALL => EvmInstruction::Call,
        TAG_CREATE_ACCOUNT_WITH_SEED => EvmInstruction::CreateAccountWithSeed,
        TAG_CALL_FROM_RAW_TRX => {
            let (signature, unsigned_msg) =
                signed_message("CallFromRawTrx", data, CALL_FROM_RAW_SIGNATURE_START)?;
            EvmInstruction::CallFromRawTrx {
                signature,
                unsigned_msg,
            }
        }
        TAG_PARTIAL_CALL_FROM_RAW_ETHEREUM_TX => {
            let (signature, unsigned_msg) = signed_message(
                "PartialCallFromRawEthereumTX",
                data,
                PARTIAL_CALL_SIGNATURE_START,
            )?;
            let step_count = read_u64_le(data, PARTIAL_CALL_STEP_COUNT.start).unwrap_or_default();
            EvmInstruction::PartialCallFromRawEthereumTX {
                step_count,
                signature,
                unsigned_msg,
            }
        }
        TAG_CONTINUE => EvmInstruction::Continue,
        TAG_EXECUTE_TRX_FROM_ACCOUNT_DATA_ITERATIVE => {
            EvmInstruction::ExecuteTrxFromAccountDataIterative
        }
        TAG_CANCEL => EvmInstruction::Cancel,
        tag if tag > TAG_CANCEL => EvmInstruction::Unknown(tag),
        tag => EvmInstruction::Unhandled(tag),
    };

    Ok(instruction)
}
