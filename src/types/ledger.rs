//! Ledger-side data model consumed by the correlation engine.
//!
//! These types are a decoded, encoding-independent view of what the RPC returns:
//! instruction payloads are raw bytes and account indices are already resolved
//! to public keys.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

/// One entry of a `getSignaturesForAddress` page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureInfo {
    /// Base58 ledger transaction signature.
    pub signature: String,
    /// Slot the transaction landed in.
    pub slot: u64,
    /// Whether the ledger reported the transaction as failed.
    #[serde(default)]
    pub failed: bool,
}

impl SignatureInfo {
    #[must_use]
    pub fn new(signature: impl Into<String>, slot: u64) -> Self {
        Self {
            signature: signature.into(),
            slot,
            failed: false,
        }
    }
}

/// A single instruction with its program and accounts resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerInstruction {
    pub program_id: Pubkey,
    pub accounts: Vec<Pubkey>,
    pub data: Vec<u8>,
}

impl LedgerInstruction {
    /// Account at position `index` of the instruction's account list.
    #[must_use]
    pub fn account(&self, index: usize) -> Option<&Pubkey> {
        self.accounts.get(index)
    }
}

/// Inner instructions produced while executing the top-level instruction at `index`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerInstructionGroup {
    pub index: u8,
    pub instructions: Vec<LedgerInstruction>,
}

/// A fetched ledger transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerTransaction {
    pub signature: String,
    pub slot: u64,
    pub failed: bool,
    pub instructions: Vec<LedgerInstruction>,
    pub inner_instructions: Vec<InnerInstructionGroup>,
    pub log_messages: Vec<String>,
}

impl LedgerTransaction {
    /// The `SignatureInfo` this transaction was fetched for.
    #[must_use]
    pub fn signature_info(&self) -> SignatureInfo {
        SignatureInfo {
            signature: self.signature.clone(),
            slot: self.slot,
            failed: self.failed,
        }
    }

    /// Top-level instructions addressed to `program_id`.
    pub fn program_instructions<'a>(
        &'a self,
        program_id: &'a Pubkey,
    ) -> impl Iterator<Item = &'a LedgerInstruction> + 'a {
        self.instructions
            .iter()
            .filter(move |ix| ix.program_id == *program_id)
    }
}
