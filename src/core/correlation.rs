//! Correlation engine.
//!
//! History is scanned newest to oldest, so the fragments of one logical EVM
//! call arrive in reverse: the result-bearing `Continue` first, then the
//! `ExecuteTrxFromAccountDataIterative` that bound a holder to the storage
//! account, then the holder `Write` chunks or the `PartialCallFromRawEthereumTX`
//! that carries the signed message. [`PassState`] keeps what has been seen so
//! far during one pass; [`Correlator::apply`] advances it by one transaction.
//!
//! Signatures of transactions that feed a still-open call travel with its
//! holder or continuation entry and are marked processed in the same store
//! transaction that commits (or drops) the call.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::ops::Range;

use solana_sdk::pubkey::Pubkey;

use crate::core::instruction::{EvmInstruction, SIGNATURE_LEN, classify, read_u64_le};
use crate::core::receipt::synthesize_record;
use crate::core::recovery::{RecoveredTransaction, recover_signed_transaction};
use crate::core::results::{CallResult, extract_call_result};
use crate::storage::StorageBackend;
use crate::types::{LedgerInstruction, LedgerTransaction, SignatureInfo};
use crate::utils::error::{IndexerError, Result};

/// Signature plus little-endian message length at the start of a holder buffer.
pub const HOLDER_HEADER_LEN: usize = SIGNATURE_LEN + 8;

fn attach(signatures: &mut Vec<SignatureInfo>, info: &SignatureInfo) {
    if !signatures.iter().any(|s| s.signature == info.signature) {
        signatures.push(info.clone());
    }
}

/// In-memory copy of a holder account bound to a storage account.
#[derive(Debug, Clone)]
pub struct HolderEntry {
    pub storage: Pubkey,
    buffer: Vec<u8>,
    /// Byte ranges filled by writes so far; sorted, disjoint, never adjacent.
    written: Vec<Range<usize>>,
    signatures: Vec<SignatureInfo>,
}

impl HolderEntry {
    #[must_use]
    pub fn new(storage: Pubkey, capacity: usize) -> Self {
        Self {
            storage,
            buffer: vec![0; capacity],
            written: Vec::new(),
            signatures: Vec::new(),
        }
    }

    #[must_use]
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    #[must_use]
    pub fn signatures(&self) -> &[SignatureInfo] {
        &self.signatures
    }

    /// Copies `payload` to `offset`.
    ///
    /// # Errors
    ///
    /// `DecodingError` if the chunk would run past the buffer; nothing is written.
    pub fn write(&mut self, offset: usize, payload: &[u8]) -> Result<()> {
        let end = offset
            .checked_add(payload.len())
            .filter(|end| *end <= self.buffer.len())
            .ok_or_else(|| {
                IndexerError::DecodingError(format!(
                    "write of {} bytes at {offset} exceeds holder capacity {}",
                    payload.len(),
                    self.buffer.len()
                ))
            })?;
        self.buffer[offset..end].copy_from_slice(payload);
        self.mark_written(offset..end);
        Ok(())
    }

    fn mark_written(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        let mut merged = range;
        self.written.retain(|r| {
            if r.end < merged.start || r.start > merged.end {
                return true;
            }
            merged.start = merged.start.min(r.start);
            merged.end = merged.end.max(r.end);
            false
        });
        let at = self.written.partition_point(|r| r.start < merged.start);
        self.written.insert(at, merged);
    }

    /// True once every byte of `0..end` has been written.
    #[must_use]
    pub fn is_written_through(&self, end: usize) -> bool {
        end == 0 || self.written.first().is_some_and(|r| r.start == 0 && r.end >= end)
    }

    /// Signature and unsigned message described by the buffer header.
    ///
    /// `None` until the header and all `len` message bytes have been written,
    /// or while the length prefix is zero or points past the buffer.
    #[must_use]
    pub fn signed_message(&self) -> Option<(&[u8], &[u8])> {
        if !self.is_written_through(HOLDER_HEADER_LEN) {
            return None;
        }
        let len = usize::try_from(read_u64_le(&self.buffer, SIGNATURE_LEN)?).ok()?;
        if len == 0 {
            return None;
        }
        let end = HOLDER_HEADER_LEN.checked_add(len)?;
        if !self.is_written_through(end) {
            return None;
        }
        let message = self.buffer.get(HOLDER_HEADER_LEN..end)?;
        Some((&self.buffer[..SIGNATURE_LEN], message))
    }
}

/// Accumulated state for one storage account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationEntry {
    Pending {
        result: CallResult,
        signatures: Vec<SignatureInfo>,
    },
    /// The call was cancelled; it must never produce a record.
    Cancelled { signatures: Vec<SignatureInfo> },
}

impl ContinuationEntry {
    fn signatures_mut(&mut self) -> &mut Vec<SignatureInfo> {
        match self {
            Self::Pending { signatures, .. } | Self::Cancelled { signatures } => signatures,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Holder and continuation tables owned by a single pass.
#[derive(Debug, Default)]
pub struct PassState {
    holders: HashMap<Pubkey, HolderEntry>,
    continuations: HashMap<Pubkey, ContinuationEntry>,
}

impl PassState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True when no call is waiting for an older fragment.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.holders.is_empty() && self.continuations.is_empty()
    }

    #[must_use]
    pub fn pending_holders(&self) -> usize {
        self.holders.len()
    }

    #[must_use]
    pub fn pending_continuations(&self) -> usize {
        self.continuations.len()
    }

    #[must_use]
    pub fn holder(&self, account: &Pubkey) -> Option<&HolderEntry> {
        self.holders.get(account)
    }

    #[must_use]
    pub fn continuation(&self, storage: &Pubkey) -> Option<&ContinuationEntry> {
        self.continuations.get(storage)
    }
}

/// What applying one transaction changed in the store.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub records_written: usize,
    pub calls_dropped: usize,
    /// The transaction's own signature is now in the processed set.
    pub processed: bool,
}

/// Per-transaction bookkeeping.
struct TxContext<'a> {
    tx: &'a LedgerTransaction,
    info: SignatureInfo,
    result: Option<CallResult>,
    merged: HashSet<Pubkey>,
    mark: bool,
    pending: bool,
    settled: bool,
    outcome: ApplyOutcome,
}

fn account_at(ix: &LedgerInstruction, index: usize, opcode: &str) -> Result<Pubkey> {
    ix.account(index).copied().ok_or_else(|| {
        IndexerError::DecodingError(format!("{opcode} instruction has no account {index}"))
    })
}

/// Applies ledger transactions to a [`PassState`].
#[derive(Debug, Clone)]
pub struct Correlator {
    program_id: Pubkey,
    holder_capacity: usize,
}

impl Correlator {
    #[must_use]
    pub fn new(program_id: Pubkey, holder_capacity: usize) -> Self {
        Self {
            program_id,
            holder_capacity: holder_capacity.max(HOLDER_HEADER_LEN),
        }
    }

    #[must_use]
    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Classifies every EVM loader instruction of `tx` and applies it.
    ///
    /// Must be called newest to oldest within a pass.
    ///
    /// # Errors
    ///
    /// Only storage failures propagate. Malformed instructions are skipped.
    pub async fn apply(
        &self,
        state: &mut PassState,
        tx: &LedgerTransaction,
        storage: &dyn StorageBackend,
    ) -> Result<ApplyOutcome> {
        let info = tx.signature_info();

        if tx.failed {
            tracing::debug!(signature = %tx.signature, slot = tx.slot, "Skipping failed transaction");
            storage.mark_processed(std::slice::from_ref(&info)).await?;
            return Ok(ApplyOutcome {
                processed: true,
                ..ApplyOutcome::default()
            });
        }

        let mut ctx = TxContext {
            tx,
            info,
            result: extract_call_result(tx, &self.program_id),
            merged: HashSet::new(),
            mark: false,
            pending: false,
            settled: false,
            outcome: ApplyOutcome::default(),
        };

        for ix in tx.program_instructions(&self.program_id) {
            let instruction = match classify(&ix.data) {
                Ok(instruction) => instruction,
                Err(e) => {
                    tracing::debug!(signature = %tx.signature, error = %e, "Skipping undecodable instruction");
                    continue;
                }
            };
            tracing::trace!(signature = %tx.signature, opcode = instruction.name(), "Applying instruction");

            match self
                .apply_instruction(state, ix, instruction, storage, &mut ctx)
                .await
            {
                Ok(()) => {}
                Err(IndexerError::DecodingError(reason)) => {
                    tracing::debug!(signature = %tx.signature, opcode = instruction.name(), reason = %reason, "Skipping instruction");
                }
                Err(other) => return Err(other),
            }
        }

        if ctx.settled {
            ctx.outcome.processed = true;
        } else if ctx.mark && !ctx.pending {
            storage.mark_processed(std::slice::from_ref(&ctx.info)).await?;
            ctx.outcome.processed = true;
        }

        Ok(ctx.outcome)
    }

    async fn apply_instruction(
        &self,
        state: &mut PassState,
        ix: &LedgerInstruction,
        instruction: EvmInstruction<'_>,
        storage: &dyn StorageBackend,
        ctx: &mut TxContext<'_>,
    ) -> Result<()> {
        match instruction {
            EvmInstruction::Write { offset, payload } => {
                let holder = account_at(ix, 0, "Write")?;
                self.apply_write(state, holder, offset as usize, payload, storage, ctx)
                    .await
            }
            EvmInstruction::CreateAccount { ether } => {
                tracing::trace!(signature = %ctx.tx.signature, ether = %hex::encode(ether), "CreateAccount");
                ctx.mark = true;
                Ok(())
            }
            EvmInstruction::Finalize
            | EvmInstruction::Call
            | EvmInstruction::CreateAccountWithSeed => {
                ctx.mark = true;
                Ok(())
            }
            EvmInstruction::CallFromRawTrx {
                signature,
                unsigned_msg,
            } => {
                let recovered = recover_signed_transaction(unsigned_msg, signature);
                match (recovered, ctx.result.clone()) {
                    (Ok(recovered), Some(result)) => {
                        self.commit(storage, &recovered, result, vec![ctx.info.clone()], ctx)
                            .await?;
                    }
                    (Ok(recovered), None) => {
                        tracing::warn!(
                            signature = %ctx.tx.signature,
                            hash = %recovered.hash_hex(),
                            "CallFromRawTrx without a result, nothing to record"
                        );
                        ctx.mark = true;
                    }
                    (Err(e), _) => {
                        tracing::warn!(signature = %ctx.tx.signature, error = %e, "Could not recover CallFromRawTrx");
                        ctx.mark = true;
                    }
                }
                Ok(())
            }
            EvmInstruction::PartialCallFromRawEthereumTX {
                step_count,
                signature,
                unsigned_msg,
            } => {
                let storage_account = account_at(ix, 0, "PartialCallFromRawEthereumTX")?;
                tracing::trace!(signature = %ctx.tx.signature, storage = %storage_account, step_count, "Partial call");
                let Some(entry) = state.continuations.remove(&storage_account) else {
                    tracing::debug!(
                        signature = %ctx.tx.signature,
                        storage = %storage_account,
                        "Storage account not yet known, leaving fragment for a later pass"
                    );
                    return Ok(());
                };
                let recovered = recover_signed_transaction(unsigned_msg, signature);
                self.settle(storage, storage_account, entry, recovered, Vec::new(), ctx)
                    .await
            }
            EvmInstruction::Continue => {
                let storage_account = account_at(ix, 0, "Continue")?;
                self.apply_continue(state, storage_account, ctx);
                Ok(())
            }
            EvmInstruction::ExecuteTrxFromAccountDataIterative => {
                let holder = account_at(ix, 0, "ExecuteTrxFromAccountDataIterative")?;
                let storage_account = account_at(ix, 1, "ExecuteTrxFromAccountDataIterative")?;
                let mut entry = HolderEntry::new(storage_account, self.holder_capacity);
                attach(&mut entry.signatures, &ctx.info);
                if state.holders.insert(holder, entry).is_some() {
                    tracing::debug!(holder = %holder, storage = %storage_account, "Rebinding holder account");
                }
                ctx.pending = true;
                Ok(())
            }
            EvmInstruction::Cancel => {
                let storage_account = account_at(ix, 0, "Cancel")?;
                let mut signatures = match state.continuations.remove(&storage_account) {
                    Some(mut entry) => std::mem::take(entry.signatures_mut()),
                    None => Vec::new(),
                };
                attach(&mut signatures, &ctx.info);
                state
                    .continuations
                    .insert(storage_account, ContinuationEntry::Cancelled { signatures });
                ctx.pending = true;
                Ok(())
            }
            EvmInstruction::Unhandled(_) | EvmInstruction::Unknown(_) => Ok(()),
        }
    }

    async fn apply_write(
        &self,
        state: &mut PassState,
        holder: Pubkey,
        offset: usize,
        payload: &[u8],
        storage: &dyn StorageBackend,
        ctx: &mut TxContext<'_>,
    ) -> Result<()> {
        let Some(entry) = state.holders.get_mut(&holder) else {
            return Ok(());
        };
        entry.write(offset, payload)?;
        attach(&mut entry.signatures, &ctx.info);
        ctx.pending = true;

        let Some((signature, message)) = entry.signed_message() else {
            return Ok(());
        };
        let recovered = recover_signed_transaction(message, signature);

        let storage_account = entry.storage;
        let Some(continuation) = state.continuations.remove(&storage_account) else {
            tracing::debug!(
                holder = %holder,
                storage = %storage_account,
                recovered = recovered.is_ok(),
                "Holder complete before its storage account, keeping it"
            );
            return Ok(());
        };

        let signatures = state
            .holders
            .remove(&holder)
            .map(|entry| entry.signatures)
            .unwrap_or_default();
        self.settle(storage, storage_account, continuation, recovered, signatures, ctx)
            .await
    }

    fn apply_continue(&self, state: &mut PassState, storage_account: Pubkey, ctx: &mut TxContext<'_>) {
        let fresh = ctx
            .result
            .clone()
            .filter(|_| ctx.merged.insert(storage_account));

        match state.continuations.entry(storage_account) {
            Entry::Occupied(mut occupied) => {
                match occupied.get_mut() {
                    ContinuationEntry::Pending { result, signatures } => {
                        if let Some(fresh) = fresh {
                            result.merge(fresh);
                        }
                        attach(signatures, &ctx.info);
                    }
                    ContinuationEntry::Cancelled { signatures } => attach(signatures, &ctx.info),
                }
                ctx.pending = true;
            }
            Entry::Vacant(vacant) => match fresh {
                Some(result) => {
                    vacant.insert(ContinuationEntry::Pending {
                        result,
                        signatures: vec![ctx.info.clone()],
                    });
                    ctx.pending = true;
                }
                None => {
                    tracing::trace!(storage = %storage_account, "Continue without result for untracked storage");
                }
            },
        }
    }

    /// Resolves a call whose signed message and continuation entry are both known.
    async fn settle(
        &self,
        storage: &dyn StorageBackend,
        storage_account: Pubkey,
        entry: ContinuationEntry,
        recovered: Result<RecoveredTransaction>,
        mut signatures: Vec<SignatureInfo>,
        ctx: &mut TxContext<'_>,
    ) -> Result<()> {
        let (result, entry_signatures) = match entry {
            ContinuationEntry::Pending { result, signatures } => (Some(result), signatures),
            ContinuationEntry::Cancelled { signatures } => (None, signatures),
        };
        for info in &entry_signatures {
            attach(&mut signatures, info);
        }
        attach(&mut signatures, &ctx.info);

        match (result, recovered) {
            (Some(result), Ok(recovered)) => {
                self.commit(storage, &recovered, result, signatures, ctx).await
            }
            (Some(_), Err(e)) => {
                tracing::warn!(
                    signature = %ctx.tx.signature,
                    storage = %storage_account,
                    error = %e,
                    "Dropping call with unrecoverable signed message"
                );
                self.drop_call(storage, &signatures, ctx).await
            }
            (None, _) => {
                tracing::info!(
                    signature = %ctx.tx.signature,
                    storage = %storage_account,
                    "Dropping cancelled call"
                );
                self.drop_call(storage, &signatures, ctx).await
            }
        }
    }

    async fn commit(
        &self,
        storage: &dyn StorageBackend,
        recovered: &RecoveredTransaction,
        result: CallResult,
        signatures: Vec<SignatureInfo>,
        ctx: &mut TxContext<'_>,
    ) -> Result<()> {
        let record = synthesize_record(recovered, result);
        storage.commit_record(&record, &signatures).await?;
        tracing::info!(
            hash = %record.hash,
            status = record.status.as_str(),
            slot = record.slot,
            logs = record.logs.len(),
            fragments = signatures.len(),
            "Finalized EVM transaction"
        );
        ctx.settled = true;
        ctx.outcome.records_written += 1;
        Ok(())
    }

    async fn drop_call(
        &self,
        storage: &dyn StorageBackend,
        signatures: &[SignatureInfo],
        ctx: &mut TxContext<'_>,
    ) -> Result<()> {
        storage.mark_processed(signatures).await?;
        ctx.settled = true;
        ctx.outcome.calls_dropped += 1;
        Ok(())
    }
}
