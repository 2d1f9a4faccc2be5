pub mod ledger;

pub use ledger::{InnerInstructionGroup, LedgerInstruction, LedgerTransaction, SignatureInfo};
