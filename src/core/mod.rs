pub mod correlation;
pub mod fetcher;
pub mod indexer;
pub mod instruction;
pub mod receipt;
pub mod recovery;
pub mod results;

pub use correlation::{ApplyOutcome, Correlator, PassState};
pub use indexer::{EvmIndexer, PassSummary};
