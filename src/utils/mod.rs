pub mod error;
pub mod logging;
pub mod retry;
pub mod rpc;
