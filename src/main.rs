//! EVM receipt indexer daemon.
//!
//! Reads its configuration from the environment (a `.env` file is honored),
//! then runs backward passes over the EVM loader's history until Ctrl+C.

use evm_receipt_indexer::telemetry::{TelemetryConfig, init_telemetry};
use evm_receipt_indexer::{EvmIndexer, IndexerConfigBuilder, Result};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let _telemetry = init_telemetry(TelemetryConfig::from_env());

    let config = IndexerConfigBuilder::from_env()?.build()?;

    let indexer = EvmIndexer::new(config).await?;
    indexer.start().await?;

    Ok(())
}
