//! Logging utilities (thin wrappers over `tracing`)

use crate::core::indexer::PassSummary;

const SILENT_ENV: &str = "EVM_INDEXER_SILENT";

/// Log levels for the indexer
#[derive(Clone, Copy)]
pub enum LogLevel {
    Info,
    Warning,
}

fn silenced() -> bool {
    std::env::var(SILENT_ENV).is_ok()
}

/// Logs a message
pub fn log(level: LogLevel, message: &str) {
    if silenced() {
        return;
    }

    match level {
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
    }
}

/// Strips the value of an `api-key=` query parameter from an RPC URL.
#[must_use]
pub fn sanitize_rpc_url(rpc_url: &str) -> String {
    match rpc_url.find("api-key=") {
        Some(pos) => {
            let before = &rpc_url[..pos + 8];
            let after = &rpc_url[pos + 8..];
            let end_pos = after.find('&').unwrap_or(after.len());
            format!("{}[REDACTED]{}", before, &after[end_pos..])
        }
        None => rpc_url.to_string(),
    }
}

/// Logs indexer startup information
pub fn log_startup(program_id: &str, rpc_url: &str, database_url: &str, poll_interval: u64) {
    if silenced() {
        return;
    }

    tracing::info!(
        program_id = program_id,
        rpc_url = sanitize_rpc_url(rpc_url),
        database_url = database_url,
        poll_interval_s = poll_interval,
        "EVM receipt indexer startup"
    );
}

/// Logs the outcome of one backward pass
pub fn log_pass(summary: &PassSummary, duration_ms: u64) {
    if silenced() {
        return;
    }

    tracing::info!(
        scanned = summary.scanned,
        fetched = summary.fetched,
        records = summary.records_written,
        dropped = summary.calls_dropped,
        pending_holders = summary.pending_holders,
        pending_continuations = summary.pending_continuations,
        boundary = summary.boundary,
        stopped_at_boundary = summary.stopped_at_boundary,
        interrupted = summary.interrupted,
        duration_ms = duration_ms,
        "Pass complete"
    );
}

/// Logs an error with context
pub fn log_error(context: &str, error: &str) {
    tracing::error!(context = context, error = error, "Indexer Error");
}
