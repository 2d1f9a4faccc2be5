/// Console logging settings.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Filter used when `RUST_LOG` is unset, e.g. `"info"` or
    /// `"evm_receipt_indexer=debug,sqlx=warn"`.
    pub log_filter: String,
    pub enable_console_colors: bool,
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,sqlx=warn".into(),
            enable_console_colors: true,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl TelemetryConfig {
    /// Defaults, with `LOG_FILTER` and `NO_COLOR` honored when set.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(filter) = std::env::var("LOG_FILTER") {
            config.log_filter = filter;
        }
        if std::env::var_os("NO_COLOR").is_some() {
            config.enable_console_colors = false;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quiets_sqlx() {
        let config = TelemetryConfig::default();
        assert!(config.log_filter.contains("sqlx=warn"));
        assert!(config.show_target);
        assert!(!config.show_thread_ids);
    }
}
