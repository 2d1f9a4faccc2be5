//! Retry decorator for transient RPC failures.
//!
//! [`RetryingRpcProvider`] wraps any [`RpcProvider`] and re-issues a call with
//! exponential backoff while the failure is classified transient by
//! [`is_transient`]. Permanent failures surface on the first attempt.

use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use solana_client::rpc_response::RpcConfirmedTransactionStatusWithSignature;
use solana_sdk::{commitment_config::CommitmentConfig, pubkey::Pubkey, signature::Signature};
use solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta;
use tokio::time::sleep;

use crate::config::RetryConfig;
use crate::utils::error::{IndexerError, Result};
use crate::utils::rpc::RpcProvider;

/// Delay before retry number `attempt` (1-based).
///
/// `initial_backoff_ms * backoff_multiplier^(attempt - 1)`, capped at
/// `max_backoff_ms`, then scaled into `[0.75, 1.25]` when jitter is on.
#[must_use]
pub fn compute_backoff(cfg: &RetryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
    let raw = cfg.initial_backoff_ms as f64 * cfg.backoff_multiplier.powi(exponent);
    let capped = raw.min(cfg.max_backoff_ms as f64);

    let millis = if cfg.jitter {
        capped * jitter_factor()
    } else {
        capped
    };

    Duration::from_millis(millis as u64)
}

fn jitter_factor() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    0.75 + f64::from(nanos % 1_000_000) / 1_000_000.0 * 0.5
}

/// Whether `err` may succeed if the same call is repeated.
///
/// RPC and client failures (timeouts, 429/503, connection resets) and task
/// join failures are retried. Database, decoding, recovery and configuration
/// errors are not.
#[must_use]
pub fn is_transient(err: &IndexerError) -> bool {
    matches!(
        err,
        IndexerError::RpcError(_) | IndexerError::RpcClientError(_) | IndexerError::InternalError(_)
    )
}

pub struct RetryingRpcProvider<P> {
    inner: P,
    config: RetryConfig,
}

impl<P: RpcProvider> RetryingRpcProvider<P> {
    pub fn new(inner: P, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn with_retry<F, Fut, T>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut retries = 0u32;

        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !is_transient(&err) => return Err(err),
                Err(err) => err,
            };

            if retries >= self.config.max_retries {
                return Err(IndexerError::RetryExhausted {
                    attempts: retries + 1,
                    last_error: err.to_string(),
                });
            }

            retries += 1;
            let delay = compute_backoff(&self.config, retries);
            tracing::warn!(
                attempt = retries,
                max = self.config.max_retries,
                delay_ms = delay.as_millis(),
                error = %err,
                "Transient RPC error, retrying"
            );
            sleep(delay).await;
        }
    }
}

#[async_trait]
impl<P: RpcProvider> RpcProvider for RetryingRpcProvider<P> {
    async fn get_signatures_for_address(
        &self,
        address: &Pubkey,
        before: Option<Signature>,
        limit: usize,
        commitment: Option<CommitmentConfig>,
    ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
        self.with_retry(|| {
            self.inner
                .get_signatures_for_address(address, before, limit, commitment)
        })
        .await
    }

    async fn get_transaction(
        &self,
        signature: &Signature,
        commitment: Option<CommitmentConfig>,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        self.with_retry(|| self.inner.get_transaction(signature, commitment))
            .await
    }

    async fn get_slot(&self, commitment: Option<CommitmentConfig>) -> Result<u64> {
        self.with_retry(|| self.inner.get_slot(commitment)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_cfg(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff_ms: 1,
            backoff_multiplier: 2.0,
            max_backoff_ms: 50,
            jitter: false,
        }
    }

    #[test]
    fn test_compute_backoff_grows_and_caps() {
        let cfg = fast_cfg(5);
        assert_eq!(compute_backoff(&cfg, 1), Duration::from_millis(1));
        assert_eq!(compute_backoff(&cfg, 2), Duration::from_millis(2));
        assert_eq!(compute_backoff(&cfg, 4), Duration::from_millis(8));
        assert_eq!(compute_backoff(&cfg, 20), Duration::from_millis(50));
    }

    #[test]
    fn test_compute_backoff_jitter_stays_in_band() {
        let cfg = RetryConfig {
            initial_backoff_ms: 1000,
            jitter: true,
            ..fast_cfg(1)
        };
        let cfg = RetryConfig {
            max_backoff_ms: 10_000,
            ..cfg
        };
        let delay = compute_backoff(&cfg, 1).as_millis();
        assert!((750..=1250).contains(&delay), "got {delay}");
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient(&IndexerError::RpcError("timeout".into())));
        assert!(is_transient(&IndexerError::InternalError("join".into())));
        assert!(!is_transient(&IndexerError::DecodingError("bad".into())));
        assert!(!is_transient(&IndexerError::ConfigError("missing".into())));
        assert!(!is_transient(&IndexerError::RecoveryError("rlp".into())));
    }

    struct FlakyProvider {
        calls: Arc<AtomicU32>,
        failures: u32,
        permanent: bool,
    }

    #[async_trait]
    impl RpcProvider for FlakyProvider {
        async fn get_signatures_for_address(
            &self,
            _: &Pubkey,
            _: Option<Signature>,
            _: usize,
            _: Option<CommitmentConfig>,
        ) -> Result<Vec<RpcConfirmedTransactionStatusWithSignature>> {
            Ok(vec![])
        }

        async fn get_transaction(
            &self,
            _: &Signature,
            _: Option<CommitmentConfig>,
        ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
            Err(IndexerError::DecodingError("not served".into()))
        }

        async fn get_slot(&self, _: Option<CommitmentConfig>) -> Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.permanent {
                Err(IndexerError::DecodingError("permanent".into()))
            } else if call <= self.failures {
                Err(IndexerError::RpcError("transient".into()))
            } else {
                Ok(42)
            }
        }
    }

    fn flaky(failures: u32, permanent: bool) -> (FlakyProvider, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        (
            FlakyProvider {
                calls: calls.clone(),
                failures,
                permanent,
            },
            calls,
        )
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_failures() {
        let (provider, calls) = flaky(2, false);
        let retrying = RetryingRpcProvider::new(provider, fast_cfg(5));
        assert_eq!(retrying.get_slot(None).await.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_permanent_errors() {
        let (provider, calls) = flaky(0, true);
        let retrying = RetryingRpcProvider::new(provider, fast_cfg(5));
        assert!(matches!(
            retrying.get_slot(None).await,
            Err(IndexerError::DecodingError(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausts() {
        let (provider, calls) = flaky(u32::MAX, false);
        let retrying = RetryingRpcProvider::new(provider, fast_cfg(3));
        match retrying.get_slot(None).await {
            Err(IndexerError::RetryExhausted { attempts, .. }) => assert_eq!(attempts, 4),
            other => panic!("expected RetryExhausted, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }
}
