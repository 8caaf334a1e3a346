use std::future::Future;
use std::num::{NonZeroU64, NonZeroUsize};
use std::time::Duration;

use batchbench_common::ResourceBounds;
use batchbench_retry::Retry;
use starknet_rpc_client::RpcError;

use crate::accounts::BalanceCheck;
use crate::nonce::NonceStrategy;
use crate::plan::ReadRatio;

/// Everything that shapes a single batch run.
#[derive(Clone, Debug)]
pub struct BatchConfig {
    pub batch_size: NonZeroUsize,
    pub bundle_size: NonZeroUsize,
    pub read_ratio: ReadRatio,
    /// Upper bound on outstanding jobs, confirmation polls included.
    pub concurrency: NonZeroUsize,
    pub nonce_strategy: NonceStrategy,
    pub retry: RetryPolicy,
    /// How often a write is requeued after a nonce conflict before giving up.
    pub max_requeues: u32,
    pub resource_bounds: ResourceBounds,
    pub confirmation: ConfirmationSettings,
    /// Accounts failing the check are dropped before planning.
    pub balance_check: Option<BalanceCheck>,
    /// Fixes the operation order, random otherwise.
    pub shuffle_seed: Option<u64>,
    /// Reads back the stored balance of every written account once all
    /// writes are confirmed.
    pub verify_balances: bool,
}

impl BatchConfig {
    pub fn new(
        batch_size: NonZeroUsize,
        bundle_size: NonZeroUsize,
        read_ratio: ReadRatio,
        concurrency: NonZeroUsize,
    ) -> Self {
        Self {
            batch_size,
            bundle_size,
            read_ratio,
            concurrency,
            nonce_strategy: NonceStrategy::default(),
            retry: RetryPolicy::default(),
            max_requeues: 3,
            resource_bounds: ResourceBounds::default(),
            confirmation: ConfirmationSettings::default(),
            balance_check: None,
            shuffle_seed: None,
            verify_balances: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ConfirmationSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(250),
        }
    }
}

/// Backoff for transient RPC failures.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one.
    pub max_attempts: NonZeroUsize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: NonZeroUsize::new(3).unwrap(),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Outcome of a retried request, with the number of retries it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, RpcError>,
    pub retries: u32,
}

impl RetryPolicy {
    /// Runs `request`, retrying only errors whose kind is transient.
    pub async fn run<T, Fut, F>(&self, mut request: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        let mut attempts = 0u32;

        let result = Retry::exponential(
            || {
                attempts += 1;
                request()
            },
            NonZeroU64::new(2).unwrap(),
        )
        .first_delay(self.base_delay)
        .max_delay(self.max_delay)
        .max_num_retries(self.max_attempts.get() - 1)
        .jitter(self.jitter)
        .when(|e: &RpcError| {
            let kind = e.kind();
            if kind.is_transient() {
                tracing::debug!(reason=%e, %kind, "Request failed, retrying");
            }
            kind.is_transient()
        })
        .await;

        Attempted {
            result,
            retries: attempts.saturating_sub(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;

    use super::*;

    fn rate_limited() -> RpcError {
        RpcError::Starknet {
            code: -32005,
            message: "limit exceeded".to_owned(),
            data: None,
        }
    }

    fn rejected() -> RpcError {
        RpcError::Starknet {
            code: 54,
            message: "validation failure".to_owned(),
            data: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_up_to_max_attempts() {
        let calls = AtomicUsize::new(0);
        let attempted: Attempted<()> = RetryPolicy::default()
            .run(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err(rate_limited()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(attempted.retries, 2);
        assert_matches!(attempted.result, Err(RpcError::Starknet { code: -32005, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let attempted: Attempted<()> = RetryPolicy::default()
            .run(|| {
                calls.fetch_add(1, Ordering::Relaxed);
                async { Err(rejected()) }
            })
            .await;

        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(attempted.retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_transient_error() {
        let calls = AtomicUsize::new(0);
        let attempted = RetryPolicy::default()
            .run(|| {
                let n = calls.fetch_add(1, Ordering::Relaxed);
                async move {
                    match n {
                        0 => Err(rate_limited()),
                        _ => Ok(n),
                    }
                }
            })
            .await;

        assert_eq!(attempted.result.unwrap(), 1);
        assert_eq!(attempted.retries, 1);
    }
}
