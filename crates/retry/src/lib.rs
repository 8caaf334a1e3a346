//! Retry combinator with exponential backoff, built on [tokio_retry].
//!
//! ```ignore
//! Retry::exponential(|| client.nonce(address), NonZeroU64::new(2).unwrap())
//!     .first_delay(Duration::from_secs(1))
//!     .max_num_retries(2)
//!     .jitter(true)
//!     .when(|e| e.kind().is_transient())
//!     .await
//! ```
use std::future::Future;
use std::marker::PhantomData;
use std::num::NonZeroU64;
use std::time::Duration;

use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

/// A builder for retrying a fallible future.
///
/// The `n`-th delay is `factor * base^n` milliseconds, capped by
/// [Retry::max_delay].
pub struct Retry<T, E, Fut, FutureFactory>
where
    Fut: Future<Output = Result<T, E>>,
    FutureFactory: FnMut() -> Fut,
{
    future_factory: FutureFactory,
    base: u64,
    factor_millis: u64,
    max_delay: Option<Duration>,
    max_num_retries: Option<usize>,
    jitter: bool,
    _phantom: PhantomData<(T, E)>,
}

impl<T, E, Fut, FutureFactory> Retry<T, E, Fut, FutureFactory>
where
    Fut: Future<Output = Result<T, E>>,
    FutureFactory: FnMut() -> Fut,
{
    /// Delays grow as powers of `base`, starting at `base` seconds.
    pub fn exponential(future_factory: FutureFactory, base: NonZeroU64) -> Self {
        Self {
            future_factory,
            base: base.get(),
            factor_millis: 1000,
            max_delay: None,
            max_num_retries: None,
            jitter: false,
            _phantom: PhantomData,
        }
    }

    /// Multiplies every delay by `factor` seconds.
    pub fn factor(mut self, factor: NonZeroU64) -> Self {
        self.factor_millis = factor.get().saturating_mul(1000);
        self
    }

    /// Scales the delays so that the first one is `delay`.
    ///
    /// Sub-millisecond precision is not kept.
    pub fn first_delay(mut self, delay: Duration) -> Self {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.factor_millis = (millis / self.base).max(1);
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    /// Gives up after this many retries, so the future is polled at most
    /// `max_num_retries + 1` times. Unlimited unless set.
    pub fn max_num_retries(mut self, max_num_retries: usize) -> Self {
        self.max_num_retries = Some(max_num_retries);
        self
    }

    /// Randomizes each delay uniformly between zero and its nominal value.
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Runs the future until it succeeds, `retry_condition` rejects an error,
    /// or the retry budget is exhausted. The last error is returned.
    pub async fn when<P>(self, retry_condition: P) -> Result<T, E>
    where
        P: FnMut(&E) -> bool,
    {
        let mut strategy = ExponentialBackoff::from_millis(self.base).factor(self.factor_millis);
        if let Some(max_delay) = self.max_delay {
            strategy = strategy.max_delay(max_delay);
        }

        let strategy: Box<dyn Iterator<Item = Duration> + Send> = match self.jitter {
            true => Box::new(strategy.map(jitter)),
            false => Box::new(strategy),
        };
        let strategy = match self.max_num_retries {
            Some(n) => Box::new(strategy.take(n)) as Box<dyn Iterator<Item = Duration> + Send>,
            None => strategy,
        };

        RetryIf::spawn(strategy, self.future_factory, retry_condition).await
    }
}
