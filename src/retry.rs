use std::{fmt, future::Future, time::Duration};

use tokio_retry::{strategy::FixedInterval, RetryIf};

use crate::types::FetchFailure;

/// Fixed-delay retry shared by page fetches, path probes and image downloads.
///
/// An operation is attempted at most `max_retries + 1` times, waiting `delay`
/// between attempts, and only re-attempted while `retryable` accepts the error.
pub struct RetryPolicy<E> {
    max_retries: usize,
    delay: Duration,
    retryable: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("delay", &self.delay)
            .finish()
    }
}

impl<E> RetryPolicy<E> {
    pub fn new(max_retries: usize, delay: Duration, retryable: fn(&E) -> bool) -> Self {
        RetryPolicy {
            max_retries,
            delay,
            retryable,
        }
    }

    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    fn delays(&self) -> std::iter::Take<FixedInterval> {
        FixedInterval::new(self.delay).take(self.max_retries)
    }

    pub async fn run<T, A, Fut>(&self, action: A) -> Result<T, E>
    where
        A: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let retryable = self.retryable;
        RetryIf::spawn(self.delays(), action, move |e: &E| retryable(e)).await
    }
}

impl RetryPolicy<FetchFailure> {
    pub fn for_fetches(max_retries: usize, delay: Duration) -> Self {
        Self::new(max_retries, delay, FetchFailure::is_retryable)
    }
}
