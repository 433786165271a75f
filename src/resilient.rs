use std::time::Duration;

use tracing::{debug, warn};

use crate::mutex::{LockAttempt, Mutex};

const DEFAULT_RETRIES: usize = 3;

type Fallback<T, E> = Box<dyn FnOnce(&E) -> T>;

/// How [`ResilientMutex::set_async`] retries a failing updater.
pub struct RetryPolicy<T, E> {
    retries: usize,
    backoff: Duration,
    fallback: Option<Fallback<T, E>>,
}

impl<T, E> RetryPolicy<T, E> {
    /// Total number of attempts. Zero is treated as one.
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    /// Pause between a failed attempt and the next one.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Produces the value stored once every attempt has failed. Receives
    /// the last error.
    pub fn with_fallback(mut self, fallback: impl FnOnce(&E) -> T + 'static) -> Self {
        self.fallback = Some(Box::new(fallback));
        self
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    fn attempts(&self) -> usize {
        self.retries.max(1)
    }
}

impl<T, E> Default for RetryPolicy<T, E> {
    fn default() -> Self {
        Self {
            retries: DEFAULT_RETRIES,
            backoff: Duration::ZERO,
            fallback: None,
        }
    }
}

impl<T, E> std::fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("retries", &self.retries)
            .field("backoff", &self.backoff)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum RetryOutcome<E> {
    /// An attempt succeeded and its value was stored.
    Applied { attempts: usize },
    /// Every attempt failed and the fallback value was stored.
    Recovered { attempts: usize },
    /// Every attempt failed and no fallback was configured; the stored
    /// value is unchanged.
    Exhausted { attempts: usize, error: E },
    /// The lock was held; nothing ran.
    Contended,
}

/// [`Mutex`] plus bounded retry for fallible async updates.
///
/// When every attempt fails, a configured fallback stores a deterministic
/// recovery value instead of leaving the state stale.
///
/// Contended calls are dropped exactly as with [`Mutex`]; the lock is
/// released once the update, its retries, and any fallback are done.
pub struct ResilientMutex<T> {
    inner: Mutex<T>,
}

impl<T> ResilientMutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    pub fn set(&self, updater: impl FnOnce(&T) -> T) -> LockAttempt {
        self.inner.update(updater)
    }

    pub async fn set_async<E>(
        &self,
        mut updater: impl AsyncFnMut(T) -> Result<T, E>,
        policy: RetryPolicy<T, E>,
    ) -> RetryOutcome<E>
    where
        T: Clone,
    {
        let Some(guard) = self.inner.acquire() else {
            return RetryOutcome::Contended;
        };

        let allowed = policy.attempts();
        let mut attempts = 0;
        let error = loop {
            attempts += 1;
            match updater(self.inner.get()).await {
                Ok(next) => {
                    guard.store(next);
                    debug!(attempts, "resilient update applied");
                    return RetryOutcome::Applied { attempts };
                }
                Err(error) if attempts >= allowed => break error,
                Err(_) => {
                    debug!(attempts, remaining = allowed - attempts, "resilient update failed; retrying");
                    if !policy.backoff.is_zero() {
                        tokio::time::sleep(policy.backoff).await;
                    }
                }
            }
        };

        match policy.fallback {
            Some(fallback) => {
                guard.store(fallback(&error));
                warn!(attempts, "resilient update exhausted; fallback value stored");
                RetryOutcome::Recovered { attempts }
            }
            None => {
                warn!(attempts, "resilient update exhausted; value left unchanged");
                RetryOutcome::Exhausted { attempts, error }
            }
        }
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.get()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }

    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T> std::fmt::Debug for ResilientMutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientMutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}
