use std::cell::UnsafeCell;

use tracing::{debug, trace};

use crate::cell::Cell;

/// What happened to an update handed to a best-effort lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub enum LockAttempt {
    Applied,
    /// The lock was held; the update was dropped without running.
    Contended,
}

impl LockAttempt {
    pub fn is_applied(self) -> bool {
        self == LockAttempt::Applied
    }
}

/// A best-effort mutual exclusion primitive.
///
/// Unlike a textbook mutex this one never waits: a call that finds the lock
/// held returns [`LockAttempt::Contended`] at once and its updater is never
/// run. Contention is not an error. Callers that need waiting semantics use
/// [`QueuedMutex`](crate::QueuedMutex) instead.
///
/// The lock stays held across every suspension point of an async updater
/// and is released when the updater finishes, fails, panics, or its future
/// is dropped.
pub struct Mutex<T> {
    value: UnsafeCell<T>,
    locked: Cell<bool>,
}

impl<T> Mutex<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
            locked: Cell::new(false),
        }
    }

    pub(crate) fn acquire(&self) -> Option<MutexGuard<'_, T>> {
        if self.locked.replace(true) {
            debug!("mutex contended; update dropped");
            return None;
        }
        trace!("mutex acquired");
        Some(MutexGuard { mutex: self })
    }

    /// Applies `updater` to a copy of the current value and stores its `Ok`
    /// result. An `Err` leaves the stored value untouched and is returned.
    pub async fn lock<E>(
        &self,
        updater: impl AsyncFnOnce(T) -> Result<T, E>,
    ) -> Result<LockAttempt, E>
    where
        T: Clone,
    {
        let Some(guard) = self.acquire() else {
            return Ok(LockAttempt::Contended);
        };
        let next = updater(self.get()).await?;
        guard.store(next);
        Ok(LockAttempt::Applied)
    }

    /// Synchronous form of [`lock`](Self::lock) for infallible updates.
    pub fn update(&self, updater: impl FnOnce(&T) -> T) -> LockAttempt {
        let Some(guard) = self.acquire() else {
            return LockAttempt::Contended;
        };
        // SAFETY: readers only ever take short-lived shared references.
        let next = updater(unsafe { &*self.value.get() });
        guard.store(next);
        LockAttempt::Applied
    }

    pub fn get(&self) -> T
    where
        T: Clone,
    {
        // SAFETY: no &mut to the value outlives a single store.
        unsafe { (*self.value.get()).clone() }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

/// Proof that the lock flag is held. Dropping it clears the flag.
pub(crate) struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> MutexGuard<'_, T> {
    pub(crate) fn store(&self, value: T) {
        // SAFETY: no reference into the value is live across this write.
        unsafe { *self.mutex.value.get() = value };
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.locked.set(false);
        trace!("mutex released");
    }
}
