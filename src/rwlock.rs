use std::cell::UnsafeCell;
use std::ops::Deref;

use tracing::trace;

use crate::cell::Cell;
use crate::error::LockError;

const WRITE_LOCKED: isize = -1;

/// This type of lock allows a number of readers or at most one writer at any point in time.
///
/// Nothing waits: a read while write-locked, or a write while anything is
/// held, fails at once with a [`LockError`]. Reads taken with
/// [`read`](Self::read) must be balanced by [`release_read`](Self::release_read);
/// [`read_guard`](Self::read_guard) does that on drop. The two kinds are
/// counted apart, so `release_read` can never release a live guard. There is
/// no upgrade or downgrade between the two modes.
pub struct ReadWriteLock<T> {
    value: UnsafeCell<T>,
    // -1 -> Write, 0 -> Nobody, >0 -> Read (guards only)
    state: Cell<isize>,
    // reads taken by read() and not yet released
    untracked: Cell<usize>,
}

impl<T> ReadWriteLock<T> {
    pub fn new(value: T) -> ReadWriteLock<T> {
        ReadWriteLock {
            value: UnsafeCell::new(value),
            state: Cell::new(0),
            untracked: Cell::new(0),
        }
    }

    /// Takes a read lock and returns a copy of the current value.
    pub fn read(&self) -> Result<T, LockError>
    where
        T: Clone,
    {
        if self.is_write_locked() {
            return Err(LockError::WriteLocked);
        }
        self.untracked.update(|n| n + 1);
        trace!(readers = self.readers(), "read lock taken");
        // SAFETY: the state is not write-locked, so no &mut is live.
        Ok(unsafe { (*self.value.get()).clone() })
    }

    /// Releases one read taken with [`read`](Self::read). Guard reads are
    /// not affected.
    pub fn release_read(&self) -> Result<(), LockError> {
        match self.untracked.get() {
            0 => Err(LockError::NotReadLocked),
            n => {
                self.untracked.set(n - 1);
                trace!(readers = self.readers(), "read lock released");
                Ok(())
            }
        }
    }

    pub fn read_guard(&self) -> Result<ReadGuard<'_, T>, LockError> {
        match self.state.get() {
            WRITE_LOCKED => Err(LockError::WriteLocked),
            guards => {
                self.state.set(guards + 1);
                trace!(readers = self.readers(), "read guard taken");
                Ok(ReadGuard { lock: self })
            }
        }
    }

    /// Applies `updater` with exclusive access. Fails if any read is
    /// outstanding or a write is already in progress.
    pub fn write<R>(&self, updater: impl FnOnce(&mut T) -> R) -> Result<R, LockError> {
        if self.state.get() != 0 || self.untracked.get() != 0 {
            return Err(LockError::InUse);
        }
        let _write = WriteLock::take(self);
        // SAFETY: no guard, manual read or writer holds a reference.
        Ok(updater(unsafe { &mut *self.value.get() }))
    }

    pub fn readers(&self) -> usize {
        self.state.get().max(0) as usize + self.untracked.get()
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.get() == WRITE_LOCKED
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> std::fmt::Debug for ReadWriteLock<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadWriteLock")
            .field("readers", &self.readers())
            .field("write_locked", &self.is_write_locked())
            .finish_non_exhaustive()
    }
}

/// A read lock released when dropped.
pub struct ReadGuard<'a, T> {
    lock: &'a ReadWriteLock<T>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        // SAFETY: while this guard lives the state is positive, so write() refuses.
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        let guards = self.lock.state.get();
        debug_assert!(guards > 0);
        self.lock.state.set(guards - 1);
        trace!(readers = self.lock.readers(), "read guard released");
    }
}

struct WriteLock<'a, T> {
    lock: &'a ReadWriteLock<T>,
}

impl<'a, T> WriteLock<'a, T> {
    fn take(lock: &'a ReadWriteLock<T>) -> Self {
        lock.state.set(WRITE_LOCKED);
        trace!("write lock taken");
        WriteLock { lock }
    }
}

impl<T> Drop for WriteLock<'_, T> {
    fn drop(&mut self) {
        self.lock.state.set(0);
        trace!("write lock released");
    }
}
