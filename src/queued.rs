use std::cell::UnsafeCell;

use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, trace};

use crate::error::LockError;

/// A waiting mutex: contended callers queue for the lock instead of having
/// their update dropped.
///
/// This is the blocking counterpart of [`Mutex`](crate::Mutex). Waiters are
/// served in the order they started waiting.
pub struct QueuedMutex<T> {
    value: UnsafeCell<T>,
    locked: Semaphore,
}

impl<T> QueuedMutex<T> {
    pub fn new(value: T) -> QueuedMutex<T> {
        Self {
            value: UnsafeCell::new(value),
            locked: Semaphore::new(1),
        }
    }

    /// Waits for the lock. Fails only once the mutex has been closed.
    pub async fn lock(&self) -> Result<QueuedGuard<'_, T>, LockError> {
        let permit = self
            .locked
            .acquire()
            .await
            .map_err(|_| LockError::Closed)?;
        trace!("queued mutex acquired");
        Ok(QueuedGuard {
            mutex: self,
            _permit: permit,
        })
    }

    /// Waits for the lock and applies an async updater to the value in place.
    pub async fn update<R>(&self, updater: impl AsyncFnOnce(&mut T) -> R) -> Result<R, LockError> {
        let mut guard = self.lock().await?;
        Ok(updater(&mut *guard).await)
    }

    pub fn is_locked(&self) -> bool {
        self.locked.available_permits() == 0
    }

    /// Rejects every current and future waiter with [`LockError::Closed`].
    /// A holder keeps its guard until it drops it.
    pub fn close(&self) {
        debug!("queued mutex closed");
        self.locked.close();
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T> std::fmt::Debug for QueuedMutex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueuedMutex")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

pub struct QueuedGuard<'a, T> {
    mutex: &'a QueuedMutex<T>,
    _permit: SemaphorePermit<'a>,
}

impl<T> std::ops::Deref for QueuedGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> std::ops::DerefMut for QueuedGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::QueuedMutex;
    use crate::error::LockError;
    use std::cell::RefCell;

    #[tokio::test]
    async fn test_queued_mutex() {
        let mutex = QueuedMutex::new(0);
        *mutex.lock().await.unwrap() = 10;
        assert_eq!(*mutex.lock().await.unwrap(), 10);
        assert!(!mutex.is_locked());
    }

    #[tokio::test]
    async fn test_contended_updates_all_apply_in_order() {
        let mutex = QueuedMutex::new(Vec::new());
        let order = RefCell::new(Vec::new());

        let updates = (0..5).map(|i| {
            let mutex = &mutex;
            let order = &order;
            async move {
                mutex
                    .update(async |v| {
                        order.borrow_mut().push(format!("start {i}"));
                        tokio::task::yield_now().await;
                        v.push(i);
                        order.borrow_mut().push(format!("end {i}"));
                    })
                    .await
                    .unwrap();
            }
        });
        futures::future::join_all(updates).await;

        assert_eq!(mutex.into_inner(), vec![0, 1, 2, 3, 4]);
        let order = order.into_inner();
        for pair in order.chunks(2) {
            let started = pair[0].trim_start_matches("start ");
            let ended = pair[1].trim_start_matches("end ");
            assert_eq!(started, ended, "updates overlapped: {order:?}");
        }
    }

    #[tokio::test]
    async fn test_close_rejects_waiters() {
        let mutex = QueuedMutex::new(1);
        let guard = mutex.lock().await.unwrap();
        let (waiter, _) = futures::join!(mutex.lock(), async {
            tokio::task::yield_now().await;
            mutex.close();
        });
        assert!(matches!(waiter, Err(LockError::Closed)));
        assert_eq!(*guard, 1);
        drop(guard);
        assert!(matches!(mutex.update(async |v| *v).await, Err(LockError::Closed)));
    }
}
