use std::rc::{Rc, Weak};

use tokio::sync::Notify;
use tracing::debug;

use crate::cell::Cell;
use crate::error::TaskError;

/// A shared cancellation flag an executor consults at its suspension points.
///
/// Cancellation is cooperative: it wakes anyone awaiting
/// [`cancelled`](Self::cancelled) and flips [`is_cancelled`](Self::is_cancelled),
/// but never interrupts running code. Cancelling a token also cancels every
/// token linked below it.
#[derive(Clone, Default)]
pub struct CancellationToken {
    inner: Rc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: Cell<bool>,
    notify: Notify,
    children: Cell<Vec<Weak<TokenInner>>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Only the first call wakes waiters and cascades.
    pub fn cancel(&self) {
        if self.inner.cancelled.replace(true) {
            return;
        }
        debug!("cancellation requested");
        self.inner.notify.notify_waiters();

        for child in self.inner.children.take() {
            if let Some(inner) = child.upgrade() {
                CancellationToken { inner }.cancel();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// A new token cancelled whenever this one is.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        self.link(&child);
        child
    }

    /// Makes `child` follow this token's cancellation. A token that is
    /// already cancelled cancels `child` immediately.
    pub fn link(&self, child: &CancellationToken) {
        if self.is_cancelled() {
            child.cancel();
            return;
        }
        let mut children = self.inner.children.take();
        children.retain(|c| c.strong_count() > 0);
        children.push(Rc::downgrade(&child.inner));
        self.inner.children.set(children);
    }

    /// Suspension-point check for executors: `token.check()?`.
    pub fn check<E>(&self) -> Result<(), TaskError<E>> {
        if self.is_cancelled() {
            Err(TaskError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_idempotent() {
        let token = CancellationToken::new();
        let alias = token.clone();
        assert!(!token.is_cancelled());
        alias.cancel();
        alias.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check::<()>(), Err(TaskError::Cancelled));
    }

    #[test]
    fn test_children_follow_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let grandchild = child.child_token();

        child.cancel();
        assert!(!parent.is_cancelled());
        assert!(grandchild.is_cancelled());

        let sibling = parent.child_token();
        parent.cancel();
        assert!(sibling.is_cancelled());

        let late = CancellationToken::new();
        parent.link(&late);
        assert!(late.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_waiters() {
        let token = CancellationToken::new();
        let waiter = token.clone();
        let (woke, _) = futures::join!(
            async {
                waiter.cancelled().await;
                waiter.is_cancelled()
            },
            async {
                tokio::task::yield_now().await;
                token.cancel();
            }
        );
        assert!(woke);

        // already cancelled: resolves without waiting
        token.cancelled().await;
    }
}
