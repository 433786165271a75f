use thiserror::Error;

/// Operation on an [`ExclusiveOwner`](crate::ExclusiveOwner) whose value was moved out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OwnershipError {
    #[error("already consumed")]
    AlreadyConsumed,
}

/// Operation on a disposed [`ManagedResource`](crate::ManagedResource) or
/// [`ResourceGroup`](crate::ResourceGroup).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ResourceError {
    #[error("disposed")]
    Disposed,

    #[error("resource group already disposed")]
    GroupDisposed,
}

/// Overlapping access to an [`InteriorCell`](crate::InteriorCell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BorrowError {
    /// A shared borrow is live, so exclusive access is refused.
    #[error("already borrowed")]
    AlreadyBorrowed,

    /// An exclusive borrow is live, so any access is refused.
    #[error("already mutably borrowed")]
    AlreadyMutablyBorrowed,
}

/// Contention on a [`ReadWriteLock`](crate::ReadWriteLock), or a closed
/// [`QueuedMutex`](crate::QueuedMutex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LockError {
    #[error("write-locked")]
    WriteLocked,

    #[error("in use")]
    InUse,

    /// `release_read` called with no outstanding read.
    #[error("no outstanding read to release")]
    NotReadLocked,

    /// The queued mutex was closed while waiting.
    #[error("closed")]
    Closed,
}

/// Failure outcome of a [`CancellableTask`](crate::CancellableTask).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError<E> {
    #[error("task cancelled")]
    Cancelled,

    #[error("task failed: {0}")]
    Failed(E),

    /// The executor panicked; carries the panic message.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl<E> TaskError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TaskError::Cancelled)
    }

    /// The executor's own error, if the task failed for a reason other
    /// than cancellation.
    pub fn into_failure(self) -> Option<E> {
        match self {
            TaskError::Failed(e) => Some(e),
            TaskError::Cancelled | TaskError::Panicked(_) => None,
        }
    }

    pub fn map_failure<F>(self, f: impl FnOnce(E) -> F) -> TaskError<F> {
        match self {
            TaskError::Cancelled => TaskError::Cancelled,
            TaskError::Failed(e) => TaskError::Failed(f(e)),
            TaskError::Panicked(message) => TaskError::Panicked(message),
        }
    }
}

/// Discriminant of [`Error`], for callers that only care which family failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Ownership,
    Resource,
    Borrow,
    Lock,
    TaskCancelled,
}

/// Root of the taxonomy.
///
/// Task failures other than cancellation carry caller-defined error types
/// and stay in [`TaskError`]; only the cancellation case lifts into here.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error(transparent)]
    Ownership(#[from] OwnershipError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error(transparent)]
    Borrow(#[from] BorrowError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("task cancelled")]
    TaskCancelled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ownership(_) => ErrorKind::Ownership,
            Error::Resource(_) => ErrorKind::Resource,
            Error::Borrow(_) => ErrorKind::Borrow,
            Error::Lock(_) => ErrorKind::Lock,
            Error::TaskCancelled => ErrorKind::TaskCancelled,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
