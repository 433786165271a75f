mod backend;
mod cell;
mod error;
mod interior;
mod mutex;
mod owner;
mod queued;
mod resilient;
mod resource;
mod rwlock;
mod shared;
mod task;
mod token;

pub use backend::{Accelerated, BackendError, NativeUpdate};
pub use error::{BorrowError, Error, ErrorKind, LockError, OwnershipError, ResourceError, Result, TaskError};
pub use interior::{BorrowState, InteriorCell};
pub use mutex::{LockAttempt, Mutex};
pub use owner::ExclusiveOwner;
pub use queued::{QueuedGuard, QueuedMutex};
pub use resilient::{ResilientMutex, RetryOutcome, RetryPolicy};
pub use resource::{Disposable, ManagedResource, ResourceGroup, with_resource};
pub use rwlock::{ReadGuard, ReadWriteLock};
pub use shared::{SharedHandle, WeakHandle};
pub use task::{CancellableTask, TaskOutcome};
pub use token::CancellationToken;

/*
Every primitive here is !Sync: state lives in UnsafeCell-backed cells and is
only touched from one cooperative thread. Concurrency means interleaving at
.await points, never parallel execution.

# ExclusiveOwner

## Move-Once:
consume() moves the value out exactly once; any later access is an OwnershipError.

# ManagedResource / ResourceGroup

## Release At Most Once:
dispose() runs the release action on the first call only; later calls are no-ops.

## Reverse Teardown:
A group disposes members last-added first, awaiting each before the next.

# SharedHandle / WeakHandle

## Multiple Ownership:
Clones alias one heap slot; the value is dropped when the strong count reaches zero.

## True Aliasing:
The slot holds an InteriorCell, so a mutation through any clone is seen by all of them.

## Weak Observers:
A WeakHandle never keeps the value alive; get_or_default falls back once it is gone, and reports a busy value as a BorrowError.

# InteriorCell

## Interior Mutability via Runtime Borrow Checking:
Closure-scoped borrows; reentrant access that would overlap an exclusive borrow is refused.

# Mutex / ResilientMutex / QueuedMutex

## Best-Effort:
A contended Mutex or ResilientMutex call is dropped, not queued, and is not an error.

## Retry With Fallback:
ResilientMutex retries a failing async update, then stores a deterministic fallback.

## Waiting:
QueuedMutex is the separate primitive for callers that must wait their turn.

# ReadWriteLock

## Fail Fast:
read() while write-locked and write() while anything is held fail with LockError.

# CancellableTask

## Single-Fire:
The outcome is settled once; cancellation before settling forces TaskError::Cancelled.

## Cooperative Cancellation:
Executors poll a CancellationToken; combinators keep the token linked through the chain.

## Failures Are Values:
Executor errors and panics settle as TaskError; nothing unwinds out of run().
There are no built-in timeouts; race a task against a timer task.

# Error

## One Enum Per Family:
Each primitive returns its own error enum; Error rolls them up with a kind().

# Accelerated

## Transparent Fallback:
An optional native updater is tried first; errors, panics and rejected results fall back
to the reference updater, so values are identical with or without a backend.
*/
