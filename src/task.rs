use std::any::Any;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::FutureExt;
use futures::future::{LocalBoxFuture, join_all};
use tracing::{debug, trace, warn};

use crate::error::TaskError;
use crate::token::CancellationToken;

pub type TaskOutcome<T, E> = Result<T, TaskError<E>>;

enum TaskState<T, E> {
    Pending(LocalBoxFuture<'static, TaskOutcome<T, E>>),
    Settled(TaskOutcome<T, E>),
}

/// A single-fire computation that owns a [`CancellationToken`] and the
/// future that will settle it.
///
/// Settling happens once, in [`run`](Self::run); a token cancelled before
/// or during the run forces [`TaskError::Cancelled`] whatever the executor
/// does afterwards. Combinators share the token of the task they wrap, and
/// tasks produced by [`flat_map`](Self::flat_map) get theirs linked under
/// it. Timeouts are layered on with [`race`](Self::race).
#[must_use = "a task does nothing until it is run"]
pub struct CancellableTask<T, E> {
    token: CancellationToken,
    state: TaskState<T, E>,
}

impl<T: 'static, E: 'static> CancellableTask<T, E> {
    /// Hands a fresh token to `executor` and keeps the work it returns.
    /// Errors from the executor surface as [`TaskError::Failed`]; a panic,
    /// whether in `executor` itself or in its work, as [`TaskError::Panicked`].
    pub fn new<F, Fut>(executor: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, E>> + 'static,
    {
        let token = CancellationToken::new();
        let work = match catch_unwind(AssertUnwindSafe(|| executor(token.clone()))) {
            Ok(work) => work,
            Err(panic) => {
                return Self {
                    token,
                    state: TaskState::Settled(Err(panicked(panic))),
                };
            }
        };
        Self::pending(token, async move {
            match AssertUnwindSafe(work).catch_unwind().await {
                Ok(outcome) => outcome.map_err(TaskError::Failed),
                Err(panic) => Err(panicked(panic)),
            }
        })
    }

    fn pending(token: CancellationToken, work: impl Future<Output = TaskOutcome<T, E>> + 'static) -> Self {
        Self {
            token,
            state: TaskState::Pending(work.boxed_local()),
        }
    }

    pub fn resolve(value: T) -> Self {
        Self {
            token: CancellationToken::new(),
            state: TaskState::Settled(Ok(value)),
        }
    }

    pub fn reject(error: E) -> Self {
        Self {
            token: CancellationToken::new(),
            state: TaskState::Settled(Err(TaskError::Failed(error))),
        }
    }

    /// Idempotent. Has no effect on a task built already settled.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// A handle for cancelling the task while [`run`](Self::run) is in flight.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_settled(&self) -> bool {
        matches!(self.state, TaskState::Settled(_))
    }

    /// Drives the task to its single outcome.
    pub async fn run(self) -> TaskOutcome<T, E> {
        let Self { token, state } = self;
        let work = match state {
            TaskState::Settled(outcome) => return outcome,
            TaskState::Pending(work) => work,
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(TaskError::Cancelled),
            outcome = work => outcome,
        };

        if token.is_cancelled() {
            debug!("task settled as cancelled");
            return Err(TaskError::Cancelled);
        }
        trace!(ok = outcome.is_ok(), "task settled");
        outcome
    }

    pub fn map<U: 'static>(self, f: impl FnOnce(T) -> U + 'static) -> CancellableTask<U, E> {
        let token = self.token.clone();
        CancellableTask::pending(token, async move { self.run().await.map(f) })
    }

    /// Chains a dependent task that only starts on success. Its token is
    /// linked under this one.
    pub fn flat_map<U: 'static>(
        self,
        f: impl FnOnce(T) -> CancellableTask<U, E> + 'static,
    ) -> CancellableTask<U, E> {
        let token = self.token.clone();
        let parent = token.clone();
        CancellableTask::pending(token, async move {
            let value = self.run().await?;
            let next = f(value);
            parent.link(&next.token);
            next.run().await
        })
    }

    /// Turns a failure into a new outcome; success passes through untouched.
    pub fn catch<E2: 'static>(
        self,
        f: impl FnOnce(TaskError<E>) -> Result<T, E2> + 'static,
    ) -> CancellableTask<T, E2> {
        let token = self.token.clone();
        CancellableTask::pending(token, async move {
            match self.run().await {
                Ok(value) => Ok(value),
                Err(error) => f(error).map_err(TaskError::Failed),
            }
        })
    }

    /// Waits for every task, then reports the first failure by position,
    /// or all values in order. Cancelling the aggregate cancels every member.
    pub fn all(tasks: impl IntoIterator<Item = CancellableTask<T, E>>) -> CancellableTask<Vec<T>, E> {
        let token = CancellationToken::new();
        let tasks: Vec<_> = tasks.into_iter().collect();
        for task in &tasks {
            token.link(&task.token);
        }

        CancellableTask::pending(token, async move {
            let outcomes = join_all(tasks.into_iter().map(CancellableTask::run)).await;
            outcomes.into_iter().collect()
        })
    }

    /// Settles with whichever task settles first and cancels the other.
    /// Ties go to `self`.
    pub fn race(self, other: CancellableTask<T, E>) -> CancellableTask<T, E> {
        let token = CancellationToken::new();
        token.link(&self.token);
        token.link(&other.token);

        let (left, right) = (self.token.clone(), other.token.clone());
        CancellableTask::pending(token, async move {
            tokio::select! {
                biased;
                outcome = self.run() => {
                    right.cancel();
                    outcome
                }
                outcome = other.run() => {
                    left.cancel();
                    outcome
                }
            }
        })
    }
}

fn panicked<E>(panic: Box<dyn Any + Send>) -> TaskError<E> {
    let message = match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast_ref::<&str>() {
            Some(message) => message.to_string(),
            None => "executor panicked".to_string(),
        },
    };
    warn!(%message, "task executor panicked");
    TaskError::Panicked(message)
}

impl<T, E> std::fmt::Debug for CancellableTask<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            TaskState::Pending(_) => "Pending",
            TaskState::Settled(Ok(_)) => "Resolved",
            TaskState::Settled(Err(_)) => "Rejected",
        };
        f.debug_struct("CancellableTask")
            .field("state", &state)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::time::Duration;

    type Task<T> = CancellableTask<T, String>;

    fn yielding(value: i32, yields: usize) -> Task<i32> {
        CancellableTask::new(move |token| async move {
            for _ in 0..yields {
                tokio::task::yield_now().await;
                if token.is_cancelled() {
                    return Err("stopped".to_string());
                }
            }
            Ok(value)
        })
    }

    fn failing(error: &str, yields: usize) -> Task<i32> {
        let error = error.to_string();
        CancellableTask::new(move |_| async move {
            for _ in 0..yields {
                tokio::task::yield_now().await;
            }
            Err(error)
        })
    }

    #[tokio::test]
    async fn test_settled_constructors() {
        assert_eq!(Task::resolve(1).run().await, Ok(1));
        assert_eq!(
            Task::<i32>::reject("no".into()).run().await,
            Err(TaskError::Failed("no".into()))
        );
    }

    #[tokio::test]
    async fn test_executor_outcomes() {
        assert_eq!(yielding(5, 2).run().await, Ok(5));
        assert_eq!(
            failing("io", 1).run().await,
            Err(TaskError::Failed("io".into()))
        );
    }

    #[tokio::test]
    async fn test_executor_panic_settles_as_error() {
        let task: Task<i32> = CancellableTask::new(|_| async move {
            tokio::task::yield_now().await;
            Ok(None::<i32>.expect("executor bug"))
        });
        assert_eq!(task.run().await, Err(TaskError::Panicked("executor bug".into())));

        let eager: Task<i32> = CancellableTask::new(|_| -> std::future::Ready<Result<i32, String>> {
            panic!("bad setup {}", 1)
        });
        assert!(eager.is_settled());
        assert_eq!(eager.run().await, Err(TaskError::Panicked("bad setup 1".into())));
    }

    #[tokio::test]
    async fn test_cancel_wins_over_panic() {
        let task: Task<i32> = CancellableTask::new(|token| async move {
            token.cancelled().await;
            Ok(None::<i32>.expect("after cancel"))
        });
        let token = task.token();
        let (outcome, _) = futures::join!(task.run(), async { token.cancel() });
        assert_eq!(outcome, Err(TaskError::Cancelled));

        let cancelled_first: Task<i32> =
            CancellableTask::new(|_| async move { Ok(None::<i32>.expect("never polled")) });
        cancelled_first.cancel();
        assert_eq!(cancelled_first.run().await, Err(TaskError::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_before_run() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        let task: Task<i32> = CancellableTask::new(move |_| async move {
            flag.set(true);
            Ok(1)
        });
        task.cancel();
        task.cancel();
        assert!(task.is_cancelled());
        assert_eq!(task.run().await, Err(TaskError::Cancelled));
        assert!(!ran.get());
    }

    #[tokio::test]
    async fn test_cancel_while_running_overrides_executor_error() {
        let task = yielding(1, 10);
        let token = task.token();
        let (outcome, _) = futures::join!(task.run(), async {
            tokio::task::yield_now().await;
            token.cancel();
        });
        assert_eq!(outcome, Err(TaskError::Cancelled));
    }

    #[tokio::test]
    async fn test_executor_sees_token() {
        let task: Task<()> = CancellableTask::new(|token| async move {
            token.cancelled().await;
            Ok(())
        });
        let token = task.token();
        let (outcome, _) = futures::join!(task.run(), async { token.cancel() });
        assert_eq!(outcome, Err(TaskError::Cancelled));
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_map() {
        assert_eq!(yielding(2, 1).map(|v| v * 10).run().await, Ok(20));
        assert_eq!(
            failing("bad", 0).map(|v| v * 10).run().await,
            Err(TaskError::Failed("bad".into()))
        );
    }

    #[tokio::test]
    async fn test_map_shares_token() {
        let inner = yielding(3, 5);
        let inner_token = inner.token();
        let mapped = inner.map(|v| v + 1);
        mapped.cancel();
        assert!(inner_token.is_cancelled());
        assert_eq!(mapped.run().await, Err(TaskError::Cancelled));
    }

    #[tokio::test]
    async fn test_flat_map() {
        let chained = yielding(2, 1).flat_map(|v| yielding(v * 3, 1));
        assert_eq!(chained.run().await, Ok(6));

        let called = Rc::new(Cell::new(false));
        let flag = called.clone();
        let short = failing("first", 0).flat_map(move |v| {
            flag.set(true);
            yielding(v, 0)
        });
        assert_eq!(short.run().await, Err(TaskError::Failed("first".into())));
        assert!(!called.get());
    }

    #[tokio::test]
    async fn test_flat_map_cancel_reaches_dependent() {
        let dependent_token = Rc::new(RefCell::new(None));
        let slot = dependent_token.clone();
        let chained = Task::resolve(1).flat_map(move |v| {
            CancellableTask::new(move |token| {
                *slot.borrow_mut() = Some(token.clone());
                async move {
                    token.cancelled().await;
                    Ok(v)
                }
            })
        });

        let handle = chained.token();
        let (outcome, _) = futures::join!(chained.run(), async {
            tokio::task::yield_now().await;
            handle.cancel();
        });

        assert_eq!(outcome, Err(TaskError::Cancelled));
        let token = dependent_token.borrow_mut().take().unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_catch() {
        let recovered: CancellableTask<i32, ()> = failing("oops", 1).catch(|e| match e {
            TaskError::Failed(msg) if msg == "oops" => Ok(0),
            _ => Err(()),
        });
        assert_eq!(recovered.run().await, Ok(0));

        let untouched = yielding(7, 0).catch(|_| Err::<i32, _>("unused"));
        assert_eq!(untouched.run().await, Ok(7));

        let converted = failing("x", 0).catch(|e| Err::<i32, _>(e.into_failure().map(|m| m.len())));
        assert_eq!(converted.run().await, Err(TaskError::Failed(Some(1))));
    }

    #[tokio::test]
    async fn test_all_ordered_results() {
        let outcome = CancellableTask::all(vec![yielding(1, 3), yielding(2, 1), yielding(3, 0)])
            .run()
            .await;
        assert_eq!(outcome, Ok(vec![1, 2, 3]));

        let empty: Task<Vec<i32>> = CancellableTask::all(Vec::new());
        assert_eq!(empty.run().await, Ok(Vec::new()));
    }

    #[tokio::test]
    async fn test_all_reports_first_error_by_index() {
        let settled = Rc::new(Cell::new(0));
        let counted = |task: Task<i32>| {
            let settled = settled.clone();
            task.map(move |v| {
                settled.set(settled.get() + 1);
                v
            })
        };

        let outcome = CancellableTask::all(vec![
            counted(yielding(1, 0)),
            failing("second", 4),
            failing("third", 0),
            counted(yielding(4, 6)),
        ])
        .run()
        .await;

        assert_eq!(outcome, Err(TaskError::Failed("second".into())));
        assert_eq!(settled.get(), 2, "all tasks must settle before reporting");
    }

    #[tokio::test]
    async fn test_all_cancel_reaches_members() {
        let member = yielding(1, 5);
        let member_token = member.token();
        let all = CancellableTask::all(vec![member]);
        all.cancel();
        assert!(member_token.is_cancelled());
        assert_eq!(all.run().await, Err(TaskError::Cancelled));
    }

    #[tokio::test]
    async fn test_race_cancels_loser() {
        let slow = yielding(1, 10);
        let slow_token = slow.token();
        let fast = yielding(2, 1);

        assert_eq!(slow.race(fast).run().await, Ok(2));
        assert!(slow_token.is_cancelled());
    }

    #[tokio::test]
    async fn test_timeout_by_racing_a_timer() {
        let work: Task<i32> = CancellableTask::new(|token| async move {
            token.cancelled().await;
            Ok(0)
        });
        let work_token = work.token();
        let timer: Task<i32> = CancellableTask::new(|_| async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Err("timed out".to_string())
        });

        let outcome = work.race(timer).run().await;
        assert_eq!(outcome, Err(TaskError::Failed("timed out".into())));
        assert!(work_token.is_cancelled());
    }

    #[test]
    fn test_debug_state() {
        let task = Task::resolve(1);
        assert_eq!(
            format!("{task:?}"),
            "CancellableTask { state: \"Resolved\", cancelled: false }"
        );
        assert!(task.is_settled());
    }
}
