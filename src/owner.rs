use tracing::trace;

use crate::error::OwnershipError;

/// A value with exactly one live owner, checked at run time.
///
/// `consume` moves the value out once; after that every access fails with
/// [`OwnershipError::AlreadyConsumed`]. There is no way back to the active
/// state.
pub struct ExclusiveOwner<T> {
    state: OwnerState<T>,
}

enum OwnerState<T> {
    Active(T),
    Consumed,
}

impl<T> ExclusiveOwner<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: OwnerState::Active(value),
        }
    }

    /// Moves the value out, leaving the owner permanently consumed.
    pub fn consume(&mut self) -> Result<T, OwnershipError> {
        self.try_consume().ok_or(OwnershipError::AlreadyConsumed)
    }

    pub fn try_consume(&mut self) -> Option<T> {
        match std::mem::replace(&mut self.state, OwnerState::Consumed) {
            OwnerState::Active(value) => {
                trace!("exclusive owner consumed");
                Some(value)
            }
            OwnerState::Consumed => None,
        }
    }

    pub fn borrow<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, OwnershipError> {
        match &self.state {
            OwnerState::Active(value) => Ok(f(value)),
            OwnerState::Consumed => Err(OwnershipError::AlreadyConsumed),
        }
    }

    pub fn borrow_mut<R>(&mut self, f: impl FnOnce(&mut T) -> R) -> Result<R, OwnershipError> {
        match &mut self.state {
            OwnerState::Active(value) => Ok(f(value)),
            OwnerState::Consumed => Err(OwnershipError::AlreadyConsumed),
        }
    }

    pub fn is_consumed(&self) -> bool {
        matches!(self.state, OwnerState::Consumed)
    }
}

impl<T> std::fmt::Debug for ExclusiveOwner<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = if self.is_consumed() { "Consumed" } else { "Active" };
        f.debug_struct("ExclusiveOwner").field("state", &tag).finish()
    }
}
