use std::cell::UnsafeCell;

use crate::cell::Cell;
use crate::error::BorrowError;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BorrowState {
    Shared(usize),
    Exclusive,
    Unshared,
}

/// A mutable slot with dynamically checked borrow rules.
///
/// Access is closure-scoped: a borrow lives exactly as long as the closure
/// passed to [`borrow`](Self::borrow) or [`borrow_mut`](Self::borrow_mut),
/// and closures cannot suspend, so an update always runs to completion
/// before anything else touches the cell. The only way to overlap two
/// accesses is to reenter the cell from inside a closure; that is refused
/// with a [`BorrowError`] instead of aliasing the value.
pub struct InteriorCell<T> {
    value: UnsafeCell<T>,
    state: Cell<BorrowState>,
}

impl<T> InteriorCell<T> {
    pub fn new(value: T) -> InteriorCell<T> {
        Self {
            value: UnsafeCell::new(value),
            state: Cell::new(BorrowState::Unshared),
        }
    }

    fn acquire(&self) -> Result<Ref<'_, T>, BorrowError> {
        match self.state.get() {
            BorrowState::Exclusive => Err(BorrowError::AlreadyMutablyBorrowed),
            BorrowState::Shared(ref_count) => {
                self.state.set(BorrowState::Shared(ref_count + 1));
                Ok(Ref { cell: self })
            }
            BorrowState::Unshared => {
                self.state.set(BorrowState::Shared(1));
                Ok(Ref { cell: self })
            }
        }
    }

    fn acquire_mut(&self) -> Result<RefMut<'_, T>, BorrowError> {
        match self.state.get() {
            BorrowState::Exclusive => Err(BorrowError::AlreadyMutablyBorrowed),
            BorrowState::Shared(_) => Err(BorrowError::AlreadyBorrowed),
            BorrowState::Unshared => {
                self.state.set(BorrowState::Exclusive);
                Ok(RefMut { cell: self })
            }
        }
    }

    pub fn borrow<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, BorrowError> {
        let guard = self.acquire()?;
        Ok(f(guard.value()))
    }

    pub fn borrow_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> Result<R, BorrowError> {
        let mut guard = self.acquire_mut()?;
        Ok(f(guard.value_mut()))
    }

    /// Replaces the value with `updater(&current)` while holding the cell
    /// exclusively, so no reader can observe a half-applied update.
    pub fn set(&self, updater: impl FnOnce(&T) -> T) -> Result<(), BorrowError> {
        let mut guard = self.acquire_mut()?;
        let next = updater(guard.value_mut());
        *guard.value_mut() = next;
        Ok(())
    }

    pub fn replace(&self, value: T) -> Result<T, BorrowError> {
        let mut guard = self.acquire_mut()?;
        Ok(std::mem::replace(guard.value_mut(), value))
    }

    pub fn get(&self) -> Result<T, BorrowError>
    where
        T: Clone,
    {
        self.borrow(T::clone)
    }

    pub fn state(&self) -> BorrowState {
        self.state.get()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: Default> Default for InteriorCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> std::fmt::Debug for InteriorCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteriorCell")
            .field("state", &self.state.get())
            .finish_non_exhaustive()
    }
}

struct Ref<'cell, T> {
    cell: &'cell InteriorCell<T>,
}

impl<T> Drop for Ref<'_, T> {
    fn drop(&mut self) {
        match self.cell.state.get() {
            BorrowState::Exclusive | BorrowState::Unshared => unreachable!(),
            BorrowState::Shared(1) => self.cell.state.set(BorrowState::Unshared),
            BorrowState::Shared(ref_count) => {
                self.cell.state.set(BorrowState::Shared(ref_count - 1));
            }
        }
    }
}

struct RefMut<'cell, T> {
    cell: &'cell InteriorCell<T>,
}

impl<T> Drop for RefMut<'_, T> {
    fn drop(&mut self) {
        self.cell.state.set(BorrowState::Unshared);
    }
}

impl<T> Ref<'_, T> {
    fn value(&self) -> &T {
        // SAFETY: the state is Shared while this guard lives, so no &mut exists.
        unsafe { &*self.cell.value.get() }
    }
}

impl<T> RefMut<'_, T> {
    fn value_mut(&mut self) -> &mut T {
        // SAFETY: the state is Exclusive while this guard lives and the
        // returned borrow is tied to &mut self.
        unsafe { &mut *self.cell.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_shared_borrows() {
        let c = InteriorCell::new(5);
        let sum = c
            .borrow(|a| {
                assert_eq!(c.state(), BorrowState::Shared(1));
                c.borrow(|b| {
                    assert_eq!(c.state(), BorrowState::Shared(2));
                    a + b
                })
                .unwrap()
            })
            .unwrap();
        assert_eq!(sum, 10);
        assert_eq!(c.state(), BorrowState::Unshared);
    }

    #[test]
    fn test_borrow_mut_rejects_reentry() {
        let c = InteriorCell::new(5);
        let inner = c
            .borrow_mut(|v| {
                *v = 2;
                (c.borrow(|v| *v), c.borrow_mut(|_| ()))
            })
            .unwrap();
        assert_eq!(inner.0, Err(BorrowError::AlreadyMutablyBorrowed));
        assert_eq!(inner.1, Err(BorrowError::AlreadyMutablyBorrowed));

        let denied = c.borrow(|_| c.set(|v| v + 1)).unwrap();
        assert_eq!(denied, Err(BorrowError::AlreadyBorrowed));
        assert_eq!(c.get(), Ok(2));
    }

    #[test]
    fn test_set_and_replace() {
        let c = InteriorCell::new(vec![1]);
        c.set(|v| v.iter().map(|x| x * 10).collect()).unwrap();
        assert_eq!(c.get().unwrap(), vec![10]);
        assert_eq!(c.replace(vec![7]).unwrap(), vec![10]);
        assert_eq!(c.into_inner(), vec![7]);
    }

    #[test]
    fn test_state_released_after_panic() {
        let c = InteriorCell::new(0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            c.borrow_mut(|v| {
                if *v == 0 {
                    panic!("updater failed");
                }
            })
            .unwrap();
        }));
        assert!(result.is_err());
        assert_eq!(c.state(), BorrowState::Unshared);
        assert_eq!(c.get(), Ok(0));
    }
}
