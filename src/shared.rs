use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use tracing::trace;

use crate::cell::Cell;
use crate::error::BorrowError;
use crate::interior::InteriorCell;

/// Single-threaded reference-counted shared ownership.
///
/// Every clone points at the same heap slot, and the slot holds the value
/// inside an [`InteriorCell`], so a mutation made through one handle is seen
/// by all of them on their next read. The value is dropped when the last
/// strong handle goes away; the slot itself lives on until the last
/// [`WeakHandle`] is gone too.
pub struct SharedHandle<T> {
    inner: NonNull<SharedInner<T>>,
}

struct SharedInner<T> {
    cell: ManuallyDrop<InteriorCell<T>>,
    strong: Cell<usize>,
    // Strong handles collectively hold one weak reference, released when
    // the value is dropped.
    weak: Cell<usize>,
}

impl<T> SharedHandle<T> {
    pub fn new(value: T) -> Self {
        let inner = Box::new(SharedInner {
            cell: ManuallyDrop::new(InteriorCell::new(value)),
            strong: Cell::new(1),
            weak: Cell::new(1),
        });

        Self {
            inner: unsafe { NonNull::new_unchecked(Box::into_raw(inner)) },
        }
    }

    fn inner(&self) -> &SharedInner<T> {
        // SAFETY: the slot outlives every strong handle.
        unsafe { self.inner.as_ref() }
    }

    pub fn strong_count(&self) -> usize {
        self.inner().strong.get()
    }

    pub fn weak_count(&self) -> usize {
        self.inner().weak.get() - 1
    }

    /// True when both handles alias the same slot.
    pub fn ptr_eq(&self, other: &SharedHandle<T>) -> bool {
        self.inner == other.inner
    }

    pub fn downgrade(&self) -> WeakHandle<T> {
        let weak = self.inner().weak.update(|n| n + 1);
        trace!(weak = weak - 1, "weak handle created");
        WeakHandle {
            inner: Some(self.inner),
        }
    }
}

impl<T> Clone for SharedHandle<T> {
    fn clone(&self) -> Self {
        let strong = self.inner().strong.update(|n| n + 1);
        trace!(strong, "shared handle cloned");
        SharedHandle { inner: self.inner }
    }
}

impl<T> std::ops::Deref for SharedHandle<T> {
    type Target = InteriorCell<T>;
    fn deref(&self) -> &Self::Target {
        &self.inner().cell
    }
}

impl<T> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        let strong = self.inner().strong.update(|n| n - 1);
        trace!(strong, "shared handle dropped");
        if strong != 0 {
            return;
        }

        unsafe {
            // take ownership and drop the value; weak handles may still point at the slot
            ManuallyDrop::drop(&mut (*self.inner.as_ptr()).cell);
            release_weak(self.inner);
        }
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("SharedHandle");
        if self.borrow(|v| {
            s.field("value", v);
        })
        .is_err()
        {
            s.field("value", &format_args!("<borrowed>"));
        }
        s.field("strong", &self.strong_count()).finish()
    }
}

/// Drops one weak reference and frees the slot when it was the last.
///
/// # Safety
/// `inner` must point at a live slot whose value has already been dropped
/// or is still owned by some other strong handle.
unsafe fn release_weak<T>(inner: NonNull<SharedInner<T>>) {
    let weak = unsafe { inner.as_ref() }.weak.update(|n| n - 1);
    if weak == 0 {
        // SAFETY: no strong or weak handle is left.
        drop(unsafe { Box::from_raw(inner.as_ptr()) });
    }
}

/// A non-owning observer of a [`SharedHandle`]'s value.
///
/// Holding one never keeps the value alive.
pub struct WeakHandle<T> {
    inner: Option<NonNull<SharedInner<T>>>,
}

impl<T> WeakHandle<T> {
    /// A handle that observes nothing; `upgrade` always returns `None`.
    pub fn new() -> Self {
        Self { inner: None }
    }

    pub fn upgrade(&self) -> Option<SharedHandle<T>> {
        let inner = self.inner?;
        // SAFETY: the weak reference keeps the slot allocated.
        let slot = unsafe { inner.as_ref() };
        if slot.strong.get() == 0 {
            return None;
        }
        slot.strong.update(|n| n + 1);
        Some(SharedHandle { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.strong_count() > 0
    }

    pub fn strong_count(&self) -> usize {
        match self.inner {
            // SAFETY: the weak reference keeps the slot allocated.
            Some(inner) => unsafe { inner.as_ref() }.strong.get(),
            None => 0,
        }
    }

    /// The current value if any strong handle is still alive, else `default`.
    ///
    /// A live value that is exclusively borrowed at the moment is reported
    /// as a [`BorrowError`], never as `default`.
    pub fn get_or_default(&self, default: T) -> Result<T, BorrowError>
    where
        T: Clone,
    {
        match self.upgrade() {
            Some(handle) => handle.get(),
            None => Ok(default),
        }
    }
}

impl<T> Default for WeakHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for WeakHandle<T> {
    fn clone(&self) -> Self {
        if let Some(inner) = self.inner {
            // SAFETY: the weak reference keeps the slot allocated.
            unsafe { inner.as_ref() }.weak.update(|n| n + 1);
        }
        WeakHandle { inner: self.inner }
    }
}

impl<T> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        if let Some(inner) = self.inner {
            unsafe { release_weak(inner) };
        }
    }
}

impl<T> std::fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakHandle")
            .field("alive", &self.is_alive())
            .finish()
    }
}
