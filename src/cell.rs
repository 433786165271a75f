use std::cell::UnsafeCell;

/// Copy-in/copy-out slot for the small state words every primitive keeps:
/// consumed flags, lock flags, reader counts, refcounts.
///
/// No reference to the inner value is ever handed out, so `set` can never
/// invalidate a borrow. The type is `!Sync` through `UnsafeCell`, which is
/// what confines each primitive to a single cooperative thread.
pub(crate) struct Cell<T> {
    value: UnsafeCell<T>,
}

impl<T> Cell<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self {
            value: UnsafeCell::new(value),
        }
    }

    pub(crate) fn set(&self, value: T) {
        // SAFETY: !Sync, and no reference into the cell ever escapes.
        unsafe { *self.value.get() = value };
    }

    pub(crate) fn replace(&self, value: T) -> T {
        // SAFETY: same as `set`.
        unsafe { std::mem::replace(&mut *self.value.get(), value) }
    }
}

impl<T: Copy> Cell<T> {
    pub(crate) fn get(&self) -> T {
        // SAFETY: only get/set/replace touch the value and none of them reenter.
        unsafe { *self.value.get() }
    }

    pub(crate) fn update(&self, f: impl FnOnce(T) -> T) -> T {
        let next = f(self.get());
        self.set(next);
        next
    }
}

impl<T: Default> Cell<T> {
    pub(crate) fn take(&self) -> T {
        self.replace(T::default())
    }
}

impl<T: Default> Default for Cell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + std::fmt::Debug> std::fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Cell").field(&self.get()).finish()
    }
}

/// Implied by UnsafeCell: Cell is !Sync.
/// ```compile_fail
///  use std::sync::Arc;
///  let lock = Arc::new(ownkit::Mutex::new(0));
///  std::thread::spawn(move || { lock.get(); });
/// ```
#[allow(dead_code)]
struct ThreadUnsafeTest {}
