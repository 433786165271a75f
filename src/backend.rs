use std::panic::{AssertUnwindSafe, catch_unwind};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("backend does not support this operation")]
    Unsupported,

    #[error("backend failed: {0}")]
    Failed(String),
}

/// A native implementation of some update `T -> T`.
pub trait NativeUpdate<T> {
    fn name(&self) -> &str;

    fn apply(&self, current: &T) -> Result<T, BackendError>;
}

type Validator<T> = Box<dyn Fn(&T, &T) -> bool>;

/// Capability-based dispatch: native when it works, reference otherwise.
///
/// The reference updater runs whenever the backend is absent, returns an
/// error, panics, or produces a value the validator rejects, so callers see
/// the same values with or without a backend.
pub struct Accelerated<'n, T> {
    native: Option<&'n dyn NativeUpdate<T>>,
    validator: Option<Validator<T>>,
}

impl<'n, T> Accelerated<'n, T> {
    pub fn new(native: &'n dyn NativeUpdate<T>) -> Self {
        Self::detect(Some(native))
    }

    /// Uses the backend when one is present.
    pub fn detect(native: Option<&'n dyn NativeUpdate<T>>) -> Self {
        Self {
            native,
            validator: None,
        }
    }

    /// No backend; always runs the reference updater.
    pub fn reference_only() -> Self {
        Self::detect(None)
    }

    /// Accepts a native result only when `validator(current, next)` holds.
    pub fn with_validator(mut self, validator: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.validator = Some(Box::new(validator));
        self
    }

    pub fn apply(&self, current: &T, reference: impl FnOnce(&T) -> T) -> T {
        match self.try_native(current) {
            Some(next) => next,
            None => reference(current),
        }
    }

    /// Wraps `reference` into an updater usable with any primitive's
    /// `set`/`update` operation.
    pub fn updater<'a>(&'a self, reference: impl FnOnce(&T) -> T + 'a) -> impl FnOnce(&T) -> T + 'a {
        move |current| self.apply(current, reference)
    }

    fn try_native(&self, current: &T) -> Option<T> {
        let native = self.native?;
        let next = match catch_unwind(AssertUnwindSafe(|| native.apply(current))) {
            Ok(Ok(next)) => next,
            Ok(Err(error)) => {
                debug!(backend = native.name(), %error, "native update failed; using reference");
                return None;
            }
            Err(_) => {
                debug!(backend = native.name(), "native update panicked; using reference");
                return None;
            }
        };

        if let Some(validator) = &self.validator {
            if !validator(current, &next) {
                debug!(backend = native.name(), "native result rejected; using reference");
                return None;
            }
        }
        Some(next)
    }
}

impl<T> std::fmt::Debug for Accelerated<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accelerated")
            .field("native", &self.native.map(|n| n.name()))
            .field("validated", &self.validator.is_some())
            .finish()
    }
}
