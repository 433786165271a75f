use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::LocalBoxFuture;
use tracing::{debug, trace, warn};

use crate::error::ResourceError;

/// Anything that can be torn down exactly once.
#[async_trait(?Send)]
pub trait Disposable {
    /// Releases the underlying resource. Calling it again is a no-op.
    async fn dispose(&mut self);

    fn is_disposed(&self) -> bool;
}

enum Release<T> {
    Sync(Box<dyn FnOnce(T)>),
    Async(Box<dyn FnOnce(T) -> LocalBoxFuture<'static, ()>>),
}

/// A value paired with its release action.
///
/// Dropping an active resource runs a synchronous release on the spot. An
/// asynchronous release cannot be awaited from `Drop`, so call
/// [`dispose`](Self::dispose) or use [`with_resource`] for those.
pub struct ManagedResource<T> {
    value: Option<T>,
    release: Option<Release<T>>,
    disposed: bool,
}

impl<T> ManagedResource<T> {
    pub fn new(value: T, release: impl FnOnce(T) + 'static) -> Self {
        Self {
            value: Some(value),
            release: Some(Release::Sync(Box::new(release))),
            disposed: false,
        }
    }

    pub fn with_async_release<F, Fut>(value: T, release: F) -> Self
    where
        F: FnOnce(T) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        Self {
            value: Some(value),
            release: Some(Release::Async(Box::new(move |value| {
                release(value).boxed_local()
            }))),
            disposed: false,
        }
    }

    pub fn use_value<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ResourceError> {
        match &self.value {
            Some(value) if !self.disposed => Ok(f(value)),
            _ => Err(ResourceError::Disposed),
        }
    }

    pub async fn use_value_async<R>(&self, f: impl AsyncFnOnce(&T) -> R) -> Result<R, ResourceError> {
        match &self.value {
            Some(value) if !self.disposed => Ok(f(value).await),
            _ => Err(ResourceError::Disposed),
        }
    }

    /// Runs the release action the first time it is called and clears the
    /// stored value. Later calls do nothing.
    pub async fn dispose(&mut self) {
        if self.disposed {
            trace!("managed resource already disposed");
            return;
        }
        self.disposed = true;

        if let (Some(value), Some(release)) = (self.value.take(), self.release.take()) {
            match release {
                Release::Sync(release) => release(value),
                Release::Async(release) => release(value).await,
            }
        }
        debug!("managed resource disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[async_trait(?Send)]
impl<T> Disposable for ManagedResource<T> {
    async fn dispose(&mut self) {
        ManagedResource::dispose(self).await
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl<T> Drop for ManagedResource<T> {
    fn drop(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        match (self.value.take(), self.release.take()) {
            (Some(value), Some(Release::Sync(release))) => {
                release(value);
                debug!("managed resource released on drop");
            }
            (Some(_), Some(Release::Async(_))) => {
                warn!("managed resource dropped without dispose; async release skipped");
            }
            _ => {}
        }
    }
}

impl<T> std::fmt::Debug for ManagedResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedResource")
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

/// Scoped use: runs `f` against the resource and disposes it on every exit
/// path, including a panic inside `f`, which is resumed after disposal.
///
/// Fails without calling `f` if the resource is already disposed.
pub async fn with_resource<T, R>(
    mut resource: ManagedResource<T>,
    f: impl AsyncFnOnce(&T) -> R,
) -> Result<R, ResourceError> {
    let outcome = match &resource.value {
        Some(value) if !resource.disposed => AssertUnwindSafe(f(value)).catch_unwind().await,
        _ => return Err(ResourceError::Disposed),
    };

    resource.dispose().await;

    match outcome {
        Ok(result) => Ok(result),
        Err(panic) => std::panic::resume_unwind(panic),
    }
}

/// An ordered collection of disposables torn down last-in, first-out.
#[derive(Default)]
pub struct ResourceGroup {
    members: Vec<Box<dyn Disposable>>,
    disposed: bool,
}

impl ResourceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, member: impl Disposable + 'static) -> Result<(), ResourceError> {
        if self.disposed {
            return Err(ResourceError::GroupDisposed);
        }
        self.members.push(Box::new(member));
        Ok(())
    }

    /// Disposes members from last added to first added, awaiting each one
    /// before starting the next.
    pub async fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        debug!(members = self.members.len(), "disposing resource group");
        while let Some(mut member) = self.members.pop() {
            member.dispose().await;
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }
}

#[async_trait(?Send)]
impl Disposable for ResourceGroup {
    async fn dispose(&mut self) {
        ResourceGroup::dispose(self).await
    }

    fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl Drop for ResourceGroup {
    fn drop(&mut self) {
        // Vec drops front to back; keep reverse order for members released on drop.
        while let Some(member) = self.members.pop() {
            drop(member);
        }
    }
}
