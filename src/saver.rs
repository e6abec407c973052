use async_trait::async_trait;
use std::future::Future;

use crate::error::SaveError;

/// Remote persistence for a tracked value.
///
/// Transport, auth and retries are the implementor's business. The coordinator
/// only distinguishes network failures (queued for later) from everything
/// else (surfaced as an error).
#[async_trait]
pub trait Saver<T>: Send + Sync {
    async fn save(&self, value: T) -> Result<(), SaveError>;
}

/// Adapts an async closure into a [`Saver`].
pub struct FnSaver<F>(F);

pub fn from_fn<F>(f: F) -> FnSaver<F> {
    FnSaver(f)
}

#[async_trait]
impl<T, F, Fut> Saver<T> for FnSaver<F>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), SaveError>> + Send,
{
    async fn save(&self, value: T) -> Result<(), SaveError> {
        (self.0)(value).await
    }
}
