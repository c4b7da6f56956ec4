//! Bounded, ordered per-item execution with cooperative cancellation

use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

use crate::error::{ReconcileError, Result};

/// Run `work` over `plan` with at most `workers` items in flight.
///
/// Results come back in plan order, one per item. The token is checked as
/// each item starts: items already running finish, the rest resolve to
/// [`ReconcileError::Cancelled`].
pub async fn run_ordered<'a, T, R, F, Fut>(
    plan: &'a [T],
    workers: usize,
    cancel: &CancellationToken,
    work: F,
) -> Vec<Result<R>>
where
    F: Fn(&'a T) -> Fut,
    Fut: Future<Output = Result<R>> + 'a,
{
    stream::iter(plan)
        .map(|item| {
            let job = work(item);
            async move {
                if cancel.is_cancelled() {
                    return Err(ReconcileError::Cancelled);
                }
                job.await
            }
        })
        .buffered(workers.max(1))
        .collect()
        .await
}

/// Run file work on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ReconcileError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
