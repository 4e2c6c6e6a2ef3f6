//! `retrying(n, task)`: re-run a task up to `n` times, resolving with the
//! first success or the last failure.

use std::sync::Arc;

use crate::error::DeferredError;
use crate::Deferred;

/// Runs `task()` once; on failure, re-runs it via a chained [`recover`],
/// up to `n` total attempts. `n < 1` resolves immediately with
/// `Invalid("attempts must be >= 1")`.
///
/// [`recover`]: Deferred::recover
pub fn retrying<V, E, F>(n: u32, task: F) -> Deferred<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static + From<DeferredError>,
    F: Fn() -> Deferred<V, E> + Send + Sync + 'static,
{
    if n < 1 {
        return Deferred::failed(E::from(DeferredError::Invalid(
            "attempts must be >= 1".into(),
        )));
    }
    attempt(Arc::new(task), n)
}

fn attempt<V, E, F>(task: Arc<F>, remaining: u32) -> Deferred<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    F: Fn() -> Deferred<V, E> + Send + Sync + 'static,
{
    let current = (*task)();
    if remaining <= 1 {
        return current;
    }
    current.recover(move |_err| attempt(task, remaining - 1))
}
