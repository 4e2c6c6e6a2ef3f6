//! The producer-side handle to a pending [`Deferred`](crate::Deferred): the
//! only thing a task running inside an [`Executor`](crate::Executor) needs
//! in order to eventually resolve it.
//!
//! Deliberately holds only a `Weak` reference — this is the other half of
//! the cancel-on-last-observer-drop story: a `Resolver` never keeps a
//! `Deferred` alive by itself.

use std::any::Any;
use std::sync::{Arc, Weak};

use crate::core::Inner;
use crate::error::DeferredError;
use crate::executor::QoS;
use crate::outcome::Outcome;

pub struct Resolver<V, E> {
    inner: Weak<Inner<V, E>>,
    qos: QoS,
}

impl<V, E> Clone for Resolver<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            qos: self.qos,
        }
    }
}

impl<V: Send + Sync + 'static, E: Send + Sync + 'static> Resolver<V, E> {
    pub(crate) fn new(inner: Weak<Inner<V, E>>, qos: QoS) -> Self {
        Self { inner, qos }
    }

    /// Attempts the single successful resolution. Returns `true` iff this
    /// call performed it, `false` if already resolved or the Deferred was
    /// already dropped.
    pub fn resolve(&self, outcome: Outcome<V, E>) -> bool {
        match self.inner.upgrade() {
            Some(inner) => Inner::resolve(&inner, outcome),
            None => false,
        }
    }

    pub fn resolve_value(&self, value: V) -> bool {
        self.resolve(Outcome::Success(value))
    }

    pub fn resolve_error(&self, error: E) -> bool {
        self.resolve(Outcome::Failure(error))
    }

    /// Equivalent to `resolve(Failure(Canceled(reason)))`.
    pub fn cancel(&self, reason: impl Into<String>) -> bool
    where
        E: From<DeferredError>,
    {
        self.resolve(Outcome::Failure(E::from(DeferredError::Canceled(
            reason.into(),
        ))))
    }

    /// `true` iff the Deferred is still unresolved and still referenced by
    /// something other than this `Resolver` and this call's own temporary
    /// upgrade — i.e. there is still someone who could observe the result.
    /// A producer can poll this to bail out early once nobody cares anymore.
    pub fn needs_resolution(&self) -> bool {
        match self.inner.upgrade() {
            None => false,
            Some(inner) => {
                let resolved = inner.is_closed();
                let still_referenced = Arc::strong_count(&inner) > 1;
                !resolved && still_referenced
            }
        }
    }

    pub fn qos(&self) -> QoS {
        self.qos
    }

    /// Keeps `source` alive until this Deferred resolves (or is destroyed
    /// unresolved). Used by combinators to retain their upstream `Deferred`
    /// for exactly as long as it's needed, which is what makes dropping the
    /// last strong reference to a downstream node cascade: nothing else
    /// keeps its source alive.
    ///
    /// Safe to call more than once (each call replaces the prior retained
    /// source) as long as calls and `resolve` never race — true for every
    /// combinator in this crate, which either retains once at construction
    /// or re-points from within a handler that completes before the next
    /// stage resolves.
    pub(crate) fn retain_source<S: Send + Sync + 'static>(&self, source: S) {
        if let Some(inner) = self.inner.upgrade() {
            // SAFETY: see the doc comment above — single-threaded at this
            // point in every call site in this crate.
            unsafe { inner.set_source_retain(Box::new(source) as Box<dyn Any + Send + Sync>) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Deferred;

    #[test]
    fn resolve_after_deferred_dropped_returns_false() {
        let (d, r): (Deferred<i32, &str>, Resolver<i32, &str>) =
            Deferred::pending(crate::executor::WorkerPool::global(), QoS::Default);
        drop(d);
        assert!(!r.resolve(Outcome::Success(1)));
    }

    #[test]
    fn needs_resolution_false_once_resolved() {
        let (d, r): (Deferred<i32, &str>, Resolver<i32, &str>) =
            Deferred::pending(crate::executor::WorkerPool::global(), QoS::Default);
        assert!(r.needs_resolution());
        d.resolve(Outcome::Success(1));
        assert!(!r.needs_resolution());
    }
}
