//! Single-source combinators: each observes one (or, for `apply`/`flat_map`,
//! two) upstream Deferreds and resolves a freshly constructed downstream
//! one, retaining the upstream for exactly as long as that takes.
//!
//! Every combinator here follows the same shape: build `(child, resolver)`
//! on the source's executor, retain the source, register an observer that
//! resolves `resolver`, return `child`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{DeferredError, Error};
use crate::executor::{Executor, QoS};
use crate::outcome::{Never, Outcome};
use crate::resolver::Resolver;
use crate::Deferred;

impl<V: Clone + Send + Sync + 'static, E: Clone + Send + Sync + 'static> Deferred<V, E> {
    /// Builds a pending child on this Deferred's executor/QoS and retains
    /// `self` as its source, the shared first step of every combinator.
    fn derive<V2, E2>(&self) -> (Deferred<V2, E2>, Resolver<V2, E2>)
    where
        V2: Clone + Send + Sync + 'static,
        E2: Clone + Send + Sync + 'static,
    {
        let (child, resolver) = Deferred::pending(self.executor(), self.qos());
        resolver.retain_source(self.clone());
        (child, resolver)
    }

    /// `Success(v) -> Success(f(v))`; failures pass through untouched.
    pub fn map<V2>(&self, f: impl FnOnce(V) -> V2 + Send + 'static) -> Deferred<V2, E>
    where
        V2: Clone + Send + Sync + 'static,
    {
        let (child, resolver) = self.derive::<V2, E>();
        self.observe(None, move |outcome| {
            resolver.resolve(outcome.clone().map(f));
        });
        child
    }

    /// Like [`Self::map`], but `f` may fail; a failure becomes `Failure`,
    /// widening the error channel to the boxed [`Error`].
    pub fn try_map<V2>(
        &self,
        f: impl FnOnce(V) -> Result<V2, Error> + Send + 'static,
    ) -> Deferred<V2, Error>
    where
        V2: Clone + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (child, resolver) = self.derive::<V2, Error>();
        self.observe(None, move |outcome| {
            let resolved = match outcome.clone() {
                Outcome::Success(v) => match f(v) {
                    Ok(v2) => Outcome::Success(v2),
                    Err(err) => Outcome::Failure(err),
                },
                Outcome::Failure(e) => Outcome::Failure(Box::new(e) as Error),
            };
            resolver.resolve(resolved);
        });
        child
    }

    /// Only transforms the failure payload.
    pub fn map_err<E2>(&self, f: impl FnOnce(E) -> E2 + Send + 'static) -> Deferred<V, E2>
    where
        E2: Clone + Send + Sync + 'static,
    {
        let (child, resolver) = self.derive::<V, E2>();
        self.observe(None, move |outcome| {
            resolver.resolve(outcome.clone().map_err(f));
        });
        child
    }

    /// On success, invokes `f(v)` to obtain a downstream Deferred and
    /// forwards its resolution. On failure, forwards the error untouched —
    /// the error channel is unchanged by `flat_map`.
    pub fn flat_map<V2>(
        &self,
        f: impl FnOnce(V) -> Deferred<V2, E> + Send + 'static,
    ) -> Deferred<V2, E>
    where
        V2: Clone + Send + Sync + 'static,
    {
        let (child, resolver) = self.derive::<V2, E>();
        self.observe(None, move |outcome| match outcome.clone() {
            Outcome::Success(v) => {
                let inner = f(v);
                resolver.retain_source(inner.clone());
                inner.observe(None, move |inner_outcome| {
                    resolver.resolve(inner_outcome.clone());
                });
            }
            Outcome::Failure(e) => {
                resolver.resolve(Outcome::Failure(e));
            }
        });
        child
    }

    /// Like [`Self::flat_map`], but `f` may fail synchronously before ever
    /// producing the inner Deferred; widens the error channel to [`Error`].
    pub fn try_flat_map<V2>(
        &self,
        f: impl FnOnce(V) -> Result<Deferred<V2, Error>, Error> + Send + 'static,
    ) -> Deferred<V2, Error>
    where
        V2: Clone + Send + Sync + 'static,
        E: std::error::Error + Send + Sync + 'static,
    {
        let (child, resolver) = self.derive::<V2, Error>();
        self.observe(None, move |outcome| match outcome.clone() {
            Outcome::Success(v) => match f(v) {
                Ok(inner) => {
                    resolver.retain_source(inner.clone());
                    inner.observe(None, move |inner_outcome| {
                        resolver.resolve(inner_outcome.clone());
                    });
                }
                Err(err) => {
                    resolver.resolve(Outcome::Failure(err));
                }
            },
            Outcome::Failure(e) => {
                resolver.resolve(Outcome::Failure(Box::new(e) as Error));
            }
        });
        child
    }

    /// On failure, invokes `f(e)` to obtain a recovery Deferred and forwards
    /// it; on success, forwards the value untouched.
    pub fn recover<E2>(
        &self,
        f: impl FnOnce(E) -> Deferred<V, E2> + Send + 'static,
    ) -> Deferred<V, E2>
    where
        E2: Clone + Send + Sync + 'static,
    {
        let (child, resolver) = self.derive::<V, E2>();
        self.observe(None, move |outcome| match outcome.clone() {
            Outcome::Success(v) => {
                resolver.resolve(Outcome::Success(v));
            }
            Outcome::Failure(e) => {
                let inner = f(e);
                resolver.retain_source(inner.clone());
                inner.observe(None, move |inner_outcome| {
                    resolver.resolve(inner_outcome.clone());
                });
            }
        });
        child
    }

    /// Waits for both `self` and the infallible `transform` to succeed, then
    /// applies the function `transform` carries. A failure on `self`
    /// short-circuits without waiting for `transform`.
    pub fn apply<V2, F>(&self, transform: &Deferred<F, Never>) -> Deferred<V2, E>
    where
        F: FnOnce(V) -> V2 + Clone + Send + Sync + 'static,
        V2: Clone + Send + Sync + 'static,
    {
        let transform = transform.clone();
        self.flat_map(move |v| transform.map(move |f| f(v)).widen_error::<E>())
    }

    /// A [`Self::try_map`] that fails with `Invalid(message)` when
    /// `predicate` returns `false`.
    pub fn validate(
        &self,
        predicate: impl Fn(&V) -> bool + Send + 'static,
        message: impl Into<String>,
    ) -> Deferred<V, Error>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = message.into();
        self.try_map(move |v| {
            if predicate(&v) {
                Ok(v)
            } else {
                Err(Box::new(DeferredError::Invalid(message)) as Error)
            }
        })
    }

    /// Resolves with the same result as `self`, but not before `deadline`.
    /// A failure bypasses the delay and propagates immediately. A deadline
    /// already in the past behaves like an identity transform.
    pub fn delay_until(&self, deadline: Instant) -> Deferred<V, E> {
        let (child, resolver) = self.derive::<V, E>();
        let executor = self.executor();
        self.observe(None, move |outcome| match outcome.clone() {
            Outcome::Success(v) => {
                if Instant::now() >= deadline {
                    resolver.resolve(Outcome::Success(v));
                } else {
                    executor.submit_after(
                        deadline,
                        Box::new(move || {
                            resolver.resolve(Outcome::Success(v));
                        }),
                    );
                }
            }
            Outcome::Failure(e) => {
                resolver.resolve(Outcome::Failure(e));
            }
        });
        child
    }

    /// Equivalent to `self.delay_until(Instant::now() + duration)`.
    pub fn delay(&self, duration: Duration) -> Deferred<V, E> {
        self.delay_until(Instant::now() + duration)
    }

    /// Resolves like `self` if it resolves before `duration` elapses;
    /// otherwise resolves with `Failure(TimedOut(reason))` and cancels
    /// `self`.
    pub fn timeout(&self, duration: Duration, reason: impl Into<String>) -> Deferred<V, E>
    where
        E: From<DeferredError>,
    {
        let reason = reason.into();
        let (child, resolver) = self.derive::<V, E>();

        let forwarding_resolver = resolver.clone();
        self.observe(None, move |outcome| {
            forwarding_resolver.resolve(outcome.clone());
        });

        let source = self.clone();
        let executor = self.executor();
        executor.submit_after(
            Instant::now() + duration,
            Box::new(move || {
                let timed_out = E::from(DeferredError::TimedOut(reason.clone()));
                if resolver.resolve(Outcome::Failure(timed_out)) {
                    source.cancel(reason);
                }
            }),
        );

        child
    }

    /// Identity transform that moves the downstream onto `executor`.
    pub fn enqueuing_on(&self, executor: Arc<dyn Executor>) -> Deferred<V, E> {
        let (child, resolver) = Deferred::pending(executor, self.qos());
        resolver.retain_source(self.clone());
        self.observe(None, move |outcome| {
            resolver.resolve(outcome.clone());
        });
        child
    }

    /// Identity transform that moves the downstream to `qos`.
    pub fn enqueuing_at(&self, qos: QoS) -> Deferred<V, E> {
        let (child, resolver) = Deferred::pending(self.executor(), qos);
        resolver.retain_source(self.clone());
        self.observe(None, move |outcome| {
            resolver.resolve(outcome.clone());
        });
        child
    }
}

impl<V: Clone + Send + Sync + 'static> Deferred<V, Never> {
    /// Widens an infallible Deferred's error channel to any `E2` — sound
    /// because `Never` is uninhabited, so the `Failure` arm never runs.
    pub fn widen_error<E2: Clone + Send + Sync + 'static>(&self) -> Deferred<V, E2> {
        self.map_err(|never| match never {})
    }
}
