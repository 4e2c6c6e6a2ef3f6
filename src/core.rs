//! The shared resolution cell: the state word, the waiter list, the result
//! cell, the executor reference and the upstream retainer.
//!
//! Grounded on `spsc/channel.rs`'s `Channel<T, N>`: cache-padded atomic
//! fields shared through an `Arc`, a `Drop` impl that reasons carefully
//! about which thread owns which invariant, and manual `unsafe impl
//! Send/Sync` rather than leaning on auto traits.

use std::any::Any;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_utils::CachePadded;

use crate::cell::ResultCell;
use crate::error::DeferredError;
use crate::executor::{Executor, QoS, Task, WorkerPool};
use crate::outcome::Outcome;
use crate::resolver::Resolver;
use crate::waiter::{Handler, WaiterList};

const WAITING: u8 = 0;
const EXECUTING: u8 = 1;
const RESOLVING: u8 = 2;
const RESOLVED: u8 = 3;

/// The externally observable state of a [`Deferred`]. `Resolving` is a
/// transient internal state, collapsed into `Executing` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    Waiting,
    Executing,
    Resolved,
}

pub(crate) struct Inner<V, E> {
    state: CachePadded<AtomicU8>,
    waiters: CachePadded<WaiterList<V, E>>,
    result: ResultCell<V, E>,
    executor: Arc<dyn Executor>,
    qos: QoS,
    /// Written once at construction (before the Resolver is shared with any
    /// other thread) and cleared once, by the thread that wins the resolve
    /// CAS. Both accesses are effectively single-writer, so no lock is
    /// needed — only careful sequencing, the same bargain `ring.rs` makes
    /// for its slots.
    source_retain: UnsafeCell<Option<Box<dyn Any + Send + Sync>>>,
}

// SAFETY: `source_retain` and `result` are only ever mutated by the single
// thread that wins the relevant CAS (construction-time retain, or the
// resolve race); every other access is a read gated by the `waiters`
// acquire/release protocol. `V`/`E` being `Sync` makes `&Outcome<V,E>` safe
// to share across the executor threads that dispatch each waiter.
unsafe impl<V: Send + Sync, E: Send + Sync> Sync for Inner<V, E> {}
unsafe impl<V: Send, E: Send> Send for Inner<V, E> {}

impl<V, E> Inner<V, E> {
    fn qos_or_default(&self, qos: Option<QoS>) -> QoS {
        qos.unwrap_or(self.qos)
    }
}

impl<V: Send + Sync + 'static, E: Send + Sync + 'static> Inner<V, E> {
    /// # Safety
    ///
    /// Each call must be sequenced-before any other call to this method or
    /// to [`Self::resolve`] for the same `Inner` — i.e. either synchronously
    /// at construction time, or from within a handler run that itself
    /// completes (handlers run at most once) before `resolve` is invoked.
    /// A `flat_map`-style combinator that re-points its retained source once
    /// its inner Deferred is known relies on the latter case.
    pub(crate) unsafe fn set_source_retain(&self, source: Box<dyn Any + Send + Sync>) {
        unsafe { *self.source_retain.get() = Some(source) };
    }

    fn release_source_retain(&self) {
        // SAFETY: only the thread that wins the `resolve` CAS reaches here,
        // and it reaches here at most once.
        unsafe { *self.source_retain.get() = None };
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.waiters.is_closed()
    }

    pub(crate) fn peek(&self) -> Option<&Outcome<V, E>> {
        if self.waiters.is_closed() {
            // SAFETY: `is_closed` performed an acquire load pairing with the
            // release swap in `resolve`, so `result` is visible.
            Some(unsafe { self.result.read() })
        } else {
            None
        }
    }

    pub(crate) fn state(&self) -> DeferredState {
        match self.state.load(Ordering::Acquire) {
            WAITING => DeferredState::Waiting,
            RESOLVED => DeferredState::Resolved,
            _ => DeferredState::Executing,
        }
    }

    pub(crate) fn qos(&self) -> QoS {
        self.qos
    }

    pub(crate) fn executor(&self) -> Arc<dyn Executor> {
        self.executor.clone()
    }

    /// Moves this Deferred from `Waiting` to `Executing`, a hint for
    /// producers observing `state()`. No-op if already past `Waiting`.
    fn execute(&self) {
        let _ = self
            .state
            .compare_exchange(WAITING, EXECUTING, Ordering::AcqRel, Ordering::Acquire);
    }

    pub(crate) fn observe(self: &Arc<Self>, qos: Option<QoS>, handler: Handler<V, E>) {
        match self.waiters.push(handler, qos) {
            Ok(()) => {}
            Err(handler) => self.submit_handler(handler, qos),
        }
    }

    fn submit_handler(self: &Arc<Self>, handler: Handler<V, E>, qos: Option<QoS>) {
        let inner = self.clone();
        let task: Task = Box::new(move || {
            // SAFETY: a handler is only ever submitted after `waiters` was
            // observed `CLOSED` (either here, directly, or via drain), so
            // `result` has been written and is visible.
            let outcome = unsafe { inner.result.read() };
            handler(outcome);
        });
        self.executor.submit_with_qos(self.qos_or_default(qos), task);
    }

    /// Attempts the single successful resolution. Returns `true` iff this
    /// call performed it.
    pub(crate) fn resolve(self: &Arc<Self>, outcome: Outcome<V, E>) -> bool {
        loop {
            let current = self.state.load(Ordering::Acquire);
            if current == RESOLVING || current == RESOLVED {
                #[cfg(feature = "tracing")]
                tracing::trace!("resolve attempt on an already-resolving/resolved deferred");
                return false;
            }
            match self.state.compare_exchange(
                current,
                RESOLVING,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(_) => continue,
            }
        }

        #[cfg(feature = "tracing")]
        let is_success = outcome.is_success();

        // SAFETY: we are the unique winner of the CAS above; nobody else
        // writes `result`.
        unsafe { self.result.write(outcome) };

        // The source is no longer needed once our own result is fixed.
        self.release_source_retain();

        self.state.store(RESOLVED, Ordering::Release);

        #[cfg(feature = "tracing")]
        tracing::debug!(success = is_success, "deferred resolved");

        for (handler, qos) in self.waiters.close_and_drain() {
            self.submit_handler(handler, qos);
        }

        true
    }
}

impl<V, E> Drop for Inner<V, E> {
    fn drop(&mut self) {
        if self.is_closed() {
            // SAFETY: resolved exactly once, never read-and-dropped before;
            // this is the unique owner at drop time.
            unsafe { self.result.drop_in_place() };
        }
        // An unresolved `Inner` simply releases `source_retain` (its Drop
        // impl runs normally) and any still-pending waiters are released by
        // `WaiterList`'s own `Drop` — nobody is notified, matching
        // spec.md's "Destroy" step.
    }
}

/// A handle to a computation whose result — a success value or a failure —
/// becomes available at some future time. Once resolved, the result is
/// immutable and broadcast to every registered observer.
///
/// `V` and `E` are required to be `Clone + Send + Sync` because a resolved
/// Deferred broadcasts its single `Outcome` to however many observers
/// registered, each potentially dispatched on a different executor thread:
/// every observer that wants an owned copy clones it out of the shared
/// slot, and the slot itself is read concurrently from multiple threads.
pub struct Deferred<V, E>(pub(crate) Arc<Inner<V, E>>);

impl<V, E> Clone for Deferred<V, E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

fn default_executor() -> Arc<dyn Executor> {
    WorkerPool::global()
}

impl<V: Clone + Send + Sync + 'static, E: Clone + Send + Sync + 'static> Deferred<V, E> {
    /// Builds a pending Deferred and its matching `Resolver`, already moved
    /// to `Executing`. Used by combinators, which drive resolution by
    /// observing a source rather than by a producer closure.
    pub(crate) fn pending(executor: Arc<dyn Executor>, qos: QoS) -> (Self, Resolver<V, E>) {
        let inner = Arc::new(Inner {
            state: CachePadded::new(AtomicU8::new(WAITING)),
            waiters: CachePadded::new(WaiterList::new()),
            result: ResultCell::empty(),
            executor,
            qos,
            source_retain: UnsafeCell::new(None),
        });
        inner.execute();
        let resolver = Resolver::new(Arc::downgrade(&inner), qos);
        (Self(inner), resolver)
    }

    fn new_resolved(executor: Arc<dyn Executor>, qos: QoS, outcome: Outcome<V, E>) -> Self {
        let inner = Arc::new(Inner {
            state: CachePadded::new(AtomicU8::new(RESOLVED)),
            waiters: CachePadded::new(WaiterList::new_closed()),
            result: ResultCell::new(outcome),
            executor,
            qos,
            source_retain: UnsafeCell::new(None),
        });
        #[cfg(feature = "tracing")]
        tracing::trace!("deferred created pre-resolved");
        Self(inner)
    }

    /// An already-resolved, successful Deferred.
    pub fn resolved(value: V) -> Self {
        Self::new_resolved(default_executor(), QoS::default(), Outcome::Success(value))
    }

    /// An already-resolved, failed Deferred.
    pub fn failed(error: E) -> Self {
        Self::new_resolved(default_executor(), QoS::default(), Outcome::Failure(error))
    }

    /// Creates a waiting Deferred and submits `producer(Resolver)` to
    /// `executor` at construction time, moving state to `Executing`.
    pub fn with_producer(
        executor: Arc<dyn Executor>,
        qos: Option<QoS>,
        producer: impl FnOnce(Resolver<V, E>) + Send + 'static,
    ) -> Self {
        let effective_qos = qos.unwrap_or_else(|| executor.qos());
        let (deferred, resolver) = Self::pending(executor.clone(), effective_qos);
        #[cfg(feature = "tracing")]
        tracing::trace!(?effective_qos, "deferred created with producer");
        executor.submit_with_qos(effective_qos, Box::new(move || producer(resolver)));
        deferred
    }

    /// Convenience over [`Self::with_producer`] using the default executor.
    pub fn spawn(
        qos: Option<QoS>,
        producer: impl FnOnce(Resolver<V, E>) + Send + 'static,
    ) -> Self {
        Self::with_producer(default_executor(), qos, producer)
    }

    /// Registers a handler, run exactly once with the final `Outcome`,
    /// immediately if already resolved (still dispatched through the
    /// executor — never synchronously).
    pub fn observe(&self, qos: Option<QoS>, handler: impl FnOnce(&Outcome<V, E>) + Send + 'static) {
        self.0.observe(qos, Box::new(handler));
    }

    /// Runs `handler` only if the Deferred resolves successfully.
    pub fn on_value(&self, handler: impl FnOnce(&V) + Send + 'static) {
        self.observe(None, move |outcome| {
            if let Outcome::Success(v) = outcome {
                handler(v);
            }
        });
    }

    /// Runs `handler` only if the Deferred resolves with a failure.
    pub fn on_error(&self, handler: impl FnOnce(&E) + Send + 'static) {
        self.observe(None, move |outcome| {
            if let Outcome::Failure(e) = outcome {
                handler(e);
            }
        });
    }

    /// Returns the result without blocking, iff already resolved.
    pub fn peek(&self) -> Option<Outcome<V, E>> {
        self.0.peek().cloned()
    }

    /// Current externally observable state.
    pub fn state(&self) -> DeferredState {
        self.0.state()
    }

    /// If `state() == Waiting`, moves it to `Executing`. A hint for
    /// producers that poll `state()`; harmless to call redundantly.
    pub fn execute(&self) {
        self.0.execute();
    }

    pub(crate) fn executor(&self) -> Arc<dyn Executor> {
        self.0.executor()
    }

    pub(crate) fn qos(&self) -> QoS {
        self.0.qos()
    }

    /// Attempts the single successful resolution. Returns `true` iff this
    /// call performed it.
    pub fn resolve(&self, outcome: Outcome<V, E>) -> bool {
        self.0.resolve(outcome)
    }

    /// Equivalent to `resolve(Failure(Canceled(reason)))`. Returns `true`
    /// iff this call performed the resolution.
    pub fn cancel(&self, reason: impl Into<String>) -> bool
    where
        E: From<DeferredError>,
    {
        self.resolve(Outcome::Failure(E::from(DeferredError::Canceled(
            reason.into(),
        ))))
    }

    /// Blocks the calling thread until resolved, then returns the result.
    ///
    /// Must not be called from the same serial executor this Deferred
    /// resolves on — doing so deadlocks, the caller's responsibility to
    /// avoid (the core cannot detect it).
    pub fn get(&self) -> Outcome<V, E> {
        if let Some(outcome) = self.0.peek() {
            return outcome.clone();
        }

        let parker = crossbeam_utils::sync::Parker::new();
        let slot = OneShot::new(parker.unparker().clone());
        let slot_for_handler = slot.clone();
        self.observe(None, move |outcome| {
            slot_for_handler.fulfill(outcome.clone());
        });
        while !slot.is_done() {
            parker.park();
        }
        slot.take()
    }

    /// Blocking; `Some(value)` on success, `None` on failure.
    pub fn value(&self) -> Option<V> {
        self.get().success()
    }

    /// Blocking; `Some(error)` on failure, `None` on success.
    pub fn error(&self) -> Option<E> {
        self.get().failure()
    }
}

/// A single-use handoff from a resolving executor thread to a thread
/// blocked in [`Deferred::get`]. Same single-writer-then-reader shape as
/// [`ResultCell`], specialised with the wake-up side-channel `get` needs.
struct OneShot<V, E>(Arc<OneShotInner<V, E>>);

struct OneShotInner<V, E> {
    cell: ResultCell<V, E>,
    done: std::sync::atomic::AtomicBool,
    unparker: crossbeam_utils::sync::Unparker,
}

// SAFETY: `cell` is written at most once (by `fulfill`) before `done` is
// published with `Release`, and read at most once (by `take`) after `done`
// is observed with `Acquire`.
unsafe impl<V: Send, E: Send> Send for OneShotInner<V, E> {}
unsafe impl<V: Send, E: Send> Sync for OneShotInner<V, E> {}

impl<V, E> Clone for OneShot<V, E> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<V, E> OneShot<V, E> {
    fn new(unparker: crossbeam_utils::sync::Unparker) -> Self {
        Self(Arc::new(OneShotInner {
            cell: ResultCell::empty(),
            done: std::sync::atomic::AtomicBool::new(false),
            unparker,
        }))
    }

    fn fulfill(&self, outcome: Outcome<V, E>) {
        // SAFETY: `fulfill` runs at most once (the observer handler it's
        // installed as is itself run at most once).
        unsafe { self.0.cell.write(outcome) };
        self.0.done.store(true, Ordering::Release);
        self.0.unparker.unpark();
    }

    fn is_done(&self) -> bool {
        self.0.done.load(Ordering::Acquire)
    }

    fn take(self) -> Outcome<V, E>
    where
        V: Clone,
        E: Clone,
    {
        debug_assert!(self.is_done());
        // SAFETY: `is_done` paired an acquire load with `fulfill`'s release
        // store, so `cell` is visible.
        unsafe { self.0.cell.read() }.clone()
    }
}
