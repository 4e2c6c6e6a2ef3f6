//! Composable, lock-free futures: a `Deferred` is a handle to a computation
//! whose result — a success value or a failure — becomes available at some
//! future time. Once resolved, the result is immutable and broadcast to
//! every observer registered before or after resolution.
//!
//! ## How it works
//!
//!```text
//!            observe()          observe()
//!  producer ───────────▶ waiters ───────────▶ more waiters
//!      │                    │ (lock-free, Treiber-stack-ish)
//!      │ resolve(Outcome)   │
//!      ▼                    ▼
//!  result cell  ──CLOSED──▶ drained, each waiter's handler
//!  (write once)             submitted to its executor
//!```
//!
//! - **Observers** registered before resolution are queued on an
//!   intrusive, atomically-swapped waiter list and drained in registration
//!   order once the Deferred resolves.
//! - **Observers** registered after resolution are dispatched immediately
//!   — always through the executor, never synchronously on the caller's
//!   stack.
//! - **Combinators** (`map`, `flat_map`, `recover`, ...) are themselves
//!   observers: each constructs a fresh Deferred whose resolution is driven
//!   by observing one or more sources, retaining those sources only for as
//!   long as it takes.
//!
//! ## Synchronization
//!
//! No locks anywhere in the core. The waiter-list head and the state word
//! are the only shared mutable state, both moved with acquire/release
//! atomics:
//!
//! | Operation | Ordering | Purpose |
//! |---|---|---|
//! | CAS state `Waiting/Executing → Resolving` | `AcqRel` | at-most-once resolution |
//! | write `result` | (plain) | ordered-before the swap below on the same thread |
//! | swap `waiters` to `CLOSED` | `AcqRel` | publishes `result` to every observer |
//! | load `waiters` (`is_closed`, `push`) | `Acquire` | pairs with the swap above |
//!
//! ## Cancellation
//!
//! A combinator's downstream Deferred retains its upstream only for as long
//! as it might still resolve. Dropping the last strong reference to a
//! downstream node releases that retainer; if it was the source's last
//! strong reference too, the source is destroyed unresolved and its
//! producer's `Resolver::needs_resolution` flips to `false` — cancellation
//! propagating upstream without any explicit signal.
//!
//! ## Example
//!
//!```
//! use deferred::Deferred;
//!
//! let d: Deferred<i32, &str> = Deferred::resolved(41).map(|v| v + 1);
//! assert_eq!(d.get().success(), Some(42));
//!```

mod aggregators;
mod cell;
mod combinators;
mod core;
mod error;
mod executor;
mod outcome;
mod resolver;
mod retry;
mod waiter;

pub use crate::aggregators::{combine, first_resolved, first_value, in_parallel, reduce};
pub use crate::core::{Deferred, DeferredState};
pub use crate::error::{DeferredError, Error};
pub use crate::executor::{Executor, QoS, Task, WorkerPool};
pub use crate::outcome::{Never, Outcome};
pub use crate::resolver::Resolver;
pub use crate::retry::retrying;
