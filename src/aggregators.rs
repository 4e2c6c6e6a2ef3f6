//! Combinators over finite collections of Deferreds: `combine`, `reduce`,
//! `first_value`, `first_resolved`, `in_parallel`.
//!
//! Unlike the single-source combinators in `combinators.rs`, these need to
//! join results from N independent sources that may complete on N different
//! executor threads. A `Mutex`-protected slot per input is the simplest
//! correct way to do that join; it's user-level coordination code, not part
//! of the lock-free core (the core itself — state word, waiter list, result
//! cell — never takes a lock).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::DeferredError;
use crate::executor::{Executor, QoS};
use crate::outcome::{Never, Outcome};
use crate::Deferred;

/// Collects `n` independent values in input order. Succeeds once every
/// input succeeds; fails with the first failure encountered by completion
/// time, at which point later-arriving results are ignored. Empty input
/// succeeds immediately with an empty vector.
pub fn combine<V, E>(deferreds: Vec<Deferred<V, E>>) -> Deferred<Vec<V>, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    if deferreds.is_empty() {
        return Deferred::resolved(Vec::new());
    }

    let executor = deferreds[0].executor();
    let qos = deferreds[0].qos();
    let (child, resolver) = Deferred::pending(executor, qos);
    resolver.retain_source(deferreds.clone());

    let remaining = Arc::new(AtomicUsize::new(deferreds.len()));
    let slots: Arc<Vec<Mutex<Option<V>>>> =
        Arc::new(deferreds.iter().map(|_| Mutex::new(None)).collect());

    for (index, d) in deferreds.iter().enumerate() {
        let resolver = resolver.clone();
        let remaining = remaining.clone();
        let slots = slots.clone();
        d.observe(None, move |outcome| match outcome.clone() {
            Outcome::Success(v) => {
                *slots[index].lock().unwrap() = Some(v);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let values = slots
                        .iter()
                        .map(|slot| slot.lock().unwrap().take().expect("slot filled before drain"))
                        .collect();
                    resolver.resolve(Outcome::Success(values));
                }
            }
            Outcome::Failure(e) => {
                resolver.resolve(Outcome::Failure(e));
            }
        });
    }

    child
}

/// Left-folds `initial` over `xs` in input order: later inputs are only
/// observed after earlier ones resolve successfully. The first failure
/// terminates the fold and propagates.
pub fn reduce<V, E, U>(
    xs: Vec<Deferred<V, E>>,
    initial: U,
    f: impl Fn(U, V) -> U + Send + Sync + 'static,
) -> Deferred<U, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
    U: Clone + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let mut acc: Deferred<U, E> = Deferred::resolved(initial);
    for x in xs {
        let f = f.clone();
        acc = acc.flat_map(move |u| x.map(move |v| f(u, v)));
    }
    acc
}

/// Resolves with the first **successful** value among `xs`. If every input
/// fails, resolves with the last-observed failure. Empty input resolves
/// with `Canceled("empty")`. If `cancel_others`, every other input is
/// cancelled once this aggregator resolves.
pub fn first_value<V, E>(xs: Vec<Deferred<V, E>>, cancel_others: bool) -> Deferred<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static + From<DeferredError>,
{
    if xs.is_empty() {
        return Deferred::failed(E::from(DeferredError::Canceled("empty".into())));
    }

    let executor = xs[0].executor();
    let qos = xs[0].qos();
    let (child, resolver) = Deferred::pending(executor, qos);
    resolver.retain_source(xs.clone());

    let last_failure: Arc<Mutex<Option<E>>> = Arc::new(Mutex::new(None));
    let remaining = Arc::new(AtomicUsize::new(xs.len()));

    for x in xs.iter().cloned() {
        let resolver = resolver.clone();
        let last_failure = last_failure.clone();
        let remaining = remaining.clone();
        let siblings = cancel_others.then(|| xs.clone());
        x.observe(None, move |outcome| match outcome.clone() {
            Outcome::Success(v) => {
                if resolver.resolve(Outcome::Success(v)) {
                    if let Some(siblings) = siblings {
                        for s in siblings {
                            s.cancel("first_value resolved");
                        }
                    }
                }
            }
            Outcome::Failure(e) => {
                *last_failure.lock().unwrap() = Some(e);
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let failure = last_failure
                        .lock()
                        .unwrap()
                        .take()
                        .expect("at least one failure recorded");
                    resolver.resolve(Outcome::Failure(failure));
                }
            }
        });
    }

    child
}

/// Resolves with whichever of `xs` resolves first, success or failure.
/// Empty input resolves with `Canceled("empty")`. If `cancel_others`, every
/// other input is cancelled once this aggregator resolves.
pub fn first_resolved<V, E>(xs: Vec<Deferred<V, E>>, cancel_others: bool) -> Deferred<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static + From<DeferredError>,
{
    if xs.is_empty() {
        return Deferred::failed(E::from(DeferredError::Canceled("empty".into())));
    }

    let executor = xs[0].executor();
    let qos = xs[0].qos();
    let (child, resolver) = Deferred::pending(executor, qos);
    resolver.retain_source(xs.clone());

    for x in xs.iter().cloned() {
        let resolver = resolver.clone();
        let siblings = cancel_others.then(|| xs.clone());
        x.observe(None, move |outcome| {
            if resolver.resolve(outcome.clone()) {
                if let Some(siblings) = siblings {
                    for s in siblings {
                        s.cancel("first_resolved resolved");
                    }
                }
            }
        });
    }

    child
}

/// Runs `f(0)..f(n-1)` each on `executor`, each in its own infallible
/// Deferred.
pub fn in_parallel<V>(
    executor: Arc<dyn Executor>,
    qos: Option<QoS>,
    n: usize,
    f: impl Fn(usize) -> V + Send + Sync + 'static,
) -> Vec<Deferred<V, Never>>
where
    V: Clone + Send + Sync + 'static,
{
    let f = Arc::new(f);
    (0..n)
        .map(|i| {
            let f = f.clone();
            Deferred::with_producer(executor.clone(), qos, move |resolver| {
                resolver.resolve_value(f(i));
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DeferredError;

    #[test]
    fn combine_empty_succeeds_with_empty_vec() {
        let d: Deferred<Vec<i32>, &str> = combine(Vec::new());
        assert_eq!(d.get(), Outcome::Success(Vec::new()));
    }

    #[test]
    fn combine_collects_in_input_order() {
        let inputs = vec![
            Deferred::resolved(1),
            Deferred::resolved(2),
            Deferred::resolved(3),
        ];
        let d: Deferred<Vec<i32>, &str> = combine(inputs);
        assert_eq!(d.get(), Outcome::Success(vec![1, 2, 3]));
    }

    #[test]
    fn combine_propagates_a_failure() {
        let inputs: Vec<Deferred<i32, DeferredError>> = vec![
            Deferred::resolved(1),
            Deferred::resolved(2),
            Deferred::failed(DeferredError::Canceled("x".into())),
        ];
        let d = combine(inputs);
        assert_eq!(
            d.get(),
            Outcome::Failure(DeferredError::Canceled("x".into()))
        );
    }

    #[test]
    fn reduce_folds_left_to_right() {
        let inputs: Vec<Deferred<i32, &str>> =
            vec![Deferred::resolved(1), Deferred::resolved(2), Deferred::resolved(3)];
        let d = reduce(inputs, 0, |acc, v| acc + v);
        assert_eq!(d.get(), Outcome::Success(6));
    }

    #[test]
    fn first_value_skips_failures() {
        let inputs: Vec<Deferred<i32, DeferredError>> = vec![
            Deferred::failed(DeferredError::Invalid("bad".into())),
            Deferred::resolved(9),
        ];
        let d = first_value(inputs, false);
        assert_eq!(d.get(), Outcome::Success(9));
    }

    #[test]
    fn first_value_of_all_failures_returns_a_failure() {
        let inputs: Vec<Deferred<i32, DeferredError>> = vec![
            Deferred::failed(DeferredError::Invalid("a".into())),
            Deferred::failed(DeferredError::Invalid("b".into())),
        ];
        let d = first_value(inputs, false);
        assert!(d.get().is_failure());
    }

    #[test]
    fn first_value_empty_is_canceled() {
        let d: Deferred<i32, DeferredError> = first_value(Vec::new(), false);
        assert_eq!(
            d.get(),
            Outcome::Failure(DeferredError::Canceled("empty".into()))
        );
    }

    #[test]
    fn first_resolved_settles_on_a_failure_ahead_of_a_slower_success() {
        let slow: Deferred<i32, DeferredError> = Deferred::with_producer(
            crate::executor::WorkerPool::global(),
            None,
            |r| {
                std::thread::spawn(move || {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    r.resolve_value(1);
                });
            },
        );
        let fast_failure: Deferred<i32, DeferredError> =
            Deferred::failed(DeferredError::Invalid("fast".into()));
        let d = first_resolved(vec![slow, fast_failure], false);
        assert_eq!(
            d.get(),
            Outcome::Failure(DeferredError::Invalid("fast".into()))
        );
    }

    #[test]
    fn first_resolved_empty_is_canceled() {
        let d: Deferred<i32, DeferredError> = first_resolved(Vec::new(), false);
        assert_eq!(
            d.get(),
            Outcome::Failure(DeferredError::Canceled("empty".into()))
        );
    }

    #[test]
    fn first_resolved_cancels_siblings_when_requested() {
        let winner: Deferred<i32, DeferredError> = Deferred::resolved(1);
        let loser: Deferred<i32, DeferredError> =
            Deferred::with_producer(crate::executor::WorkerPool::global(), None, |_r| {});
        let d = first_resolved(vec![winner, loser.clone()], true);
        assert_eq!(d.get(), Outcome::Success(1));

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(matches!(
            loser.peek(),
            Some(Outcome::Failure(DeferredError::Canceled(_)))
        ));
    }

    #[test]
    fn first_resolved_leaves_siblings_alone_by_default() {
        let winner: Deferred<i32, DeferredError> = Deferred::resolved(1);
        let loser: Deferred<i32, DeferredError> =
            Deferred::with_producer(crate::executor::WorkerPool::global(), None, |_r| {});
        let d = first_resolved(vec![winner, loser.clone()], false);
        assert_eq!(d.get(), Outcome::Success(1));

        std::thread::sleep(std::time::Duration::from_millis(50));
        assert_eq!(loser.peek(), None);
    }

    #[test]
    fn in_parallel_runs_every_index() {
        let results = in_parallel(crate::executor::WorkerPool::global(), None, 5, |i| i * i);
        let values: Vec<_> = results.into_iter().map(|d| d.get().into_value()).collect();
        assert_eq!(values, vec![0, 1, 4, 9, 16]);
    }
}
