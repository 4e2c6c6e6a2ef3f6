//! Black-box scenarios exercising only the public API, one per named
//! scenario in the composition-algebra spec this crate implements.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use deferred::{
    combine, first_value, retrying, DeferredError, DeferredState, Executor, Never, Outcome,
    Resolver, WorkerPool,
};
use deferred::Deferred;

#[test]
fn s1_resolved_map_get() {
    let d: Deferred<i32, &str> = Deferred::resolved(42).map(|v| v + 1);
    assert_eq!(d.get(), Outcome::Success(43));
}

#[test]
fn s2_pre_and_post_observers_all_fire_in_order() {
    let d: Deferred<f64, String> = Deferred::spawn(None, |r| {
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            r.resolve_value(1.0);
        });
    });

    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..3 {
        let order = order.clone();
        d.observe(None, move |outcome| {
            assert_eq!(*outcome, Outcome::Success(1.0));
            order.lock().unwrap().push(i);
        });
    }

    assert_eq!(d.get(), Outcome::Success(1.0));

    let after = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let after = after.clone();
        d.observe(None, move |outcome| {
            assert_eq!(*outcome, Outcome::Success(1.0));
            after.fetch_add(1, Ordering::SeqCst);
        });
    }

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(after.load(Ordering::SeqCst), 2);
}

#[test]
fn s3_timeout_on_a_producer_that_never_resolves() {
    let d: Deferred<i32, DeferredError> =
        Deferred::with_producer(WorkerPool::global(), None, |_r| {});
    let start = Instant::now();
    let timed = d.timeout(Duration::from_millis(100), "never");
    assert!(matches!(
        timed.get(),
        Outcome::Failure(DeferredError::TimedOut(_))
    ));
    assert!(start.elapsed() >= Duration::from_millis(100));
}

#[test]
fn s4_combine_short_circuits_on_first_failure() {
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
fn s5_retrying_succeeds_on_the_third_of_three_attempts() {
    let counter = Arc::new(AtomicU32::new(0));
    let d: Deferred<&str, DeferredError> = retrying(3, {
        let counter = counter.clone();
        move || {
            let attempt = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt < 3 {
                Deferred::failed(DeferredError::Invalid("nope".into()))
            } else {
                Deferred::resolved("ok")
            }
        }
    });
    assert_eq!(d.get(), Outcome::Success("ok"));
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[test]
fn s6_a_thousand_step_map_chain_terminates() {
    let mut d: Deferred<i32, Never> = Deferred::resolved(1);
    for _ in 0..1000 {
        d = d.map(|v| v + 1);
    }
    assert_eq!(d.get(), Outcome::Success(1001));
}

#[test]
fn map_composition_matches_one_fused_step() {
    let d: Deferred<i32, Never> = Deferred::resolved(3);
    let f = |v: i32| v + 1;
    let g = |v: i32| v * 2;
    let separate = d.clone().map(f).map(g).get();
    let fused = d.map(move |v| g(f(v))).get();
    assert_eq!(separate, fused);
}

#[test]
fn flat_map_associativity() {
    let d: Deferred<i32, &str> = Deferred::resolved(1);
    let f = |v: i32| Deferred::resolved(v + 1);
    let g = |v: i32| Deferred::resolved(v * 10);

    let left = d.clone().flat_map(f).flat_map(g).get();
    let right = d.flat_map(move |v| f(v).flat_map(g)).get();
    assert_eq!(left, right);
}

#[test]
fn error_propagates_through_non_handling_combinators_and_recover_absorbs_it() {
    let failed: Deferred<i32, &str> = Deferred::failed("boom");
    assert_eq!(failed.map(|v| v + 1).get(), Outcome::Failure("boom"));
    let recovered = failed.recover(|_e| Deferred::resolved(9));
    assert_eq!(recovered.get(), Outcome::Success(9));
}

#[test]
fn cancellation_is_final() {
    let d: Deferred<i32, DeferredError> =
        Deferred::with_producer(WorkerPool::global(), None, |_r| {});
    assert!(d.cancel("shutting down"));
    assert_eq!(
        d.peek(),
        Some(Outcome::Failure(DeferredError::Canceled(
            "shutting down".into()
        )))
    );
    assert_eq!(
        d.peek(),
        Some(Outcome::Failure(DeferredError::Canceled(
            "shutting down".into()
        )))
    );
}

#[test]
fn last_reference_drop_flips_needs_resolution() {
    let captured = Arc::new(Mutex::new(None));
    // `upstream` must not outlive this block: once `downstream` exists, its
    // own `source_retain` is the only thing that should still be keeping the
    // upstream `Inner` alive, so `upstream` itself has to be dropped here
    // before we check `needs_resolution` below.
    let (downstream, resolver) = {
        let upstream: Deferred<i32, &str> = Deferred::with_producer(WorkerPool::global(), None, {
            let captured = captured.clone();
            move |r| *captured.lock().unwrap() = Some(r)
        });
        std::thread::sleep(Duration::from_millis(20));
        let resolver = captured.lock().unwrap().clone().expect("producer has run");
        let downstream = upstream.map(|v| v + 1);
        (downstream, resolver)
    };

    assert!(resolver.needs_resolution());
    drop(downstream);
    assert!(!resolver.needs_resolution());
}

#[test]
fn combine_of_empty_input_succeeds_with_empty_vec() {
    let d: Deferred<Vec<i32>, &str> = combine(Vec::new());
    assert_eq!(d.get(), Outcome::Success(Vec::new()));
}

#[test]
fn first_value_prefers_a_success_over_earlier_failures() {
    let inputs: Vec<Deferred<i32, DeferredError>> = vec![
        Deferred::failed(DeferredError::Invalid("bad".into())),
        Deferred::resolved(9),
    ];
    assert_eq!(first_value(inputs, false).get(), Outcome::Success(9));
}

#[test]
fn a_panicking_observer_does_not_take_down_the_worker_pool() {
    let pool = WorkerPool::global();
    let d: Deferred<i32, Never> = Deferred::resolved(1);
    d.observe(None, |_outcome| panic!("boom in observer"));

    // Give the panicking handler a moment to run and be caught, then prove
    // the pool is still servicing other work.
    std::thread::sleep(Duration::from_millis(50));
    let (tx, rx) = std::sync::mpsc::channel();
    pool.submit(Box::new(move || tx.send(()).unwrap()));
    rx.recv_timeout(Duration::from_secs(1))
        .expect("worker pool should survive a panicking observer");
}

#[test]
fn state_transitions_from_executing_to_resolved() {
    let captured: Arc<Mutex<Option<Resolver<i32, &str>>>> = Arc::new(Mutex::new(None));
    let d: Deferred<i32, &str> = Deferred::with_producer(WorkerPool::global(), None, {
        let captured = captured.clone();
        move |r| *captured.lock().unwrap() = Some(r)
    });
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(d.state(), DeferredState::Executing);
    let resolver = captured.lock().unwrap().clone().expect("producer has run");
    resolver.resolve_value(1);
    assert_eq!(d.state(), DeferredState::Resolved);
}
