//! The host concurrency substrate a [`Deferred`](crate::Deferred) submits
//! its handlers to. The core only needs "submit a closure, optionally after
//! a delay, optionally at a QoS hint" — this module is the one concrete
//! implementation this crate ships so it is usable without a caller
//! supplying their own runtime bridge.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

/// A unit of work submitted to an [`Executor`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Advisory priority class carried on executor submissions, modeled on
/// Grand Central Dispatch's QoS classes. Ordering is significant: higher
/// variants are scheduled ahead of lower ones on [`WorkerPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum QoS {
    Background,
    Utility,
    Default,
    UserInitiated,
    UserInteractive,
}

impl Default for QoS {
    fn default() -> Self {
        QoS::Default
    }
}

/// The interface the resolution engine requires of its host concurrency
/// substrate. Implementors may bridge into tokio, a GUI event loop, or
/// whatever else a caller already runs; [`WorkerPool`] is the default.
pub trait Executor: Send + Sync {
    /// Runs `task` asynchronously, at this executor's default QoS.
    fn submit(&self, task: Task) {
        self.submit_with_qos(self.qos(), task);
    }

    /// Runs `task` asynchronously no earlier than `deadline`.
    fn submit_after(&self, deadline: Instant, task: Task);

    /// Runs `task` asynchronously, at the given QoS hint.
    fn submit_with_qos(&self, qos: QoS, task: Task);

    /// This executor's nominal QoS class.
    fn qos(&self) -> QoS {
        QoS::Default
    }
}

enum TimerMsg {
    Schedule(Instant, Task),
}

struct HeapEntry {
    deadline: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest deadline (and,
        // among ties, the earliest-scheduled entry) pops first.
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

fn run_catching_panics(task: Task) {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(task));
    if let Err(payload) = result {
        let message = panic_message(&*payload);
        #[cfg(feature = "tracing")]
        tracing::error!(message, "panic inside a deferred task; worker thread survives");
        #[cfg(not(feature = "tracing"))]
        let _ = message;
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// A fixed thread pool draining two `flume` queues (by QoS tier), plus a
/// dedicated timer thread for [`Executor::submit_after`].
///
/// An unbounded MPMC queue is the right shape for "many Deferreds submit
/// concurrently, N workers consume."
pub struct WorkerPool {
    high: flume::Sender<Task>,
    low: flume::Sender<Task>,
    timer: flume::Sender<TimerMsg>,
    default_qos: QoS,
}

impl WorkerPool {
    /// Spawns `workers` worker threads (minimum 1) plus one timer thread.
    pub fn new(workers: usize) -> Self {
        let (high_tx, high_rx) = flume::unbounded::<Task>();
        let (low_tx, low_rx) = flume::unbounded::<Task>();

        for i in 0..workers.max(1) {
            let high_rx = high_rx.clone();
            let low_rx = low_rx.clone();
            thread::Builder::new()
                .name(format!("deferred-worker-{i}"))
                .spawn(move || loop {
                    // Drain the high-priority queue first; only block on a
                    // fair select between both queues once it's empty. This
                    // is an approximation of QoS ordering, not a scheduler
                    // guarantee (ties and in-flight selects can still let a
                    // low-priority task through ahead of a high one).
                    let task = match high_rx.try_recv() {
                        Ok(task) => task,
                        Err(flume::TryRecvError::Empty) => {
                            match flume::Selector::new()
                                .recv(&high_rx, |m| m)
                                .recv(&low_rx, |m| m)
                                .wait()
                            {
                                Ok(task) => task,
                                Err(_) => break,
                            }
                        }
                        Err(flume::TryRecvError::Disconnected) => break,
                    };
                    run_catching_panics(task);
                })
                .expect("failed to spawn deferred worker thread");
        }

        let timer = spawn_timer(high_tx.clone());

        Self {
            high: high_tx,
            low: low_tx,
            timer,
            default_qos: QoS::Default,
        }
    }

    /// A lazily-initialized, process-wide pool sized to the available
    /// parallelism. Used by `Deferred::resolved`/`failed`/`with_producer`
    /// when the caller doesn't supply its own [`Executor`].
    pub fn global() -> Arc<WorkerPool> {
        static GLOBAL: OnceLock<Arc<WorkerPool>> = OnceLock::new();
        GLOBAL
            .get_or_init(|| {
                let workers = thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
                Arc::new(WorkerPool::new(workers))
            })
            .clone()
    }
}

fn spawn_timer(target: flume::Sender<Task>) -> flume::Sender<TimerMsg> {
    let (tx, rx) = flume::unbounded::<TimerMsg>();
    thread::Builder::new()
        .name("deferred-timer".into())
        .spawn(move || {
            let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
            let mut seq: u64 = 0;
            loop {
                let now = Instant::now();
                while let Some(top) = heap.peek() {
                    if top.deadline <= now {
                        let entry = heap.pop().expect("just peeked");
                        let _ = target.send(entry.task);
                    } else {
                        break;
                    }
                }

                let wait = heap
                    .peek()
                    .map(|e| e.deadline.saturating_duration_since(Instant::now()))
                    .unwrap_or(Duration::from_secs(3600));

                match rx.recv_timeout(wait) {
                    Ok(TimerMsg::Schedule(deadline, task)) => {
                        heap.push(HeapEntry { deadline, seq, task });
                        seq += 1;
                    }
                    Err(flume::RecvTimeoutError::Timeout) => {}
                    Err(flume::RecvTimeoutError::Disconnected) => {
                        if heap.is_empty() {
                            break;
                        }
                    }
                }
            }
        })
        .expect("failed to spawn deferred timer thread");
    tx
}

impl Executor for WorkerPool {
    fn submit_after(&self, deadline: Instant, task: Task) {
        let _ = self.timer.send(TimerMsg::Schedule(deadline, task));
    }

    fn submit_with_qos(&self, qos: QoS, task: Task) {
        let sender = if qos >= QoS::Default { &self.high } else { &self.low };
        let _ = sender.send(task);
    }

    fn qos(&self) -> QoS {
        self.default_qos
    }
}
