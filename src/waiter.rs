//! Lock-free intrusive waiter stack (a Treiber-stack variant with a `CLOSED`
//! sentinel), the thing a [`Deferred`](crate::Deferred) accumulates
//! observers on before it resolves.
//!
//! `core.rs` owns the synchronization story (state word, result cell); this
//! module only owns the list mechanics.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::executor::QoS;
use crate::outcome::Outcome;

pub(crate) type Handler<V, E> = Box<dyn FnOnce(&Outcome<V, E>) + Send>;

/// One observer record: a handler, an optional QoS hint for its dispatch,
/// and the intrusive `next` link. Allocated at `push`, freed exactly once
/// by whichever thread drains or rejects it.
pub(crate) struct WaiterNode<V, E> {
    handler: Handler<V, E>,
    qos: Option<QoS>,
    next: *mut WaiterNode<V, E>,
}

/// Sentinel head value meaning "resolved; the list has been drained and no
/// further enqueueing is possible." Chosen as an address no real allocation
/// can occupy, rather than null (null is a legitimate "empty list" value).
const CLOSED_ADDR: usize = usize::MAX;

fn closed<V, E>() -> *mut WaiterNode<V, E> {
    CLOSED_ADDR as *mut WaiterNode<V, E>
}

fn is_closed<V, E>(ptr: *mut WaiterNode<V, E>) -> bool {
    ptr as usize == CLOSED_ADDR
}

pub(crate) struct WaiterList<V, E> {
    head: AtomicPtr<WaiterNode<V, E>>,
}

impl<V, E> WaiterList<V, E> {
    pub(crate) fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub(crate) fn new_closed() -> Self {
        Self {
            head: AtomicPtr::new(closed()),
        }
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        is_closed(self.head.load(Ordering::Acquire))
    }

    /// Registers a handler. On success the handler has been enqueued and
    /// will run exactly once when `close_and_drain` runs. If the list is
    /// already closed, the handler is handed back so the caller can dispatch
    /// it directly (still through the executor, never synchronously).
    pub(crate) fn push(
        &self,
        handler: Handler<V, E>,
        qos: Option<QoS>,
    ) -> Result<(), Handler<V, E>> {
        let node = Box::into_raw(Box::new(WaiterNode {
            handler,
            qos,
            next: ptr::null_mut(),
        }));
        loop {
            let head = self.head.load(Ordering::Acquire);
            if is_closed(head) {
                // SAFETY: `node` was just allocated above and never
                // published to any other thread; we have exclusive access.
                let reclaimed = unsafe { Box::from_raw(node) };
                return Err(reclaimed.handler);
            }
            // SAFETY: `node` is our own not-yet-published allocation.
            unsafe { (*node).next = head };
            match self
                .head
                .compare_exchange_weak(head, node, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Ok(()),
                Err(_) => continue,
            }
        }
    }

    /// Atomically closes the list and returns an iterator draining it in
    /// FIFO registration order. Must be called at most once (the resolving
    /// thread, after winning the state CAS).
    pub(crate) fn close_and_drain(&self) -> Drain<V, E> {
        let lifo_head = self.head.swap(closed(), Ordering::AcqRel);
        debug_assert!(!is_closed(lifo_head), "close_and_drain called twice");
        Drain {
            node: reverse(lifo_head),
        }
    }
}

/// Reverses a LIFO chain (most-recently-pushed first) into FIFO order
/// (registration order).
fn reverse<V, E>(mut head: *mut WaiterNode<V, E>) -> *mut WaiterNode<V, E> {
    let mut prev = ptr::null_mut();
    while !head.is_null() {
        // SAFETY: `head` is a live node owned by this list until reclaimed
        // by `Drain`.
        let next = unsafe { (*head).next };
        unsafe { (*head).next = prev };
        prev = head;
        head = next;
    }
    prev
}

pub(crate) struct Drain<V, E> {
    node: *mut WaiterNode<V, E>,
}

impl<V, E> Iterator for Drain<V, E> {
    type Item = (Handler<V, E>, Option<QoS>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.node.is_null() {
            return None;
        }
        // SAFETY: each node is owned by exactly one `Drain`, reclaimed
        // exactly once here.
        let boxed = unsafe { Box::from_raw(self.node) };
        self.node = boxed.next;
        Some((boxed.handler, boxed.qos))
    }
}

impl<V, E> Drop for WaiterList<V, E> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        if is_closed(head) {
            return;
        }
        // The Deferred was destroyed without ever resolving: any pending
        // waiters are simply released, matching spec.md's "Destroy" step.
        // Nobody is notified — there is no result to notify them with.
        let mut node = head;
        while !node.is_null() {
            // SAFETY: exclusive access via `&mut self`, nodes not yet
            // reclaimed.
            let boxed = unsafe { Box::from_raw(node) };
            node = boxed.next;
        }
    }
}

// SAFETY: the list only ever moves `WaiterNode<V,E>` pointers between
// threads; `Handler<V,E>` is `Send` by construction (see `Handler` alias).
unsafe impl<V, E> Send for WaiterList<V, E> {}
unsafe impl<V, E> Sync for WaiterList<V, E> {}
