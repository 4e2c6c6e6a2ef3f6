//! A write-once slot for a resolved [`Outcome`](crate::Outcome).
//!
//! Same unsafe write/read/drop triplet as a ring-buffer slot: exactly one
//! writer, then any number of readers once visibility has been established
//! by the caller's own synchronization (the [`Deferred`](crate::Deferred)
//! core does this via the waiter list's `CLOSED` swap).

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr;

use crate::outcome::Outcome;

pub(crate) struct ResultCell<V, E>(UnsafeCell<MaybeUninit<Outcome<V, E>>>);

impl<V, E> ResultCell<V, E> {
    #[inline]
    pub(crate) fn empty() -> Self {
        Self(UnsafeCell::new(MaybeUninit::uninit()))
    }

    #[inline]
    pub(crate) fn new(value: Outcome<V, E>) -> Self {
        Self(UnsafeCell::new(MaybeUninit::new(value)))
    }

    /// # Safety
    ///
    /// The caller must ensure exactly one writer ever calls this, and that
    /// no reader observes the cell (via [`Self::read`]) until that write has
    /// happened-before the read in the synchronizing ordering (the waiters
    /// `CLOSED` swap).
    #[inline]
    pub(crate) unsafe fn write(&self, value: Outcome<V, E>) {
        unsafe { ptr::write((*self.0.get()).as_mut_ptr(), value) };
    }

    /// # Safety
    ///
    /// The caller must ensure the cell was written via [`Self::write`] and
    /// that this call happens-after that write in the synchronizing
    /// ordering. Does not move the value out twice if called more than once
    /// from the same thread after the appropriate synchronization; callers
    /// are expected to call this at most once and cache the result, since
    /// a second call would alias the first read's consuming semantics.
    #[inline]
    pub(crate) unsafe fn read(&self) -> &Outcome<V, E> {
        unsafe { (*self.0.get()).assume_init_ref() }
    }
}

impl<V, E> ResultCell<V, E> {
    /// # Safety
    ///
    /// Caller must ensure the cell was initialized via [`Self::write`] (or
    /// the `new` constructor) and that this is called at most once.
    #[inline]
    pub(crate) unsafe fn drop_in_place(&self) {
        unsafe { ptr::drop_in_place((*self.0.get()).as_mut_ptr()) };
    }
}
