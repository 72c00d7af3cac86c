//! Deferred-callback scheduler.
//!
//! A per-thread queue of callbacks flushed by [`tick`], standing in for the
//! microtask timing a host framework would provide. Patch listener
//! re-enabling and deferred-flush subscription delivery are scheduled here.

use std::cell::RefCell;
use std::collections::VecDeque;

thread_local! {
    static QUEUE: RefCell<VecDeque<Box<dyn FnOnce()>>> = const { RefCell::new(VecDeque::new()) };
}

/// Schedule a callback for the next [`tick`].
pub fn defer(job: impl FnOnce() + 'static) {
    QUEUE.with(|queue| queue.borrow_mut().push_back(Box::new(job)));
}

/// Run every deferred callback, including ones scheduled while draining.
pub fn tick() {
    loop {
        let job = QUEUE.with(|queue| queue.borrow_mut().pop_front());
        match job {
            Some(job) => job(),
            None => break,
        }
    }
}

/// Number of callbacks currently waiting for the next tick.
pub fn pending() -> usize {
    QUEUE.with(|queue| queue.borrow().len())
}
