#![forbid(unsafe_code)]

//! Delivery contexts.
//!
//! A [`Scheduler`] decides where a unit of delivery work runs. The core never
//! creates threads of its own: without a scheduler, work runs inline on the
//! producer's thread; with one, it runs wherever the scheduler puts it.
//!
//! - [`ImmediateScheduler`]: runs work inline, on the calling thread.
//! - [`DispatchQueue`]: queues work until the owner drains it, the usual shape
//!   of a UI-thread dispatcher. Deterministic, which makes it the scheduler of
//!   choice in tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::sync::lock;

/// A unit of scheduled work.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

pub trait Scheduler: Send + Sync {
    fn schedule(&self, work: Work);
}

/// Runs work inline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, work: Work) {
        work();
    }
}

/// FIFO of pending work, drained explicitly by its owner.
#[derive(Default)]
pub struct DispatchQueue {
    queue: Mutex<VecDeque<Work>>,
}

impl std::fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("pending", &self.pending())
            .finish()
    }
}

impl DispatchQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Run queued work until the queue is empty, including work enqueued by
    /// the items being run. Returns the number of items executed.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            // Pop under the lock, run outside it: work may schedule more work.
            let Some(work) = lock(&self.queue).pop_front() else {
                return ran;
            };
            work();
            ran += 1;
        }
    }

    /// Run at most one queued item. Returns whether anything ran.
    pub fn run_one(&self) -> bool {
        let Some(work) = lock(&self.queue).pop_front() else {
            return false;
        };
        work();
        true
    }
}

impl Scheduler for DispatchQueue {
    fn schedule(&self, work: Work) {
        lock(&self.queue).push_back(work);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn immediate_runs_inline() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        ImmediateScheduler.schedule(Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn queue_runs_in_fifo_order() {
        let queue = DispatchQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let l = Arc::clone(&log);
            queue.schedule(Box::new(move || l.lock().unwrap().push(i)));
        }
        assert_eq!(queue.pending(), 3);
        assert!(log.lock().unwrap().is_empty());

        assert!(queue.run_one());
        assert_eq!(*log.lock().unwrap(), vec![0]);
        assert_eq!(queue.run_pending(), 2);
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2]);
        assert!(!queue.run_one());
    }

    #[test]
    fn work_scheduled_while_draining_also_runs() {
        let queue = Arc::new(DispatchQueue::new());
        let hits = Arc::new(AtomicUsize::new(0));
        let q = Arc::clone(&queue);
        let h = Arc::clone(&hits);
        queue.schedule(Box::new(move || {
            let h2 = Arc::clone(&h);
            q.schedule(Box::new(move || {
                h2.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        assert_eq!(queue.run_pending(), 2);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
