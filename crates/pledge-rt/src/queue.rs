// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Job queues for the worker pool.
//!
//! Per-worker bounded FIFO + global injector. Idle workers steal from
//! each other before falling back to the injector.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A unit of work accepted by the pool.
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

/// Max jobs in a single worker's local queue before overflow.
pub(crate) const CAPACITY: usize = 1024;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-worker local queue.
///
/// Owner pops from the front, stealers take from the back. Both paths
/// share one mutex; jobs here are short and contention is low.
pub(crate) struct LocalQueue {
    deque: Mutex<VecDeque<Job>>,
}

impl LocalQueue {
    pub fn new() -> Self {
        Self {
            deque: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    /// Push a job. Hands it back if the queue is full.
    pub fn push(&self, job: Job) -> Result<(), Job> {
        let mut q = guard(&self.deque);
        if q.len() >= CAPACITY {
            return Err(job);
        }
        q.push_back(job);
        Ok(())
    }

    pub fn pop(&self) -> Option<Job> {
        guard(&self.deque).pop_front()
    }

    /// Steal half the queue from the back, at least one job if any.
    pub fn steal_batch(&self) -> Vec<Job> {
        let mut q = guard(&self.deque);
        let count = (q.len() / 2).max(q.len().min(1));
        let mut stolen = Vec::with_capacity(count);
        for _ in 0..count {
            if let Some(job) = q.pop_back() {
                stolen.push(job);
            }
        }
        stolen
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        guard(&self.deque).len()
    }

    pub fn is_empty(&self) -> bool {
        guard(&self.deque).is_empty()
    }
}

/// Global injection queue. External submissions and overflow land here.
pub(crate) struct InjectorQueue {
    queue: Mutex<VecDeque<Job>>,
}

impl InjectorQueue {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, job: Job) {
        guard(&self.queue).push_back(job);
    }

    pub fn pop(&self) -> Option<Job> {
        guard(&self.queue).pop_front()
    }

    pub fn is_empty(&self) -> bool {
        guard(&self.queue).is_empty()
    }

    #[allow(dead_code)]
    pub fn len(&self) -> usize {
        guard(&self.queue).len()
    }
}
