// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Work-stealing thread pool.
//!
//! N worker threads each own a local queue. When idle, workers steal
//! from peers or the global injection queue, then park until notified.
//! Workers are plain OS threads; every job runs to completion.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::error::{panic_message, PoolError};
use crate::queue::{InjectorQueue, Job, LocalQueue};

thread_local! {
    /// (pool id, worker index) when the current thread is a pool worker.
    static WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fixed-size pool of worker threads.
///
/// Shuts down on drop (waits for accepted jobs unless shutdown was
/// already requested).
pub struct ThreadPool {
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    shared: Arc<SharedState>,
}

/// State shared between workers and submitters.
struct SharedState {
    local_queues: Vec<LocalQueue>,
    global_queue: InjectorQueue,
    /// Jobs accepted but not yet finished.
    active_jobs: AtomicUsize,
    /// Signalled when `active_jobs` drops to zero.
    all_done: (Mutex<()>, Condvar),
    /// Once set, no new jobs are accepted.
    shutdown: AtomicBool,
    worker_count: usize,
    /// Parked workers wait here. Submitters notify while holding the
    /// lock, after pushing, so a worker that found every queue empty
    /// under the lock cannot miss the wakeup.
    work_available: (Mutex<()>, Condvar),
}

impl SharedState {
    fn notify_one(&self) {
        let (lock, cvar) = &self.work_available;
        let _held = guard(lock);
        cvar.notify_one();
    }

    fn notify_all(&self) {
        let (lock, cvar) = &self.work_available;
        let _held = guard(lock);
        cvar.notify_all();
    }

    fn has_work(&self) -> bool {
        !self.global_queue.is_empty() || self.local_queues.iter().any(|q| !q.is_empty())
    }

    fn finished(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst) && self.active_jobs.load(Ordering::SeqCst) == 0
    }
}

impl ThreadPool {
    /// Start the pool described by `config`.
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        let worker_count = config.resolved_workers();

        let shared = Arc::new(SharedState {
            local_queues: (0..worker_count).map(|_| LocalQueue::new()).collect(),
            global_queue: InjectorQueue::new(),
            active_jobs: AtomicUsize::new(0),
            all_done: (Mutex::new(()), Condvar::new()),
            shutdown: AtomicBool::new(false),
            worker_count,
            work_available: (Mutex::new(()), Condvar::new()),
        });
        let pool_id = Arc::as_ptr(&shared) as usize;

        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let name = format!("{}-{}", config.thread_name, id);
            let worker_shared = shared.clone();
            let spawned = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(pool_id, id, &worker_shared));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(source) => {
                    // Release the workers that did start.
                    shared.shutdown.store(true, Ordering::SeqCst);
                    shared.notify_all();
                    for handle in handles {
                        let _ = handle.join();
                    }
                    return Err(PoolError::Spawn { name, source });
                }
            }
        }

        tracing::debug!(
            workers = worker_count,
            thread_name = %config.thread_name,
            "thread pool started"
        );

        Ok(Self {
            workers: Mutex::new(handles),
            shared,
        })
    }

    /// Submit a job. Fails once shutdown has been requested.
    pub fn execute<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        // Count first, then check: `terminate` sets the flag before it
        // waits on the count, so an accepted job is always waited for.
        self.shared.active_jobs.fetch_add(1, Ordering::SeqCst);
        if self.shared.shutdown.load(Ordering::SeqCst) {
            self.job_done();
            return Err(PoolError::Shutdown);
        }

        let job: Job = Box::new(f);
        match self.current_worker() {
            Some(id) => {
                if let Err(job) = self.shared.local_queues[id].push(job) {
                    self.shared.global_queue.push(job);
                }
            }
            None => self.shared.global_queue.push(job),
        }
        self.shared.notify_one();
        Ok(())
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Jobs accepted and not yet finished (queued or running).
    pub fn active_jobs(&self) -> usize {
        self.shared.active_jobs.load(Ordering::SeqCst)
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.shutdown.load(Ordering::SeqCst)
    }

    /// True if the calling thread is one of this pool's workers.
    pub fn is_worker_thread(&self) -> bool {
        self.current_worker().is_some()
    }

    /// Stop accepting work, wait for every accepted job, join workers.
    pub fn shutdown(&self) {
        // Without a deadline the drain cannot time out.
        let _ = self.terminate(None);
    }

    /// Like `shutdown`, but give up waiting after `timeout`. Workers keep
    /// draining in the background after a timeout.
    pub fn shutdown_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        self.terminate(Some(timeout))
    }

    fn terminate(&self, timeout: Option<Duration>) -> Result<(), PoolError> {
        if !self.shared.shutdown.swap(true, Ordering::SeqCst) {
            tracing::debug!(
                pending = self.active_jobs(),
                "thread pool shutdown requested"
            );
        }

        // A worker waiting for the drain would wait on its own job.
        if self.is_worker_thread() {
            self.shared.notify_all();
            return Ok(());
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        {
            let (lock, cvar) = &self.shared.all_done;
            let mut done = guard(lock);
            while self.shared.active_jobs.load(Ordering::SeqCst) > 0 {
                match deadline {
                    None => {
                        done = cvar.wait(done).unwrap_or_else(PoisonError::into_inner);
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            self.shared.notify_all();
                            return Err(PoolError::TerminationTimeout {
                                waited: timeout.unwrap_or_default(),
                                pending: self.active_jobs(),
                            });
                        }
                        done = cvar
                            .wait_timeout(done, deadline - now)
                            .unwrap_or_else(PoisonError::into_inner)
                            .0;
                    }
                }
            }
        }

        self.shared.notify_all();
        let handles: Vec<_> = guard(&self.workers).drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        tracing::debug!("thread pool terminated");
        Ok(())
    }

    fn pool_id(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }

    fn current_worker(&self) -> Option<usize> {
        let pool_id = self.pool_id();
        WORKER.with(|w| match w.get() {
            Some((pid, id)) if pid == pool_id => Some(id),
            _ => None,
        })
    }

    fn job_done(&self) {
        finish_job(&self.shared);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.shared.shutdown.load(Ordering::SeqCst) {
            self.shutdown();
        } else {
            self.shared.notify_all();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.worker_count())
            .field("active_jobs", &self.active_jobs())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

fn finish_job(shared: &SharedState) {
    let prev = shared.active_jobs.fetch_sub(1, Ordering::SeqCst);
    if prev == 1 {
        {
            let (lock, cvar) = &shared.all_done;
            let _held = guard(lock);
            cvar.notify_all();
        }
        if shared.shutdown.load(Ordering::SeqCst) {
            shared.notify_all();
        }
    }
}

/// Simple xorshift64 for random victim selection.
fn xorshift64(state: &mut u64) -> u64 {
    let mut x = *state;
    x ^= x << 13;
    x ^= x >> 7;
    x ^= x << 17;
    *state = x;
    x
}

fn worker_loop(pool_id: usize, id: usize, shared: &SharedState) {
    WORKER.with(|w| w.set(Some((pool_id, id))));
    let local = &shared.local_queues[id];
    let mut rng = (id as u64).wrapping_add(0x9E3779B97F4A7C15);

    loop {
        // 1. Local queue.
        if let Some(job) = local.pop() {
            run_job(job, shared);
            continue;
        }

        // 2. Steal from peers, starting at a random one.
        if let Some(job) = steal(id, &mut rng, shared) {
            run_job(job, shared);
            continue;
        }

        // 3. Global injection queue.
        if let Some(job) = shared.global_queue.pop() {
            run_job(job, shared);
            continue;
        }

        // 4. Exit once shut down and drained.
        if shared.finished() {
            break;
        }

        // 5. Park until a submission or shutdown notifies.
        let (lock, cvar) = &shared.work_available;
        let held = guard(lock);
        if shared.has_work() || shared.finished() {
            continue;
        }
        drop(cvar.wait(held).unwrap_or_else(PoisonError::into_inner));
    }

    WORKER.with(|w| w.set(None));
}

/// Take a batch from the first non-empty peer queue, scanning from a
/// random peer. Returns the first job and queues the rest on `id`.
fn steal(id: usize, rng: &mut u64, shared: &SharedState) -> Option<Job> {
    let n = shared.worker_count;
    if n < 2 {
        return None;
    }
    let start = (xorshift64(rng) as usize) % n;
    let local = &shared.local_queues[id];
    for offset in 0..n {
        let victim = (start + offset) % n;
        if victim == id {
            continue;
        }
        let mut stolen = shared.local_queues[victim].steal_batch().into_iter();
        if let Some(first) = stolen.next() {
            let mut kept = false;
            for job in stolen {
                if let Err(job) = local.push(job) {
                    shared.global_queue.push(job);
                }
                kept = true;
            }
            // Parked peers only wake on notify; the leftovers are theirs too.
            if kept {
                shared.notify_one();
            }
            return Some(first);
        }
    }
    None
}

/// Run one job. A panic is logged and the worker carries on.
fn run_job(job: Job, shared: &SharedState) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        tracing::warn!(panic = %panic_message(&*payload), "pool job panicked");
    }
    finish_job(shared);
}
