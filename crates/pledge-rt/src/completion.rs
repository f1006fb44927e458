// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Write-once completion handle.
//!
//! A `Completion` is settled exactly once with `Ok(T)` or a
//! `TaskError<E>`. Continuations registered before settlement run on the
//! settling thread; continuations registered after run immediately on the
//! registering thread. Either way each one sees the fully settled result.
//!
//! Settling from inside a callback does not recurse. The outermost
//! `complete` on a thread drains a thread-local queue, and nested
//! settlements on that thread append to it, so a chain of any length
//! settles in constant stack depth.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::{panic_message, Fault, TaskError};
use crate::pool::ThreadPool;

/// What a settled `Completion` holds.
pub type TaskResult<T, E> = Result<T, TaskError<E>>;

type Callback<T, E> = Box<dyn FnOnce(&TaskResult<T, E>) + Send + 'static>;

/// Callbacks of one settlement, bound to its result.
type Dispatch = Box<dyn FnOnce()>;

thread_local! {
    /// `Some` while this thread is draining settlements.
    static SETTLING: RefCell<Option<VecDeque<Dispatch>>> = const { RefCell::new(None) };
}

/// Queue `job` behind the settlement being drained on this thread, or
/// hand it back if nothing is draining.
fn enqueue(job: Dispatch) -> Option<Dispatch> {
    SETTLING.with(|s| match s.borrow_mut().as_mut() {
        Some(queue) => {
            queue.push_back(job);
            None
        }
        None => Some(job),
    })
}

fn next_queued() -> Option<Dispatch> {
    SETTLING.with(|s| s.borrow_mut().as_mut().and_then(VecDeque::pop_front))
}

/// Clears the draining state even if a dispatch unwinds.
struct Draining;

impl Draining {
    fn start() -> Self {
        SETTLING.with(|s| *s.borrow_mut() = Some(VecDeque::new()));
        Draining
    }
}

impl Drop for Draining {
    fn drop(&mut self) {
        let _ = SETTLING.try_with(|s| s.borrow_mut().take());
    }
}

/// Run `job` now, then everything it queues, unless an outer frame on
/// this thread is already draining.
fn dispatch(job: Dispatch) {
    let Some(job) = enqueue(job) else {
        return;
    };
    let _draining = Draining::start();
    job();
    while let Some(next) = next_queued() {
        next();
    }
}

enum State<T, E> {
    Pending(Vec<Callback<T, E>>),
    Done(TaskResult<T, E>),
}

struct Inner<T, E> {
    state: Mutex<State<T, E>>,
    settled: Condvar,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared, write-once result cell. Clones observe the same settlement.
pub struct Completion<T, E> {
    inner: Arc<Inner<T, E>>,
}

impl<T, E> Clone for Completion<T, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T, E> std::fmt::Debug for Completion<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T, E> Completion<T, E> {
    pub fn is_done(&self) -> bool {
        matches!(*guard(&self.inner.state), State::Done(_))
    }

    /// True if both handles share one cell.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn with_state(state: State<T, E>) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                settled: Condvar::new(),
            }),
        }
    }
}

impl<T, E> Completion<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// An unsettled handle.
    pub fn pending() -> Self {
        Self::with_state(State::Pending(Vec::new()))
    }

    /// A handle already settled with `result`.
    pub fn settled(result: TaskResult<T, E>) -> Self {
        Self::with_state(State::Done(result))
    }

    pub fn completed(value: T) -> Self {
        Self::settled(Ok(value))
    }

    pub fn rejected(error: E) -> Self {
        Self::settled(Err(TaskError::Rejected(error)))
    }

    pub fn faulted(fault: Fault) -> Self {
        Self::settled(Err(TaskError::Fault(fault)))
    }

    /// Settle the handle. Only the first call takes effect; later calls
    /// return `false` and leave the stored result untouched.
    pub fn complete(&self, result: TaskResult<T, E>) -> bool {
        let callbacks = {
            let mut state = guard(&self.inner.state);
            if matches!(*state, State::Done(_)) {
                return false;
            }
            match std::mem::replace(&mut *state, State::Done(result.clone())) {
                State::Pending(callbacks) => callbacks,
                State::Done(_) => Vec::new(),
            }
        };
        self.inner.settled.notify_all();
        if !callbacks.is_empty() {
            dispatch(Box::new(move || {
                for callback in callbacks {
                    run_callback(callback, &result);
                }
            }));
        }
        true
    }

    /// The settled result, if any, without blocking.
    pub fn peek(&self) -> Option<TaskResult<T, E>> {
        match &*guard(&self.inner.state) {
            State::Done(result) => Some(result.clone()),
            State::Pending(_) => None,
        }
    }

    /// Block until settled.
    pub fn wait(&self) -> TaskResult<T, E> {
        if let Some(result) = self.settle_queued() {
            return result;
        }
        let mut state = guard(&self.inner.state);
        loop {
            if let State::Done(result) = &*state {
                return result.clone();
            }
            state = self
                .inner
                .settled
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until settled or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<TaskResult<T, E>> {
        if let Some(result) = self.settle_queued() {
            return Some(result);
        }
        let deadline = Instant::now() + timeout;
        let mut state = guard(&self.inner.state);
        loop {
            if let State::Done(result) = &*state {
                return Some(result.clone());
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            state = self
                .inner
                .settled
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// A wait issued from inside a callback may depend on settlements
    /// still queued on this thread. Run them until this handle settles.
    fn settle_queued(&self) -> Option<TaskResult<T, E>> {
        loop {
            if let Some(result) = self.peek() {
                return Some(result);
            }
            let job = next_queued()?;
            job();
        }
    }

    /// Run `f` with the settled result: now if already settled, otherwise
    /// on the thread that settles the handle.
    pub fn on_complete<F>(&self, f: F)
    where
        F: FnOnce(&TaskResult<T, E>) + Send + 'static,
    {
        let result = {
            let mut state = guard(&self.inner.state);
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(Box::new(f));
                    return;
                }
                State::Done(result) => result.clone(),
            }
        };
        run_callback(Box::new(f), &result);
    }

    /// Derive a new handle by merging this one's result through `f`.
    ///
    /// `f` runs synchronously on whichever thread observes settlement. A
    /// panic in `f` settles the derived handle with `Fault::Panicked`.
    pub fn handle<U, E2, F>(&self, f: F) -> Completion<U, E2>
    where
        U: Clone + Send + 'static,
        E2: Clone + Send + 'static,
        F: FnOnce(TaskResult<T, E>) -> TaskResult<U, E2> + Send + 'static,
    {
        let next = Completion::pending();
        let target = next.clone();
        self.on_complete(move |result| {
            let merged = panic::catch_unwind(AssertUnwindSafe(|| f(result.clone())))
                .unwrap_or_else(|payload| Err(Fault::from_panic(payload).into()));
            target.complete(merged);
        });
        next
    }

    /// Succeeds once every input succeeds; fails with the first failure
    /// observed. No inputs means immediate success.
    pub fn all_of(handles: &[Completion<T, E>]) -> Completion<(), E> {
        let gate = Completion::pending();
        if handles.is_empty() {
            gate.complete(Ok(()));
            return gate;
        }
        let remaining = Arc::new(AtomicUsize::new(handles.len()));
        for handle in handles {
            let gate = gate.clone();
            let remaining = remaining.clone();
            handle.on_complete(move |result| match result {
                Err(e) => {
                    gate.complete(Err(e.clone()));
                }
                Ok(_) => {
                    if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                        gate.complete(Ok(()));
                    }
                }
            });
        }
        gate
    }

    /// Settles like whichever input settles first. No inputs means the
    /// result never settles.
    pub fn any_of(handles: &[Completion<T, E>]) -> Completion<T, E> {
        let first = Completion::pending();
        for handle in handles {
            let first = first.clone();
            handle.on_complete(move |result| {
                first.complete(result.clone());
            });
        }
        first
    }

    /// Run `f` on `pool` with a handle to the returned completion.
    ///
    /// `f` settles the handle itself, now or later from any thread.
    /// Returning `Err` rejects and a panic faults, unless `f` settled
    /// first. A refused submission faults with `PoolShutdown`.
    pub fn spawn<F>(pool: &ThreadPool, f: F) -> Self
    where
        F: FnOnce(Self) -> Result<(), E> + Send + 'static,
    {
        let completion = Self::pending();
        let target = completion.clone();
        let submitted = pool.execute(move || {
            match panic::catch_unwind(AssertUnwindSafe(|| f(target.clone()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    target.complete(Err(TaskError::Rejected(e)));
                }
                Err(payload) => {
                    let fault = Fault::from_panic(payload);
                    tracing::debug!(error = %fault, "spawned task panicked");
                    target.complete(Err(fault.into()));
                }
            }
        });
        if submitted.is_err() {
            tracing::debug!("spawned task refused: pool is shut down");
            completion.complete(Err(Fault::PoolShutdown.into()));
        }
        completion
    }
}

fn run_callback<T, E>(callback: Callback<T, E>, result: &TaskResult<T, E>) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(result))) {
        tracing::warn!(
            panic = %panic_message(&*payload),
            "completion callback panicked"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use std::sync::atomic::AtomicI32;
    use std::thread;

    type Cell = Completion<i32, String>;

    const WAIT: Duration = Duration::from_secs(5);

    fn pool() -> ThreadPool {
        ThreadPool::new(PoolConfig::with_workers(2)).unwrap()
    }

    #[test]
    fn first_completion_wins() {
        let c = Cell::pending();
        assert!(!c.is_done());
        assert!(c.complete(Ok(1)));
        assert!(!c.complete(Ok(2)));
        assert!(!c.complete(Err(TaskError::Rejected("late".to_string()))));
        assert_eq!(c.peek(), Some(Ok(1)));
    }

    #[test]
    fn callbacks_run_once_in_either_order() {
        let hits = Arc::new(AtomicI32::new(0));
        let c = Cell::pending();

        let early = hits.clone();
        c.on_complete(move |r| {
            assert_eq!(r, &Ok(5));
            early.fetch_add(1, Ordering::SeqCst);
        });
        c.complete(Ok(5));
        c.complete(Ok(6));

        let late = hits.clone();
        c.on_complete(move |r| {
            assert_eq!(r, &Ok(5));
            late.fetch_add(10, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn panicking_callback_does_not_block_others() {
        let hits = Arc::new(AtomicI32::new(0));
        let c = Cell::pending();
        c.on_complete(|_| panic!("bad callback"));
        let h = hits.clone();
        c.on_complete(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        c.complete(Ok(0));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn wait_across_threads() {
        let c = Cell::pending();
        let setter = c.clone();
        let t = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            setter.complete(Ok(42));
        });
        assert_eq!(c.wait(), Ok(42));
        t.join().unwrap();
    }

    #[test]
    fn wait_timeout_on_pending() {
        let c = Cell::pending();
        assert_eq!(c.wait_timeout(Duration::from_millis(10)), None);
    }

    #[test]
    fn handle_merges_both_channels() {
        let ok = Cell::completed(2).handle(|r| r.map(|v| v * 10));
        assert_eq!(ok.wait_timeout(WAIT), Some(Ok(20)));

        let recovered: Completion<i32, String> = Cell::rejected("e".to_string()).handle(|r| match r {
            Err(TaskError::Rejected(e)) => Ok(e.len() as i32),
            other => other,
        });
        assert_eq!(recovered.wait_timeout(WAIT), Some(Ok(1)));
    }

    #[test]
    fn handle_panic_becomes_fault() {
        let derived: Completion<i32, String> = Cell::completed(1).handle(|_| panic!("kaboom"));
        assert_eq!(
            derived.wait_timeout(WAIT),
            Some(Err(TaskError::Fault(Fault::Panicked("kaboom".to_string()))))
        );
    }

    #[test]
    fn all_of_waits_for_every_input() {
        let a = Cell::pending();
        let b = Cell::pending();
        let gate = Cell::all_of(&[a.clone(), b.clone()]);
        a.complete(Ok(1));
        assert!(!gate.is_done());
        b.complete(Ok(2));
        assert_eq!(gate.peek(), Some(Ok(())));
    }

    #[test]
    fn all_of_fails_fast() {
        let a = Cell::pending();
        let b = Cell::pending();
        let gate = Cell::all_of(&[a.clone(), b.clone()]);
        b.complete(Err(TaskError::Rejected("boom".to_string())));
        assert_eq!(
            gate.peek(),
            Some(Err(TaskError::Rejected("boom".to_string())))
        );
        a.complete(Ok(1));
        assert_eq!(
            gate.peek(),
            Some(Err(TaskError::Rejected("boom".to_string())))
        );
    }

    #[test]
    fn all_of_empty_succeeds() {
        assert_eq!(Cell::all_of(&[]).peek(), Some(Ok(())));
    }

    #[test]
    fn any_of_takes_first() {
        let a = Cell::pending();
        let b = Cell::pending();
        let first = Cell::any_of(&[a.clone(), b.clone()]);
        b.complete(Err(TaskError::Rejected("fast".to_string())));
        a.complete(Ok(1));
        assert_eq!(
            first.peek(),
            Some(Err(TaskError::Rejected("fast".to_string())))
        );
        assert!(!Cell::any_of(&[]).is_done());
    }

    #[test]
    fn spawn_routes_outcomes() {
        let p = pool();
        let ok = Cell::spawn(&p, |c| {
            c.complete(Ok(7));
            Ok(())
        });
        let err = Cell::spawn(&p, |_| Err("no".to_string()));
        let panicked = Cell::spawn(&p, |_| panic!("worker boom"));
        assert_eq!(ok.wait_timeout(WAIT), Some(Ok(7)));
        assert_eq!(
            err.wait_timeout(WAIT),
            Some(Err(TaskError::Rejected("no".to_string())))
        );
        assert_eq!(
            panicked.wait_timeout(WAIT),
            Some(Err(TaskError::Fault(Fault::Panicked("worker boom".to_string()))))
        );
        p.shutdown();
    }

    #[test]
    fn spawn_error_after_settling_is_ignored() {
        let p = pool();
        let c = Cell::spawn(&p, |c| {
            c.complete(Ok(1));
            Err("late".to_string())
        });
        assert_eq!(c.wait_timeout(WAIT), Some(Ok(1)));
        p.shutdown();
    }

    #[test]
    fn spawned_task_can_settle_later() {
        let p = pool();
        let c = Cell::spawn(&p, |c| {
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                c.complete(Ok(3));
            });
            Ok(())
        });
        assert_eq!(c.wait_timeout(WAIT), Some(Ok(3)));
        p.shutdown();
    }

    #[test]
    fn spawn_on_stopped_pool_faults() {
        let p = pool();
        p.shutdown();
        let c = Cell::spawn(&p, |_| Ok(()));
        assert_eq!(c.peek(), Some(Err(TaskError::Fault(Fault::PoolShutdown))));
    }

    #[test]
    fn long_chain_settles_without_recursion() {
        let head = Cell::pending();
        let mut tail = head.clone();
        for _ in 0..100_000 {
            tail = tail.handle(|r| r.map(|v| v + 1));
        }
        head.complete(Ok(0));
        assert_eq!(tail.peek(), Some(Ok(100_000)));
    }

    #[test]
    fn wait_inside_callback_runs_queued_settlements() {
        let outer = Cell::pending();
        let seen = Cell::pending();
        let report = seen.clone();
        outer.on_complete(move |_| {
            let inner = Cell::pending();
            let derived = inner.handle(|r| r.map(|v| v * 2));
            inner.complete(Ok(21));
            report.complete(derived.wait());
        });
        outer.complete(Ok(0));
        assert_eq!(seen.peek(), Some(Ok(42)));
    }
}
