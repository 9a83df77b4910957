//! Execution context (C1): the asynchronous task queue and reactor that
//! every branch callback is serialized through.
//!
//! All real socket and timer work happens on an internally owned Tokio
//! runtime (the "reactor"); components never touch that runtime directly.
//! Instead, once an operation completes they hand a plain closure to
//! [`Context::post`], which enqueues it on a FIFO channel. `poll`/`run` drain
//! that channel and execute closures one at a time on whichever thread calls
//! them, giving the "single serialization point for all branch callbacks"
//! contract of §4.1/§5 without requiring a dedicated event-loop thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::cancellation::TimeoutNanos;
use crate::error::{Result, YogiError};

type Task = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct RunState {
    running_workers: AtomicUsize,
}

/// Owns the task queue, the background Tokio runtime, and the worker
/// bookkeeping needed for `run_in_background`/`stop`/`wait_for_*`.
pub struct Context {
    sender: Sender<Task>,
    receiver: Receiver<Task>,
    stop_flag: Arc<AtomicBool>,
    state: Arc<RunState>,
    running_changed: Arc<(Mutex<()>, Condvar)>,
    tokio: tokio::runtime::Runtime,
    background: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("running_workers", &self.state.running_workers.load(Ordering::Relaxed))
            .finish()
    }
}

impl Context {
    pub fn new() -> Result<Arc<Self>> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let tokio = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|err| YogiError::Unknown(format!("failed to start reactor: {err}")))?;

        Ok(Arc::new(Self {
            sender,
            receiver,
            stop_flag: Arc::new(AtomicBool::new(false)),
            state: Arc::new(RunState::default()),
            running_changed: Arc::new((Mutex::new(()), Condvar::new())),
            tokio,
            background: Mutex::new(None),
        }))
    }

    /// Enqueues a task. Tasks run FIFO within a single worker; ordering
    /// across distinct worker threads calling `run`/`poll` concurrently is
    /// undefined, matching §4.1.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        // `send` only fails if every receiver was dropped, which cannot
        // happen while `self` (which owns one) is alive.
        let _ = self.sender.send(Box::new(task));
    }

    /// Handle used by transport/discovery components to actually drive
    /// sockets and timers; `post` is the only way their results re-enter the
    /// serialized callback stream.
    pub fn reactor(&self) -> tokio::runtime::Handle {
        self.tokio.handle().clone()
    }

    fn run_ready_task(&self) -> bool {
        match self.receiver.try_recv() {
            Ok(task) => {
                task();
                true
            }
            Err(_) => false,
        }
    }

    /// Runs one ready task without blocking, returning whether one ran.
    pub fn poll_one(&self) -> usize {
        if self.run_ready_task() {
            1
        } else {
            0
        }
    }

    /// Runs all currently ready tasks without blocking.
    pub fn poll(&self) -> usize {
        let mut count = 0;
        while self.run_ready_task() {
            count += 1;
        }
        count
    }

    /// Blocks up to `timeout` processing exactly one task (or stops early on
    /// `stop()`); returns the number of tasks executed (0 or 1).
    pub fn run_one(&self, timeout: TimeoutNanos) -> usize {
        self.mark_running();
        let result = self.run_one_inner(timeout);
        self.mark_stopped();
        result
    }

    fn run_one_inner(&self, timeout: TimeoutNanos) -> usize {
        if self.stop_flag.load(Ordering::Acquire) {
            return 0;
        }
        let received = match timeout.to_duration() {
            None => self.receiver.recv().ok(),
            Some(d) => self.receiver.recv_timeout(d).ok(),
        };
        match received {
            Some(task) => {
                task();
                1
            }
            None => 0,
        }
    }

    /// Blocks up to `timeout` processing tasks; returns the number executed.
    /// An infinite timeout only returns once `stop()` is called.
    pub fn run(&self, timeout: TimeoutNanos) -> usize {
        self.mark_running();
        let deadline = timeout.to_duration().map(|d| Instant::now() + d);
        let mut count = 0;
        loop {
            if self.stop_flag.load(Ordering::Acquire) {
                break;
            }
            let remaining = match deadline {
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        break;
                    }
                    TimeoutNanos::from_raw((d - now).as_nanos() as i64).unwrap()
                }
                None => TimeoutNanos::INFINITE,
            };
            if self.run_one_inner(remaining) == 1 {
                count += 1;
            } else {
                break;
            }
        }
        self.mark_stopped();
        count
    }

    /// Starts a dedicated owned thread running `run(infinity)`.
    pub fn run_in_background(self: &Arc<Self>) {
        let ctx = Arc::clone(self);
        let mut guard = self.background.lock();
        if guard.is_some() {
            return;
        }
        *guard = Some(std::thread::spawn(move || {
            ctx.run(TimeoutNanos::INFINITE);
        }));
    }

    /// Sets the stop flag and wakes every worker currently parked in the
    /// infinite-timeout branch of `run`/`run_one` — a bare `recv()` never
    /// re-checks `stop_flag` on its own, so without this a context idling in
    /// `run(INFINITE)` with no pending work would never return. A background
    /// thread is joined lazily on `destroy` (here: when the `Context` is
    /// dropped by its last `Arc`).
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::Release);
        let parked = self.state.running_workers.load(Ordering::Acquire).max(1);
        for _ in 0..parked {
            let _ = self.sender.send(Box::new(|| {}));
        }
    }

    fn mark_running(&self) {
        self.stop_flag.store(false, Ordering::Release);
        self.state.running_workers.fetch_add(1, Ordering::AcqRel);
        let (_, cvar) = &*self.running_changed;
        cvar.notify_all();
    }

    fn mark_stopped(&self) {
        self.state.running_workers.fetch_sub(1, Ordering::AcqRel);
        let (_, cvar) = &*self.running_changed;
        cvar.notify_all();
    }

    fn is_running(&self) -> bool {
        self.state.running_workers.load(Ordering::Acquire) > 0
    }

    /// Waits up to `timeout` for at least one worker to be executing `run`/
    /// `run_one`; fails with `Timeout` if the condition isn't met in time.
    pub fn wait_for_running(&self, timeout: TimeoutNanos) -> Result<()> {
        self.wait_for(timeout, true)
    }

    /// Waits up to `timeout` for every worker to have left `run`/`run_one`.
    pub fn wait_for_stopped(&self, timeout: TimeoutNanos) -> Result<()> {
        self.wait_for(timeout, false)
    }

    fn wait_for(&self, timeout: TimeoutNanos, want_running: bool) -> Result<()> {
        let (lock, cvar) = &*self.running_changed;
        let mut guard = lock.lock();
        let deadline = timeout.to_duration().map(|d| Instant::now() + d);
        while self.is_running() != want_running {
            match deadline {
                None => cvar.wait(&mut guard),
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(YogiError::Timeout);
                    }
                    let timed_out = cvar.wait_for(&mut guard, d - now).timed_out();
                    if timed_out && self.is_running() != want_running {
                        return Err(YogiError::Timeout);
                    }
                }
            }
        }
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.background.lock().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_runs_fifo_under_poll() {
        let ctx = Context::new().unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = order.clone();
            ctx.post(move || order.lock().push(i));
        }
        assert_eq!(ctx.poll(), 5);
        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn poll_one_runs_a_single_task() {
        let ctx = Context::new().unwrap();
        ctx.post(|| {});
        ctx.post(|| {});
        assert_eq!(ctx.poll_one(), 1);
        assert_eq!(ctx.poll_one(), 1);
        assert_eq!(ctx.poll_one(), 0);
    }

    #[test]
    fn run_in_background_processes_posted_tasks() {
        let ctx = Context::new().unwrap();
        ctx.run_in_background();
        ctx.wait_for_running(TimeoutNanos::from_raw(1_000_000_000).unwrap())
            .unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        ctx.post(move || tx.send(()).unwrap());
        rx.recv_timeout(Duration::from_secs(1)).unwrap();

        ctx.stop();
        ctx.wait_for_stopped(TimeoutNanos::from_raw(1_000_000_000).unwrap())
            .unwrap();
    }
}
