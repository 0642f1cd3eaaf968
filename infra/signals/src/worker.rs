//! Worker threads for asynchronous dispatch.
//!
//! A [`WorkerPool`] owns a task queue and spawns threads lazily as demand
//! appears. The same machinery runs both dispatch lanes of an
//! [`AsyncSignal`](crate::AsyncSignal):
//!
//! * the **direct** lane has no thread limit and reuses a parked thread
//!   when one is idle, so every invocation starts immediately on its own
//!   thread. Idle threads exit after a keep-alive period.
//! * the **pooled** lane is capped at a small multiple of the available
//!   parallelism. Its threads never idle out and stop only on shutdown.

use crate::context::Context;
use crate::listener::Listener;
use crate::pool::ObjectPool;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, trace, warn};

/// Queue slots reserved up front so moderate bursts never grow the queue.
const INITIAL_QUEUE_CAPACITY: usize = 64;

/// One asynchronous listener invocation.
///
/// Tasks are boxed once and recycled through an [`ObjectPool`], so steady-state
/// dispatch does not allocate.
pub(crate) struct EmitTask<T> {
    listener: Option<Listener<T>>,
    ctx: Context,
    payload: Option<T>,
}

impl<T> EmitTask<T> {
    pub(crate) fn boxed() -> Box<Self> {
        Box::new(Self { listener: None, ctx: Context::background(), payload: None })
    }

    pub(crate) fn prepare(&mut self, listener: Listener<T>, ctx: Context, payload: T) {
        self.listener = Some(listener);
        self.ctx = ctx;
        self.payload = Some(payload);
    }

    /// Runs the listener inside its own panic boundary.
    ///
    /// A panicking listener is logged and discarded; it never reaches the
    /// worker loop or any other invocation.
    pub(crate) fn run(&mut self) {
        let (Some(listener), Some(payload)) = (self.listener.take(), self.payload.take()) else {
            return;
        };
        let ctx = &self.ctx;
        if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| listener.call(ctx, &payload)))
        {
            warn!(panic = panic_message(panic.as_ref()), "Listener panicked during async emit");
        }
    }

    /// Releases everything the task holds so the box can be pooled.
    pub(crate) fn clear(&mut self) {
        self.listener = None;
        self.payload = None;
        self.ctx = Context::background();
    }
}

impl<T> fmt::Debug for EmitTask<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmitTask")
            .field("listener", &self.listener)
            .field("ctx", &self.ctx)
            .field("has_payload", &self.payload.is_some())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

pub(crate) type TaskPool<T> = ObjectPool<Box<EmitTask<T>>>;

/// Thread counters shared by every pool a signal creates, including pools
/// that were shut down and are still winding down.
#[derive(Debug, Default)]
pub(crate) struct WorkerCounters {
    live: AtomicUsize,
    idle: AtomicUsize,
}

impl WorkerCounters {
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    pub(crate) fn idle(&self) -> usize {
        self.idle.load(Ordering::Acquire)
    }
}

/// Sizing policy of a [`WorkerPool`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Limits {
    /// `None` spawns a thread whenever no idle one is available.
    pub(crate) max_workers: Option<usize>,
    /// `None` keeps idle threads until shutdown.
    pub(crate) keep_alive: Option<Duration>,
}

#[derive(Debug)]
struct State<T> {
    queue: VecDeque<Box<EmitTask<T>>>,
    workers: usize,
    /// Workers currently running a task.
    busy: usize,
    idle: usize,
    /// Wake-ups handed to idle workers that have not consumed them yet.
    notified: usize,
    shutdown: bool,
}

struct Shared<T> {
    name: &'static str,
    limits: Limits,
    state: Mutex<State<T>>,
    condvar: Condvar,
    tasks: Arc<TaskPool<T>>,
    counters: Arc<WorkerCounters>,
}

/// A handle to a set of worker threads consuming one task queue.
pub(crate) struct WorkerPool<T> {
    shared: Arc<Shared<T>>,
}

impl<T> WorkerPool<T> {
    pub(crate) fn new(
        name: &'static str,
        limits: Limits,
        tasks: Arc<TaskPool<T>>,
        counters: Arc<WorkerCounters>,
    ) -> Self {
        let state = State {
            queue: VecDeque::with_capacity(INITIAL_QUEUE_CAPACITY),
            workers: 0,
            busy: 0,
            idle: 0,
            notified: 0,
            shutdown: false,
        };
        let shared = Shared {
            name,
            limits,
            state: Mutex::new(state),
            condvar: Condvar::new(),
            tasks,
            counters,
        };
        Self { shared: Arc::new(shared) }
    }

    /// Stops accepting work. Workers drain the queue, then exit.
    ///
    /// Does not wait for the workers.
    pub(crate) fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
        }
        self.shared.condvar.notify_all();
        trace!(pool = self.shared.name, "Worker pool shutting down");
    }

    pub(crate) fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Enqueues a task, waking an idle worker or spawning a new one if the
    /// limits allow.
    ///
    /// A thread is spawned only when queued tasks outnumber the workers that
    /// are not running anything, so a worker about to return for more work is
    /// never duplicated.
    pub(crate) fn submit(&self, task: Box<EmitTask<T>>) {
        let spawn = {
            let mut state = self.shared.state.lock();
            state.queue.push_back(task);
            if state.idle > 0 {
                state.idle -= 1;
                state.notified += 1;
                self.shared.condvar.notify_one();
                false
            } else if state.queue.len() > state.workers - state.busy
                && self.shared.limits.max_workers.is_none_or(|max| state.workers < max)
            {
                state.workers += 1;
                true
            } else {
                false
            }
        };

        if spawn {
            self.spawn_worker();
        }
    }

    fn spawn_worker(&self) {
        let shared = Arc::clone(&self.shared);
        self.shared.counters.live.fetch_add(1, Ordering::AcqRel);

        let spawned = thread::Builder::new()
            .name(format!("{}-worker", self.shared.name))
            .spawn(move || shared.run());

        match spawned {
            Ok(_) => trace!(pool = self.shared.name, "Worker spawned"),
            Err(e) => {
                self.shared.counters.live.fetch_sub(1, Ordering::AcqRel);
                error!(
                    pool = self.shared.name,
                    error = %e,
                    "Failed to spawn worker thread; running the invocation inline"
                );
                let task = {
                    let mut state = self.shared.state.lock();
                    state.workers -= 1;
                    state.queue.pop_back()
                };
                if let Some(task) = task {
                    self.shared.execute(task);
                }
            },
        }
    }
}

impl<T> Shared<T> {
    fn execute(&self, mut task: Box<EmitTask<T>>) {
        task.run();
        task.clear();
        self.tasks.give(task);
    }

    fn run(&self) {
        let mut state = self.state.lock();
        loop {
            if let Some(task) = state.queue.pop_front() {
                state.busy += 1;
                MutexGuard::unlocked(&mut state, || self.execute(task));
                state.busy -= 1;
                continue;
            }
            if state.shutdown {
                break;
            }

            state.idle += 1;
            self.counters.idle.fetch_add(1, Ordering::AcqRel);
            let timed_out = match self.limits.keep_alive {
                Some(keep_alive) => self.condvar.wait_for(&mut state, keep_alive).timed_out(),
                None => {
                    self.condvar.wait(&mut state);
                    false
                },
            };
            self.counters.idle.fetch_sub(1, Ordering::AcqRel);

            if state.notified > 0 {
                // `submit` already took this worker off the idle count.
                state.notified -= 1;
                continue;
            }
            state.idle -= 1;
            if timed_out && !state.shutdown && state.queue.is_empty() {
                trace!(pool = self.name, "Idle worker exiting");
                break;
            }
        }

        state.workers -= 1;
        drop(state);
        self.counters.live.fetch_sub(1, Ordering::AcqRel);
        trace!(pool = self.name, "Worker stopped");
    }
}

impl<T> fmt::Debug for WorkerPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("WorkerPool")
            .field("name", &self.shared.name)
            .field("limits", &self.shared.limits)
            .field("workers", &state.workers)
            .field("busy", &state.busy)
            .field("idle", &state.idle)
            .field("queued", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::time::Instant;

    fn pool(limits: Limits) -> (WorkerPool<u32>, Arc<TaskPool<u32>>, Arc<WorkerCounters>) {
        let tasks = Arc::new(ObjectPool::new(64, EmitTask::boxed));
        let counters = Arc::new(WorkerCounters::default());
        let pool = WorkerPool::new("test", limits, Arc::clone(&tasks), Arc::clone(&counters));
        (pool, tasks, counters)
    }

    fn task<F>(tasks: &TaskPool<u32>, listener: F) -> Box<EmitTask<u32>>
    where
        F: Fn(&Context, &u32) + Send + Sync + 'static,
    {
        let mut task = tasks.take();
        task.prepare(Listener::plain(listener), Context::background(), 7);
        task
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn test_run_isolates_panics() {
        let mut task = EmitTask::<u32>::boxed();
        let listener = Listener::plain(|_: &Context, _: &u32| panic!("boom"));
        task.prepare(listener, Context::background(), 1);
        task.run();
        task.clear();
        assert!(task.listener.is_none());
        assert!(task.payload.is_none());
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42_u8);

        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
    }

    #[test]
    fn test_bounded_pool_never_exceeds_limit() {
        let (pool, tasks, counters) = pool(Limits { max_workers: Some(2), keep_alive: None });
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..32 {
            let done = Arc::clone(&done);
            pool.submit(task(&tasks, move |_, _| {
                thread::sleep(Duration::from_millis(1));
                done.fetch_add(1, Ordering::AcqRel);
            }));
            assert!(counters.live() <= 2);
        }

        assert!(wait_until(|| done.load(Ordering::Acquire) == 32));
        assert!(counters.live() <= 2);

        pool.shutdown();
        assert!(wait_until(|| counters.live() == 0));
    }

    #[test]
    fn test_unbounded_pool_runs_every_task_concurrently() {
        let (pool, tasks, counters) =
            pool(Limits { max_workers: None, keep_alive: Some(Duration::from_secs(5)) });
        let barrier = Arc::new(Barrier::new(4));
        let done = Arc::new(AtomicUsize::new(0));

        // Each task blocks until all four run at once, which only works if
        // every task got its own thread.
        for _ in 0..4 {
            let barrier = Arc::clone(&barrier);
            let done = Arc::clone(&done);
            pool.submit(task(&tasks, move |_, _| {
                barrier.wait();
                done.fetch_add(1, Ordering::AcqRel);
            }));
        }

        assert!(wait_until(|| done.load(Ordering::Acquire) == 4));
        assert_eq!(counters.live(), 4);

        pool.shutdown();
        assert!(wait_until(|| counters.live() == 0));
    }

    #[test]
    fn test_idle_workers_are_reused() {
        let (pool, tasks, counters) =
            pool(Limits { max_workers: None, keep_alive: Some(Duration::from_secs(5)) });
        let done = Arc::new(AtomicUsize::new(0));

        for round in 1..=5 {
            let done_in_task = Arc::clone(&done);
            pool.submit(task(&tasks, move |_, _| {
                done_in_task.fetch_add(1, Ordering::AcqRel);
            }));
            assert!(wait_until(|| done.load(Ordering::Acquire) == round));
            assert!(wait_until(|| counters.idle() == counters.live()));
        }

        assert_eq!(counters.live(), 1);
        assert!(tasks.len() >= 1, "finished tasks go back to the pool");
        pool.shutdown();
    }

    #[test]
    fn test_idle_workers_expire() {
        let (pool, tasks, counters) =
            pool(Limits { max_workers: None, keep_alive: Some(Duration::from_millis(20)) });

        pool.submit(task(&tasks, |_, _| {}));
        assert!(wait_until(|| counters.live() == 0));
        assert_eq!(pool.queued(), 0);
    }

    #[test]
    fn test_shutdown_drains_queued_tasks() {
        let (pool, tasks, counters) = pool(Limits { max_workers: Some(1), keep_alive: None });
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let done = Arc::clone(&done);
            pool.submit(task(&tasks, move |_, _| {
                thread::sleep(Duration::from_millis(2));
                done.fetch_add(1, Ordering::AcqRel);
            }));
        }
        pool.shutdown();

        assert!(wait_until(|| counters.live() == 0));
        assert_eq!(done.load(Ordering::Acquire), 8);
    }
}
