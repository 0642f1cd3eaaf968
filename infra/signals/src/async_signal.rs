use crate::context::Context;
use crate::error::SignalError;
use crate::listener::Listener;
use crate::options::{AsyncOptions, SignalOptions};
use crate::pool::ObjectPool;
use crate::registry::Registry;
use crate::worker::{EmitTask, Limits, TaskPool, WorkerCounters, WorkerPool};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Pooled snapshot buffers kept per signal.
const SNAPSHOT_POOL_CAPACITY: usize = 64;
/// Snapshot buffers that grew past this many slots are not pooled.
const MAX_POOLED_SNAPSHOT: usize = 1024;
/// Pooled task boxes kept per signal.
const TASK_POOL_CAPACITY: usize = 1024;

/// Worker thread counts of an [`AsyncSignal`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Worker threads alive, including threads of pools retired by
    /// [`AsyncSignal::close`] that are still finishing their queue.
    pub live: usize,
    /// Live threads parked waiting for work.
    pub idle: usize,
    /// Invocations waiting for a thread in the active pools.
    pub queued: usize,
}

#[derive(Debug, Clone, Copy)]
enum Lane {
    Direct,
    Pooled,
}

impl Lane {
    const fn name(self) -> &'static str {
        match self {
            Self::Direct => "signal-direct",
            Self::Pooled => "signal-pooled",
        }
    }
}

/// Everything an asynchronous emission needs besides the registry.
struct Dispatch<T> {
    options: AsyncOptions,
    snapshots: ObjectPool<Vec<Listener<T>>>,
    tasks: Arc<TaskPool<T>>,
    counters: Arc<WorkerCounters>,
    direct: RwLock<Option<WorkerPool<T>>>,
    pooled: RwLock<Option<WorkerPool<T>>>,
}

impl<T> Dispatch<T> {
    fn new(options: AsyncOptions) -> Self {
        Self {
            options,
            snapshots: ObjectPool::new(SNAPSHOT_POOL_CAPACITY, Vec::new),
            tasks: Arc::new(ObjectPool::new(TASK_POOL_CAPACITY, EmitTask::boxed)),
            counters: Arc::new(WorkerCounters::default()),
            direct: RwLock::new(None),
            pooled: RwLock::new(None),
        }
    }

    const fn slot(&self, lane: Lane) -> &RwLock<Option<WorkerPool<T>>> {
        match lane {
            Lane::Direct => &self.direct,
            Lane::Pooled => &self.pooled,
        }
    }

    fn close(&self) {
        let retired = [self.direct.write().take(), self.pooled.write().take()];
        let mut closed = false;
        for pool in retired.iter().flatten() {
            pool.shutdown();
            closed = true;
        }
        if closed {
            debug!(live = self.counters.live(), "Async signal closed");
        }
    }

    fn stats(&self) -> WorkerStats {
        let queued = [&self.direct, &self.pooled]
            .into_iter()
            .map(|slot| slot.read().as_ref().map_or(0, WorkerPool::queued))
            .sum();
        WorkerStats { live: self.counters.live(), idle: self.counters.idle(), queued }
    }

    const fn lane_for(&self, listeners: usize) -> Lane {
        if listeners < self.options.pool_threshold { Lane::Direct } else { Lane::Pooled }
    }

    fn recycle(&self, mut snapshot: Vec<Listener<T>>) {
        if snapshot.capacity() > MAX_POOLED_SNAPSHOT {
            return;
        }
        snapshot.clear();
        self.snapshots.give(snapshot);
    }
}

impl<T: Clone + Send + Sync + 'static> Dispatch<T> {
    /// The worker pool serving `lane`, created on first use.
    ///
    /// The returned guard keeps [`Dispatch::close`] from retiring the pool
    /// while tasks are being submitted to it.
    fn lane(&self, lane: Lane) -> MappedRwLockReadGuard<'_, WorkerPool<T>> {
        let slot = self.slot(lane);
        let mut guard = slot.read();
        loop {
            match RwLockReadGuard::try_map(guard, Option::as_ref) {
                Ok(pool) => return pool,
                Err(empty) => drop(empty),
            }

            let mut writer = slot.write();
            if writer.is_none() {
                *writer = Some(self.build(lane));
            }
            guard = RwLockWriteGuard::downgrade(writer);
        }
    }

    fn build(&self, lane: Lane) -> WorkerPool<T> {
        let limits = match lane {
            Lane::Direct => {
                Limits { max_workers: None, keep_alive: Some(self.options.idle_timeout) }
            },
            Lane::Pooled => {
                Limits { max_workers: Some(self.options.max_workers), keep_alive: None }
            },
        };
        debug!(
            lane = lane.name(),
            max_workers = ?limits.max_workers,
            pool_threshold = self.options.pool_threshold,
            "Worker pool created"
        );
        WorkerPool::new(lane.name(), limits, Arc::clone(&self.tasks), Arc::clone(&self.counters))
    }

    fn schedule(&self, pool: &WorkerPool<T>, listener: Listener<T>, ctx: &Context, payload: &T) {
        let mut task = self.tasks.take();
        task.prepare(listener, ctx.clone(), payload.clone());
        pool.submit(task);
    }

    fn fan_out(&self, snapshot: &[Listener<T>], ctx: &Context, payload: &T) {
        let pool = self.lane(self.lane_for(snapshot.len()));
        for listener in snapshot {
            if ctx.is_done() {
                break;
            }
            self.schedule(&pool, listener.clone(), ctx, payload);
        }
    }
}

enum Snapshot<T> {
    Single(Listener<T>),
    Many(Vec<Listener<T>>),
}

/// A fire-and-forget signal: listeners run on worker threads and
/// [`emit`](AsyncSignal::emit) returns once they are scheduled.
///
/// Each emission copies the current listeners before scheduling them, so
/// registration changes made afterwards do not affect it. Small fan-outs give
/// every listener its own thread; fan-outs of at least
/// [`AsyncOptions::pool_threshold`] listeners share a bounded worker pool.
/// Listener panics are caught and logged per invocation.
///
/// Worker threads belong to the signal. [`close`](AsyncSignal::close),
/// [`reset`](AsyncSignal::reset) and dropping the signal stop them once their
/// queued work is done.
///
/// Listeners are plain: there is no error channel for fire-and-forget
/// dispatch.
///
/// # Example
///
/// ```rust
/// use pulse_signals::{AsyncSignal, Context};
/// use std::sync::mpsc;
///
/// let signal = AsyncSignal::<String>::new();
/// let (tx, rx) = mpsc::channel();
/// let tx = std::sync::Mutex::new(tx);
///
/// signal.add_listener(move |_, name| {
///     let _ = tx.lock().map(|tx| tx.send(format!("hello, {name}")));
/// });
/// signal.emit(&Context::background(), &"world".to_owned());
///
/// assert_eq!(rx.recv().unwrap(), "hello, world");
/// ```
pub struct AsyncSignal<T> {
    registry: OnceLock<Registry<T>>,
    dispatch: OnceLock<Dispatch<T>>,
    options: SignalOptions,
    async_options: Option<AsyncOptions>,
}

impl<T> AsyncSignal<T> {
    /// Creates an empty signal without allocating or starting threads.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registry: OnceLock::new(),
            dispatch: OnceLock::new(),
            options: SignalOptions::new(),
            async_options: None,
        }
    }

    /// Creates an empty signal that sizes its subscriber list from `options`.
    #[must_use]
    pub const fn with_options(options: SignalOptions) -> Self {
        Self { registry: OnceLock::new(), dispatch: OnceLock::new(), options, async_options: None }
    }

    /// Creates an empty signal with custom storage and dispatch options.
    #[must_use]
    pub const fn with_async_options(options: SignalOptions, async_options: AsyncOptions) -> Self {
        Self {
            registry: OnceLock::new(),
            dispatch: OnceLock::new(),
            options,
            async_options: Some(async_options),
        }
    }

    fn registry(&self) -> &Registry<T> {
        self.registry.get_or_init(|| Registry::new(self.options.clone()))
    }

    fn dispatch(&self) -> &Dispatch<T> {
        self.dispatch.get_or_init(|| Dispatch::new(self.async_options.unwrap_or_default()))
    }

    /// Registers a listener and returns the new listener count.
    pub fn add_listener<F>(&self, listener: F) -> usize
    where
        F: Fn(&Context, &T) + Send + Sync + 'static,
    {
        self.registry().push(Listener::plain(listener))
    }

    /// Registers a listener under `key` and returns the new listener count.
    ///
    /// # Errors
    /// Returns [`SignalError::DuplicateKey`] if `key` is already registered.
    pub fn add_keyed_listener<F>(&self, key: &str, listener: F) -> Result<usize, SignalError>
    where
        F: Fn(&Context, &T) + Send + Sync + 'static,
    {
        self.registry().insert(key, Listener::plain(listener))
    }

    /// Removes the listener registered under `key` and returns the remaining count.
    ///
    /// Emissions that already copied the listener still run it.
    pub fn remove_listener(&self, key: &str) -> usize {
        self.registry.get().map_or(0, |registry| registry.remove(key))
    }

    /// Removes every listener and stops the worker threads.
    ///
    /// Invocations already scheduled still run. The next emission starts new
    /// workers.
    pub fn reset(&self) {
        if let Some(registry) = self.registry.get() {
            registry.reset();
        }
        self.close();
    }

    /// Stops the worker threads without touching the listeners.
    ///
    /// Workers finish the invocations already queued and then exit. Does not
    /// wait for them; poll [`stats`](Self::stats) to observe the shutdown.
    pub fn close(&self) {
        if let Some(dispatch) = self.dispatch.get() {
            dispatch.close();
        }
    }

    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        self.dispatch.get().map(Dispatch::stats).unwrap_or_default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.get().map_or(0, Registry::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone + Send + Sync + 'static> AsyncSignal<T> {
    /// Schedules every listener with a clone of `payload` and returns without
    /// waiting for them.
    ///
    /// Nothing is scheduled when `ctx` is already done, and scheduling stops
    /// as soon as it is. Invocations already scheduled still run.
    pub fn emit(&self, ctx: &Context, payload: &T) {
        if ctx.is_done() {
            return;
        }
        let Some(registry) = self.registry.get() else {
            return;
        };
        let dispatch = self.dispatch();

        let snapshot = {
            let subscribers = registry.read();
            match subscribers.entries() {
                [] => return,
                [entry] => Snapshot::Single(entry.listener.clone()),
                entries => {
                    let mut buffer = dispatch.snapshots.take();
                    buffer.extend(entries.iter().map(|entry| entry.listener.clone()));
                    Snapshot::Many(buffer)
                },
            }
        };

        match snapshot {
            Snapshot::Single(listener) => {
                let pool = dispatch.lane(dispatch.lane_for(1));
                dispatch.schedule(&pool, listener, ctx, payload);
            },
            Snapshot::Many(buffer) => {
                dispatch.fan_out(&buffer, ctx, payload);
                dispatch.recycle(buffer);
            },
        }
    }
}

impl<T> Default for AsyncSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for AsyncSignal<T> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<T> fmt::Debug for AsyncSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSignal")
            .field("listeners", &self.len())
            .field("options", &self.options)
            .field("async_options", &self.async_options)
            .field("workers", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::{Duration, Instant};

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

    fn counting(signal: &AsyncSignal<u32>, listeners: usize) -> Arc<AtomicUsize> {
        let calls = Arc::new(AtomicUsize::new(0));
        for _ in 0..listeners {
            let calls = Arc::clone(&calls);
            signal.add_listener(move |_, _| {
                calls.fetch_add(1, Ordering::AcqRel);
            });
        }
        calls
    }

    #[test]
    fn test_nothing_starts_before_first_emit() {
        let signal = AsyncSignal::<u32>::new();
        counting(&signal, 2);

        assert!(signal.dispatch.get().is_none());
        assert_eq!(signal.stats(), WorkerStats::default());
    }

    #[test]
    fn test_small_fan_out_uses_direct_lane() {
        let signal = AsyncSignal::<u32>::new();
        let calls = counting(&signal, 3);

        signal.emit(&Context::background(), &1);

        assert!(wait_until(|| calls.load(Ordering::Acquire) == 3));
        let dispatch = signal.dispatch.get().unwrap();
        assert!(dispatch.direct.read().is_some());
        assert!(dispatch.pooled.read().is_none());
    }

    #[test]
    fn test_threshold_selects_pooled_lane() {
        let options = AsyncOptions::default().pool_threshold(4).max_workers(2);
        let signal = AsyncSignal::<u32>::with_async_options(SignalOptions::new(), options);
        let calls = counting(&signal, 4);

        signal.emit(&Context::background(), &1);

        assert!(wait_until(|| calls.load(Ordering::Acquire) == 4));
        let dispatch = signal.dispatch.get().unwrap();
        assert!(dispatch.pooled.read().is_some());
        assert!(signal.stats().live <= 2);
    }

    #[test]
    fn test_snapshot_buffers_are_recycled() {
        let signal = AsyncSignal::<u32>::new();
        let calls = counting(&signal, 3);

        signal.emit(&Context::background(), &1);
        signal.emit(&Context::background(), &2);

        assert!(wait_until(|| calls.load(Ordering::Acquire) == 6));
        assert_eq!(signal.dispatch.get().unwrap().snapshots.len(), 1);
    }

    #[test]
    fn test_close_retires_lanes() {
        let signal = AsyncSignal::<u32>::new();
        let calls = counting(&signal, 1);

        signal.emit(&Context::background(), &1);
        assert!(wait_until(|| calls.load(Ordering::Acquire) == 1));

        signal.close();
        assert!(signal.dispatch.get().unwrap().direct.read().is_none());
        assert!(wait_until(|| signal.stats().live == 0));
        assert_eq!(signal.len(), 1, "close keeps listeners");

        signal.emit(&Context::background(), &2);
        assert!(wait_until(|| calls.load(Ordering::Acquire) == 2));
    }
}
