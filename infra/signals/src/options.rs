use std::fmt;
use std::num::NonZero;
use std::sync::{Arc, OnceLock};
use std::thread::available_parallelism;
use std::time::Duration;
use tracing::warn;

/// Smallest capacity the default growth policy allocates.
const MIN_GROWTH_CAPACITY: usize = 4;
/// Snapshots with at least this many listeners are dispatched through the bounded pool.
pub(crate) const DEFAULT_POOL_THRESHOLD: usize = 16;
/// Pool workers per available core.
const WORKER_MULTIPLIER: usize = 2;
/// Parallelism assumed when the platform cannot report it.
const DEFAULT_PARALLELISM: usize = 2;
/// Hard cap on pool workers.
const MAX_WORKERS: usize = 1024;
/// How long an idle direct-lane thread waits for work before exiting.
const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

static DEFAULT_MAX_WORKERS: OnceLock<usize> = OnceLock::new();

/// Computes the subscriber list's next capacity from its current capacity.
pub type GrowthFn = Arc<dyn Fn(usize) -> usize + Send + Sync>;

/// Storage options for a signal's subscriber list.
///
/// # Example
///
/// ```rust
/// use pulse_signals::{SignalOptions, SyncSignal};
///
/// let options = SignalOptions::new().initial_capacity(8).growth(|current| current + 8);
/// let signal = SyncSignal::<u32>::with_options(options);
/// assert!(signal.is_empty());
/// ```
#[derive(Clone, Default)]
pub struct SignalOptions {
    pub(crate) initial_capacity: usize,
    growth: Option<GrowthFn>,
}

impl SignalOptions {
    /// Options with no pre-allocated capacity and the default doubling growth.
    #[must_use]
    pub const fn new() -> Self {
        Self { initial_capacity: 0, growth: None }
    }

    /// Pre-allocates room for `capacity` listeners.
    #[must_use = "Options must be passed to a signal constructor to take effect."]
    pub const fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Sets the growth function consulted when the subscriber list is full.
    ///
    /// The function receives the current capacity and returns the new one.
    #[must_use = "Options must be passed to a signal constructor to take effect."]
    pub fn growth<F>(mut self, growth: F) -> Self
    where
        F: Fn(usize) -> usize + Send + Sync + 'static,
    {
        self.growth = Some(Arc::new(growth));
        self
    }

    /// Capacity to grow to when `current` is exhausted and `required` slots are needed.
    pub(crate) fn next_capacity(&self, current: usize, required: usize) -> usize {
        let Some(growth) = &self.growth else {
            return current.saturating_mul(2).max(MIN_GROWTH_CAPACITY).max(required);
        };

        let proposed = growth(current);
        if proposed < required {
            warn!(current, proposed, required, "Growth function did not grow the subscriber list");
            return required;
        }
        proposed
    }
}

impl fmt::Debug for SignalOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalOptions")
            .field("initial_capacity", &self.initial_capacity)
            .field("growth", &self.growth.as_ref().map_or("default", |_| "custom"))
            .finish()
    }
}

/// Dispatch options for [`AsyncSignal`](crate::AsyncSignal).
///
/// # Example
///
/// ```rust
/// use pulse_signals::{AsyncOptions, AsyncSignal, SignalOptions};
/// use std::time::Duration;
///
/// let options = AsyncOptions::default()
///     .pool_threshold(32)
///     .max_workers(4)
///     .idle_timeout(Duration::from_secs(1));
/// let signal = AsyncSignal::<u64>::with_async_options(SignalOptions::new(), options);
/// assert!(signal.is_empty());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncOptions {
    pub(crate) pool_threshold: usize,
    pub(crate) max_workers: usize,
    pub(crate) idle_timeout: Duration,
}

impl Default for AsyncOptions {
    fn default() -> Self {
        Self {
            pool_threshold: DEFAULT_POOL_THRESHOLD,
            max_workers: default_max_workers(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl AsyncOptions {
    /// Snapshots with at least `threshold` listeners go to the bounded worker pool;
    /// smaller ones get one thread per invocation.
    #[must_use = "Options must be passed to a signal constructor to take effect."]
    pub const fn pool_threshold(mut self, threshold: usize) -> Self {
        self.pool_threshold = threshold;
        self
    }

    /// Upper bound on worker threads in the bounded pool, clamped to `1..=1024`.
    #[must_use = "Options must be passed to a signal constructor to take effect."]
    pub const fn max_workers(mut self, workers: usize) -> Self {
        self.max_workers = clamp_workers(workers);
        self
    }

    /// How long an idle direct-dispatch thread lingers before exiting.
    #[must_use = "Options must be passed to a signal constructor to take effect."]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

const fn clamp_workers(workers: usize) -> usize {
    if workers == 0 {
        1
    } else if workers > MAX_WORKERS {
        MAX_WORKERS
    } else {
        workers
    }
}

/// A small multiple of the available parallelism, detected once per process.
fn default_max_workers() -> usize {
    *DEFAULT_MAX_WORKERS.get_or_init(|| {
        let cores = available_parallelism().map_or(DEFAULT_PARALLELISM, NonZero::get);
        clamp_workers(cores.saturating_mul(WORKER_MULTIPLIER))
    })
}
