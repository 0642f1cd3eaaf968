//! # Signals
//!
//! Typed, thread-safe, in-process signals with two dispatch disciplines over
//! the same listener registry.
//!
//! ## Overview
//!
//! A signal is a publish point for one payload type. Listeners are closures
//! taking a [`Context`] and a reference to the payload. [`SyncSignal`] runs
//! them on the emitting thread in registration order and can stop at the
//! first error; [`AsyncSignal`] copies the listener list and hands every
//! invocation to worker threads, returning immediately.
//!
//! ## Features
//!
//! * **Zero-value ready**: `const fn new()`, the registry is created on first
//!   use, so signals can live in `static`s.
//! * **Keyed listeners**: register under a key to remove individually later.
//!   Removal is O(1) and may reorder the tail of the list.
//! * **Cooperative cancellation**: [`Context`] carries a cancellation token and
//!   an optional deadline, polled before each listener.
//! * **Panic isolation**: asynchronous invocations catch and log listener
//!   panics one by one.
//! * **Bounded threads**: large asynchronous fan-outs share a worker pool sized
//!   from the available parallelism; workers stop on `close`, `reset` or drop.
//! * **No steady-state allocation**: emission reuses snapshot buffers and task
//!   objects from per-signal pools.
//!
//! # Example
//!
//! ```rust
//! use pulse_signals::{Context, SignalError, SyncSignal};
//! use std::sync::{Arc, Mutex};
//!
//! #[derive(Debug, thiserror::Error)]
//! #[error("order {0} is over the limit")]
//! struct OverLimit(u32);
//!
//! let orders = SyncSignal::<u32>::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let log = Arc::clone(&seen);
//! orders.add_keyed_listener("log", move |_, id| log.lock().unwrap().push(*id))?;
//! orders.add_listener_with_err(|_, id: &u32| {
//!     if *id > 100 { Err(OverLimit(*id)) } else { Ok(()) }
//! });
//!
//! let ctx = Context::background();
//! orders.try_emit(&ctx, &7)?;
//! assert!(orders.try_emit(&ctx, &500).is_err());
//! assert_eq!(*seen.lock().unwrap(), vec![7, 500]);
//!
//! orders.remove_listener("log");
//! assert_eq!(orders.len(), 1);
//! # Ok::<(), SignalError>(())
//! ```

mod async_signal;
mod context;
mod error;
mod listener;
mod options;
mod pool;
mod registry;
mod sync_signal;
mod worker;

pub use async_signal::{AsyncSignal, WorkerStats};
pub use context::Context;
pub use error::{BoxError, SignalError, SignalErrorExt};
pub use options::{AsyncOptions, GrowthFn, SignalOptions};
pub use sync_signal::SyncSignal;

/// Operations shared by [`SyncSignal`] and [`AsyncSignal`].
///
/// Lets code register and emit without caring how listeners are dispatched.
///
/// ```rust
/// use pulse_signals::{AsyncSignal, Context, Signal, SyncSignal};
///
/// fn wire<S: Signal<u32>>(signal: &S) -> usize {
///     signal.add_listener(|_, value| assert!(*value > 0));
///     signal.emit(&Context::background(), &1);
///     signal.len()
/// }
///
/// assert_eq!(wire(&SyncSignal::new()), 1);
/// assert_eq!(wire(&AsyncSignal::new()), 1);
/// ```
pub trait Signal<T> {
    /// Registers a listener and returns the new listener count.
    fn add_listener<F>(&self, listener: F) -> usize
    where
        F: Fn(&Context, &T) + Send + Sync + 'static;

    /// Registers a listener under `key` and returns the new listener count.
    ///
    /// # Errors
    /// Returns [`SignalError::DuplicateKey`] if `key` is already registered;
    /// nothing changes in that case.
    fn add_keyed_listener<F>(&self, key: &str, listener: F) -> Result<usize, SignalError>
    where
        F: Fn(&Context, &T) + Send + Sync + 'static;

    /// Removes the listener registered under `key` and returns the remaining
    /// count. Unknown keys are ignored.
    fn remove_listener(&self, key: &str) -> usize;

    /// Removes every listener.
    fn reset(&self);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `payload` to the listeners, ignoring their errors.
    fn emit(&self, ctx: &Context, payload: &T);
}

impl<T> Signal<T> for SyncSignal<T> {
    fn add_listener<F>(&self, listener: F) -> usize
    where
        F: Fn(&Context, &T) + Send + Sync + 'static,
    {
        Self::add_listener(self, listener)
    }

    fn add_keyed_listener<F>(&self, key: &str, listener: F) -> Result<usize, SignalError>
    where
        F: Fn(&Context, &T) + Send + Sync + 'static,
    {
        Self::add_keyed_listener(self, key, listener)
    }

    fn remove_listener(&self, key: &str) -> usize {
        Self::remove_listener(self, key)
    }

    fn reset(&self) {
        Self::reset(self);
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn emit(&self, ctx: &Context, payload: &T) {
        Self::emit(self, ctx, payload);
    }
}

impl<T: Clone + Send + Sync + 'static> Signal<T> for AsyncSignal<T> {
    fn add_listener<F>(&self, listener: F) -> usize
    where
        F: Fn(&Context, &T) + Send + Sync + 'static,
    {
        Self::add_listener(self, listener)
    }

    fn add_keyed_listener<F>(&self, key: &str, listener: F) -> Result<usize, SignalError>
    where
        F: Fn(&Context, &T) + Send + Sync + 'static,
    {
        Self::add_keyed_listener(self, key, listener)
    }

    fn remove_listener(&self, key: &str) -> usize {
        Self::remove_listener(self, key)
    }

    fn reset(&self) {
        Self::reset(self);
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn emit(&self, ctx: &Context, payload: &T) {
        Self::emit(self, ctx, payload);
    }
}

/// Creates an asynchronous signal with default options.
#[must_use]
pub const fn new<T>() -> AsyncSignal<T> {
    AsyncSignal::new()
}

/// Creates a synchronous signal with default options.
#[must_use]
pub const fn new_sync<T>() -> SyncSignal<T> {
    SyncSignal::new()
}

/// Creates an asynchronous signal that sizes its subscriber list from `options`.
#[must_use]
pub const fn new_with_options<T>(options: SignalOptions) -> AsyncSignal<T> {
    AsyncSignal::with_options(options)
}

/// Creates a synchronous signal that sizes its subscriber list from `options`.
#[must_use]
pub const fn new_sync_with_options<T>(options: SignalOptions) -> SyncSignal<T> {
    SyncSignal::with_options(options)
}
