use crate::context::Context;
use crate::error::{BoxError, SignalError};
use crate::listener::Listener;
use crate::options::SignalOptions;
use crate::registry::Registry;
use std::fmt;
use std::sync::OnceLock;

/// A signal whose listeners run on the emitting thread, in registration order.
///
/// Concurrent emissions share the registry's read lock, so they run listener
/// bodies in parallel with each other and only serialize against
/// registration changes.
///
/// The zero value is ready to use: [`SyncSignal::new`] is `const` and the
/// subscriber list is created on first registration, so a signal can live in a
/// `static`.
///
/// # Example
///
/// ```rust
/// use pulse_signals::{Context, SyncSignal};
/// use std::sync::atomic::{AtomicU64, Ordering};
///
/// static TOTAL: AtomicU64 = AtomicU64::new(0);
/// static PAYMENTS: SyncSignal<u64> = SyncSignal::new();
///
/// PAYMENTS.add_listener(|_, amount| {
///     TOTAL.fetch_add(*amount, Ordering::Relaxed);
/// });
/// PAYMENTS.emit(&Context::background(), &40);
/// PAYMENTS.emit(&Context::background(), &2);
///
/// assert_eq!(TOTAL.load(Ordering::Relaxed), 42);
/// ```
pub struct SyncSignal<T> {
    registry: OnceLock<Registry<T>>,
    options: SignalOptions,
}

impl<T> SyncSignal<T> {
    /// Creates an empty signal without allocating.
    #[must_use]
    pub const fn new() -> Self {
        Self { registry: OnceLock::new(), options: SignalOptions::new() }
    }

    /// Creates an empty signal that sizes its subscriber list from `options`.
    #[must_use]
    pub const fn with_options(options: SignalOptions) -> Self {
        Self { registry: OnceLock::new(), options }
    }

    fn registry(&self) -> &Registry<T> {
        self.registry.get_or_init(|| Registry::new(self.options.clone()))
    }

    /// Registers a plain listener and returns the new listener count.
    pub fn add_listener<F>(&self, listener: F) -> usize
    where
        F: Fn(&Context, &T) + Send + Sync + 'static,
    {
        self.registry().push(Listener::plain(listener))
    }

    /// Registers a plain listener under `key` and returns the new listener count.
    ///
    /// # Errors
    /// Returns [`SignalError::DuplicateKey`] if `key` is already registered; the
    /// existing listener stays in place.
    pub fn add_keyed_listener<F>(&self, key: &str, listener: F) -> Result<usize, SignalError>
    where
        F: Fn(&Context, &T) + Send + Sync + 'static,
    {
        self.registry().insert(key, Listener::plain(listener))
    }

    /// Registers an error-returning listener and returns the new listener count.
    ///
    /// Its errors stop [`try_emit`](Self::try_emit) and are ignored by
    /// [`emit`](Self::emit).
    pub fn add_listener_with_err<F, E>(&self, listener: F) -> usize
    where
        F: Fn(&Context, &T) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
        T: 'static,
    {
        self.registry().push(Listener::fallible(listener))
    }

    /// Registers an error-returning listener under `key`.
    ///
    /// # Errors
    /// Returns [`SignalError::DuplicateKey`] if `key` is already registered.
    pub fn add_keyed_listener_with_err<F, E>(
        &self,
        key: &str,
        listener: F,
    ) -> Result<usize, SignalError>
    where
        F: Fn(&Context, &T) -> Result<(), E> + Send + Sync + 'static,
        E: Into<BoxError> + 'static,
        T: 'static,
    {
        self.registry().insert(key, Listener::fallible(listener))
    }

    /// Removes the listener registered under `key` and returns the remaining count.
    ///
    /// The last listener is moved into the freed slot, so removing anything but
    /// the last listener changes the order of the tail.
    pub fn remove_listener(&self, key: &str) -> usize {
        self.registry.get().map_or(0, |registry| registry.remove(key))
    }

    /// Removes every listener.
    pub fn reset(&self) {
        if let Some(registry) = self.registry.get() {
            registry.reset();
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.get().map_or(0, Registry::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Calls every listener with `payload`, ignoring listener errors.
    ///
    /// Stops before the next listener once `ctx` is done; a context that is
    /// already done invokes nothing.
    pub fn emit(&self, ctx: &Context, payload: &T) {
        if ctx.is_done() {
            return;
        }
        let Some(registry) = self.registry.get() else {
            return;
        };

        let subscribers = registry.read();
        match subscribers.entries() {
            [] => {},
            [entry] => entry.listener.call(ctx, payload),
            entries => {
                for entry in entries {
                    if ctx.is_done() {
                        break;
                    }
                    entry.listener.call(ctx, payload);
                }
            },
        }
    }

    /// Calls every listener with `payload` and stops at the first failure.
    ///
    /// The context is checked before each listener, so a cancellation always
    /// wins over a listener error that has not happened yet. When every
    /// listener succeeds, the context's state after the last one is returned.
    ///
    /// # Errors
    /// * [`SignalError::Canceled`] or [`SignalError::DeadlineExceeded`] when
    ///   `ctx` is done before or during the traversal.
    /// * [`SignalError::Listener`] carrying the first listener error.
    pub fn try_emit(&self, ctx: &Context, payload: &T) -> Result<(), SignalError> {
        ctx.check()?;
        let Some(registry) = self.registry.get() else {
            return Ok(());
        };

        {
            let subscribers = registry.read();
            for entry in subscribers.entries() {
                ctx.check()?;
                entry.listener.try_call(ctx, payload)?;
            }
        }
        ctx.check()
    }
}

impl<T> Default for SyncSignal<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for SyncSignal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncSignal")
            .field("listeners", &self.len())
            .field("options", &self.options)
            .finish()
    }
}
