use crate::error::SignalError;
use crate::listener::{KeyedEntry, Listener};
use crate::options::SignalOptions;
use fxhash::FxHashMap;
use parking_lot::{RwLock, RwLockReadGuard};
use tracing::trace;

/// The ordered subscriber list and its key index.
#[derive(Debug)]
pub(crate) struct Subscribers<T> {
    entries: Vec<KeyedEntry<T>>,
    index: FxHashMap<String, usize>,
}

impl<T> Subscribers<T> {
    #[inline]
    pub(crate) fn entries(&self) -> &[KeyedEntry<T>] {
        &self.entries
    }

    fn reserve_one(&mut self, options: &SignalOptions) {
        if self.entries.len() < self.entries.capacity() {
            return;
        }
        let required = self.entries.len().saturating_add(1);
        let target = options.next_capacity(self.entries.capacity(), required);
        self.entries.reserve_exact(target - self.entries.len());
    }
}

/// Listener storage shared by both dispatchers.
///
/// Mutations take the write lock; emission and length queries take the read
/// lock, so concurrent emissions run in parallel and only serialize against
/// registration changes.
///
/// Removal swaps the last entry into the freed slot. Removing the last entry
/// keeps the order of the rest; removing any other entry moves the previous
/// last entry into its position.
#[derive(Debug)]
pub(crate) struct Registry<T> {
    subscribers: RwLock<Subscribers<T>>,
    options: SignalOptions,
}

impl<T> Registry<T> {
    pub(crate) fn new(options: SignalOptions) -> Self {
        let subscribers = Subscribers {
            entries: Vec::with_capacity(options.initial_capacity),
            index: FxHashMap::default(),
        };
        Self { subscribers: RwLock::new(subscribers), options }
    }

    /// Appends an anonymous listener and returns the new count.
    pub(crate) fn push(&self, listener: Listener<T>) -> usize {
        let count = {
            let mut subscribers = self.subscribers.write();
            subscribers.reserve_one(&self.options);
            subscribers.entries.push(KeyedEntry { listener, key: None });
            subscribers.entries.len()
        };
        trace!(count, keyed = false, "Listener added");
        count
    }

    /// Appends a keyed listener and returns the new count.
    ///
    /// # Errors
    /// Returns [`SignalError::DuplicateKey`] without touching the list if
    /// `key` is already registered.
    pub(crate) fn insert(&self, key: &str, listener: Listener<T>) -> Result<usize, SignalError> {
        let count = {
            let mut guard = self.subscribers.write();
            if guard.index.contains_key(key) {
                drop(guard);
                trace!(key, "Listener key already registered");
                return Err(SignalError::DuplicateKey { key: key.to_owned().into(), context: None });
            }
            guard.reserve_one(&self.options);
            let subscribers = &mut *guard;
            subscribers.index.insert(key.to_owned(), subscribers.entries.len());
            subscribers.entries.push(KeyedEntry { listener, key: Some(key.to_owned()) });
            subscribers.entries.len()
        };
        trace!(count, keyed = true, key, "Listener added");
        Ok(count)
    }

    /// Removes the entry registered under `key` and returns the remaining count.
    ///
    /// Anonymous entries never match, not even for the empty key. Unknown keys
    /// leave the list untouched.
    pub(crate) fn remove(&self, key: &str) -> usize {
        let mut guard = self.subscribers.write();
        let subscribers = &mut *guard;
        let Some(position) = subscribers.index.remove(key) else {
            return subscribers.entries.len();
        };

        subscribers.entries.swap_remove(position);
        if let Some(moved) = subscribers.entries.get(position)
            && let Some(moved_key) = moved.key.as_deref()
            && let Some(slot) = subscribers.index.get_mut(moved_key)
        {
            *slot = position;
        }

        let count = subscribers.entries.len();
        drop(guard);
        trace!(count, key, "Listener removed");
        count
    }

    /// Drops every entry and key.
    ///
    /// Waits for in-flight emissions holding the read lock; snapshots already
    /// copied out by the asynchronous dispatcher are unaffected.
    pub(crate) fn reset(&self) {
        {
            let mut subscribers = self.subscribers.write();
            subscribers.entries.clear();
            subscribers.index.clear();
        }
        trace!("Listeners reset");
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers.read().entries.len()
    }

    /// Shared access to the subscriber list for the duration of an emission.
    #[inline]
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Subscribers<T>> {
        self.subscribers.read()
    }
}
