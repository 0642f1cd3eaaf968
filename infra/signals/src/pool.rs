use crossbeam::queue::ArrayQueue;
use std::fmt;

/// A bounded, lock-free free list of reusable objects.
///
/// `take` hands out a pooled object or builds a fresh one; `give` returns an
/// object for reuse and drops it when the pool is already full. Callers reset
/// objects before giving them back.
pub(crate) struct ObjectPool<T> {
    slots: ArrayQueue<T>,
    factory: fn() -> T,
}

impl<T> ObjectPool<T> {
    pub(crate) fn new(capacity: usize, factory: fn() -> T) -> Self {
        Self { slots: ArrayQueue::new(capacity.max(1)), factory }
    }

    #[inline]
    pub(crate) fn take(&self) -> T {
        self.slots.pop().unwrap_or_else(self.factory)
    }

    #[inline]
    pub(crate) fn give(&self, item: T) {
        if let Err(rejected) = self.slots.push(item) {
            drop(rejected);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("pooled", &self.slots.len())
            .field("capacity", &self.slots.capacity())
            .finish()
    }
}
