//! Reference counters for control blocks.
//!
//! Counters are plain `Cell<usize>` values. Nothing here is synchronized:
//! every handle that reaches a counter is `!Send` and `!Sync`, so a block
//! is only ever touched from the thread that created it.

use std::cell::Cell;

/// A non-atomic reference counter.
#[derive(Debug, Default)]
pub(crate) struct Count(Cell<usize>);

impl Count {
    /// Create a new counter initialized to the given value.
    #[inline]
    pub(crate) const fn new(initial: usize) -> Self {
        Self(Cell::new(initial))
    }

    #[inline]
    pub(crate) fn get(&self) -> usize {
        self.0.get()
    }

    /// Add one, returning the new value.
    ///
    /// Overflowing the counter means more handles exist than addressable
    /// memory could hold, which can only happen through `mem::forget` in a
    /// loop. Abort instead of wrapping back to zero.
    #[inline]
    pub(crate) fn increment(&self) -> usize {
        let val = self.0.get();
        let Some(next) = val.checked_add(1) else {
            std::process::abort();
        };
        self.0.set(next);
        next
    }

    /// Subtract one, returning the new value.
    #[inline]
    pub(crate) fn decrement(&self) -> usize {
        let val = self.0.get();
        debug_assert!(val > 0, "Decrementing zero reference count");
        self.0.set(val - 1);
        val - 1
    }
}
