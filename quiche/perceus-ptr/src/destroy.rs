//! Destroy actions for owned pointers.

use std::ptr::NonNull;

/// Knows how to tear down an object it was handed ownership of.
///
/// [`DefaultDestroyer`] frees `Box` allocations (single objects and slices
/// alike). Any `FnMut(NonNull<T>)` closure is also a destroyer, which makes
/// non-capturing closures a zero-sized way to plug in custom cleanup.
pub trait Destroyer<T: ?Sized> {
    /// Destroy the object behind `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point at a live object that this destroyer is able to
    /// release, and the caller must not use it afterwards.
    unsafe fn destroy(&mut self, ptr: NonNull<T>);
}

/// Frees objects that were allocated with `Box`.
///
/// For `T = [U]` this releases the whole slice, so the array form of
/// [`ExclusiveHandle`](crate::ExclusiveHandle) needs no separate destroyer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct DefaultDestroyer;

impl<T: ?Sized> Destroyer<T> for DefaultDestroyer {
    #[inline]
    unsafe fn destroy(&mut self, ptr: NonNull<T>) {
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

impl<T: ?Sized, F> Destroyer<T> for F
where
    F: FnMut(NonNull<T>),
{
    #[inline]
    unsafe fn destroy(&mut self, ptr: NonNull<T>) {
        self(ptr)
    }
}
