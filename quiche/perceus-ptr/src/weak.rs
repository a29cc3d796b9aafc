//! Weak references for cycle prevention.

use crate::block::{BlockLink, ControlBlock};
use crate::shared::SharedHandle;
use std::fmt;
use std::mem;
use std::ptr::NonNull;

/// A non-owning observer of a shared object.
///
/// Weak handles keep the control block alive but never the object. They
/// report whether the object still exists and can be promoted to a
/// [`SharedHandle`] while it does. Use them for back-references; a cycle of
/// strong handles is never freed.
///
/// # Example
///
/// ```
/// use perceus_ptr::{make_shared, WeakHandle};
///
/// let strong = make_shared(42);
/// let weak = WeakHandle::from(&strong);
/// assert!(!weak.expired());
/// assert_eq!(*weak.lock(), 42);
///
/// drop(strong);
/// assert!(weak.expired());
/// assert!(weak.lock().is_null());
/// ```
pub struct WeakHandle<T: ?Sized> {
    pub(crate) block: BlockLink,
    pub(crate) ptr: Option<NonNull<T>>,
}

impl<T: ?Sized> WeakHandle<T> {
    /// A handle observing nothing; it is always expired.
    #[inline]
    pub const fn new() -> Self {
        Self {
            block: None,
            ptr: None,
        }
    }

    /// Adopt one weak reference that the caller already counted.
    ///
    /// # Safety
    ///
    /// If `block` is set, the caller must own one weak reference to it.
    #[inline]
    pub(crate) unsafe fn from_raw_parts(block: BlockLink, ptr: Option<NonNull<T>>) -> Self {
        Self { block, ptr }
    }

    /// Returns true once the observed object has been destroyed.
    ///
    /// Empty handles are always expired.
    #[inline]
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Strong count of the observed object, 0 when empty or expired.
    #[inline]
    pub fn use_count(&self) -> usize {
        self.block
            .map_or(0, |block| unsafe { block.as_ref() }.strong_count())
    }

    /// Number of weak handles observing the same block, 0 when empty.
    #[inline]
    pub fn weak_count(&self) -> usize {
        self.block
            .map_or(0, |block| unsafe { block.as_ref() }.weak_count())
    }

    /// Promote to a strong handle, or an empty one if the object is gone.
    pub fn lock(&self) -> SharedHandle<T> {
        match self.block {
            Some(block) if !self.expired() => {
                unsafe { block.as_ref() }.increment_strong();
                unsafe { SharedHandle::from_raw_parts(Some(block), self.ptr) }
            }
            _ => SharedHandle::null(),
        }
    }

    /// Stop observing and become empty.
    #[inline]
    pub fn reset(&mut self) {
        self.release();
    }

    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    /// Same block and same exposed pointer.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block
            && this.ptr.map(|ptr| ptr.cast::<()>()) == other.ptr.map(|ptr| ptr.cast::<()>())
    }

    fn release(&mut self) {
        self.ptr = None;
        if let Some(block) = self.block.take() {
            unsafe {
                if ControlBlock::decrement_weak(block) == 0 {
                    ControlBlock::free(block);
                }
            }
        }
    }
}

impl<T: ?Sized> From<&SharedHandle<T>> for WeakHandle<T> {
    fn from(shared: &SharedHandle<T>) -> Self {
        let block = shared.block();
        if let Some(block) = block {
            unsafe { block.as_ref() }.increment_weak();
        }
        unsafe { Self::from_raw_parts(block, shared.as_ptr()) }
    }
}

impl<T: ?Sized> Clone for WeakHandle<T> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            unsafe { block.as_ref() }.increment_weak();
        }
        unsafe { Self::from_raw_parts(self.block, self.ptr) }
    }

    fn clone_from(&mut self, source: &Self) {
        if !Self::ptr_eq(self, source) {
            *self = source.clone();
        }
    }
}

impl<T: ?Sized> Drop for WeakHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: ?Sized> Default for WeakHandle<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for WeakHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakHandle")
            .field("use_count", &self.use_count())
            .field("expired", &self.expired())
            .finish()
    }
}
