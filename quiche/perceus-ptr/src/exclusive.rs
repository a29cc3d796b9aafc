//! Single-owner handle with a pluggable destroy action.

use crate::destroy::{DefaultDestroyer, Destroyer};
use crate::error::empty_deref;
use crate::pair::CompressedPair;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut, Index, IndexMut};
use std::ptr::{self, NonNull};

/// An owning pointer with exactly one owner.
///
/// The pointer and its destroyer live in a [`CompressedPair`], so with the
/// default destroyer (or any other stateless one) the handle is the size of
/// a single pointer. Handles can be moved but never copied; dropping or
/// resetting a non-empty handle runs the destroyer exactly once.
///
/// # Example
///
/// ```
/// use perceus_ptr::ExclusiveHandle;
///
/// let mut a = ExclusiveHandle::new(String::from("hello"));
/// let b = std::mem::take(&mut a);
/// assert!(a.is_null());
/// assert_eq!(&*b, "hello");
/// ```
pub struct ExclusiveHandle<T: ?Sized, D: Destroyer<T> = DefaultDestroyer> {
    pair: CompressedPair<Option<NonNull<T>>, D>,
    _owns: PhantomData<T>,
}

/// Exclusive ownership of a heap slice, with indexed access.
pub type ExclusiveArray<T, D = DefaultDestroyer> = ExclusiveHandle<[T], D>;

impl<T> ExclusiveHandle<T> {
    /// Allocate `value` on the heap and own it.
    #[inline]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized> ExclusiveHandle<T> {
    /// Take ownership of a boxed value.
    #[inline]
    pub fn from_box(value: Box<T>) -> Self {
        Self {
            pair: CompressedPair::new(Some(NonNull::from(Box::leak(value))), DefaultDestroyer),
            _owns: PhantomData,
        }
    }

    /// Give the value back as a `Box`, or `None` if the handle is empty.
    pub fn into_box(self) -> Option<Box<T>> {
        self.into_raw()
            .map(|ptr| unsafe { Box::from_raw(ptr.as_ptr()) })
    }

    /// Replace the owned value, destroying the previous one.
    pub fn replace(&mut self, value: Box<T>) {
        unsafe { self.reset_raw(Box::into_raw(value)) }
    }
}

impl<T: ?Sized, D: Destroyer<T> + Default> ExclusiveHandle<T, D> {
    /// An empty handle.
    #[inline]
    pub fn null() -> Self {
        Self {
            pair: CompressedPair::new(None, D::default()),
            _owns: PhantomData,
        }
    }

    /// Take ownership of a raw pointer using the default destroyer.
    ///
    /// A null pointer yields an empty handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point at a live object that `D` can destroy,
    /// and nothing else may own it.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        unsafe { Self::from_raw_with(ptr, D::default()) }
    }
}

impl<T: ?Sized, D: Destroyer<T>> ExclusiveHandle<T, D> {
    /// Take ownership of a raw pointer with an explicit destroyer.
    ///
    /// # Safety
    ///
    /// Same contract as [`ExclusiveHandle::from_raw`], with `destroyer`
    /// being the action that releases `ptr`.
    #[inline]
    pub unsafe fn from_raw_with(ptr: *mut T, destroyer: D) -> Self {
        Self {
            pair: CompressedPair::new(NonNull::new(ptr), destroyer),
            _owns: PhantomData,
        }
    }

    /// Give up ownership without destroying anything.
    ///
    /// The handle is left empty; the caller becomes responsible for the
    /// returned pointer.
    #[inline]
    pub fn release(&mut self) -> Option<NonNull<T>> {
        self.pair.first_mut().take()
    }

    /// Consume the handle, returning the pointer without destroying it.
    #[inline]
    pub fn into_raw(mut self) -> Option<NonNull<T>> {
        self.release()
    }

    /// Destroy the owned object (if any) and leave the handle empty.
    pub fn reset(&mut self) {
        let (slot, destroyer) = self.pair.as_mut_parts();
        if let Some(old) = slot.take() {
            unsafe { destroyer.destroy(old) };
        }
    }

    /// Store `ptr` and destroy the previously owned object.
    ///
    /// The new pointer is in place before the destroyer runs.
    ///
    /// # Safety
    ///
    /// `ptr` must satisfy the contract of [`ExclusiveHandle::from_raw_with`]
    /// for this handle's destroyer.
    pub unsafe fn reset_raw(&mut self, ptr: *mut T) {
        let (slot, destroyer) = self.pair.as_mut_parts();
        if let Some(old) = std::mem::replace(slot, NonNull::new(ptr)) {
            unsafe { destroyer.destroy(old) };
        }
    }

    /// Exchange pointer and destroyer with another handle.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        self.pair.swap(&mut other.pair);
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.pair.first().is_none()
    }

    #[inline]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        *self.pair.first()
    }

    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.as_ptr().map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    #[inline]
    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.as_ptr().map(|ptr| unsafe { &mut *ptr.as_ptr() })
    }

    #[inline]
    pub fn destroyer(&self) -> &D {
        self.pair.second()
    }

    #[inline]
    pub fn destroyer_mut(&mut self) -> &mut D {
        self.pair.second_mut()
    }

    /// Move the pointer into a handle with a compatible destroyer type.
    pub fn into_destroyer<E>(self) -> ExclusiveHandle<T, E>
    where
        D: Into<E>,
        E: Destroyer<T>,
    {
        let (ptr, destroyer) = self.into_parts();
        ExclusiveHandle {
            pair: CompressedPair::new(ptr, destroyer.into()),
            _owns: PhantomData,
        }
    }

    /// Split into pointer and destroyer without running the destroyer.
    fn into_parts(self) -> (Option<NonNull<T>>, D) {
        let mut this = ManuallyDrop::new(self);
        let ptr = this.release();
        // The pointer slot is now empty and `this` is never dropped, so the
        // destroyer is moved out exactly once.
        let destroyer = unsafe { ptr::read(this.pair.second()) };
        (ptr, destroyer)
    }
}

impl<T, D: Destroyer<[T]>> ExclusiveHandle<[T], D> {
    /// Number of elements, or zero for an empty handle.
    #[inline]
    pub fn len(&self) -> usize {
        self.get().map_or(0, <[T]>::len)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized, D: Destroyer<T>> Drop for ExclusiveHandle<T, D> {
    fn drop(&mut self) {
        self.reset();
    }
}

impl<T: ?Sized, D: Destroyer<T> + Default> Default for ExclusiveHandle<T, D> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> From<Box<T>> for ExclusiveHandle<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T> From<Vec<T>> for ExclusiveArray<T> {
    fn from(values: Vec<T>) -> Self {
        Self::from_box(values.into_boxed_slice())
    }
}

impl<T: ?Sized, D: Destroyer<T>> Deref for ExclusiveHandle<T, D> {
    type Target = T;

    #[inline]
    #[track_caller]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => empty_deref("ExclusiveHandle"),
        }
    }
}

impl<T: ?Sized, D: Destroyer<T>> DerefMut for ExclusiveHandle<T, D> {
    #[inline]
    #[track_caller]
    fn deref_mut(&mut self) -> &mut T {
        match self.get_mut() {
            Some(value) => value,
            None => empty_deref("ExclusiveHandle"),
        }
    }
}

impl<T, D: Destroyer<[T]>> Index<usize> for ExclusiveHandle<[T], D> {
    type Output = T;

    #[inline]
    #[track_caller]
    fn index(&self, index: usize) -> &T {
        &(**self)[index]
    }
}

impl<T, D: Destroyer<[T]>> IndexMut<usize> for ExclusiveHandle<[T], D> {
    #[inline]
    #[track_caller]
    fn index_mut(&mut self, index: usize) -> &mut T {
        &mut (**self)[index]
    }
}

impl<T: ?Sized + fmt::Debug, D: Destroyer<T>> fmt::Debug for ExclusiveHandle<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExclusiveHandle")
            .field("value", &self.get())
            .finish()
    }
}

impl<T: ?Sized, D: Destroyer<T>> fmt::Pointer for ExclusiveHandle<T, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_ptr() {
            Some(ptr) => fmt::Pointer::fmt(&ptr, f),
            None => f.write_str("null"),
        }
    }
}

// Same reasoning as `Box`: the handle owns its value outright.
unsafe impl<T: ?Sized + Send, D: Destroyer<T> + Send> Send for ExclusiveHandle<T, D> {}
unsafe impl<T: ?Sized + Sync, D: Destroyer<T> + Sync> Sync for ExclusiveHandle<T, D> {}
