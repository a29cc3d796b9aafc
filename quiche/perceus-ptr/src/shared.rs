//! Shared ownership through explicit control blocks.

use crate::block::{Allocation, ControlBlock, DirectBlock, IndirectBlock};
use crate::destroy::{DefaultDestroyer, Destroyer};
use crate::error::{empty_deref, OwnershipError};
use crate::exclusive::ExclusiveHandle;
use crate::observe::SelfObserving;
use crate::weak::WeakHandle;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::mem::{self, ManuallyDrop};
use std::ops::Deref;
use std::ptr::{self, NonNull};

/// A reference-counted owner of a heap object.
///
/// A handle is a pair of a control block (which owns the object and counts
/// references) and the pointer it exposes. Cloning shares the block and
/// bumps the strong count; dropping the last clone destroys the object.
/// The exposed pointer is normally the owned object itself, but
/// [`SharedHandle::map`] can expose a part of it instead while keeping the
/// whole object alive.
///
/// Prefer [`make_shared`], which puts object and counts in one allocation.
/// [`SharedHandle::from_box`] keeps the object where it already is and
/// allocates a separate block for the counts.
///
/// # Example
///
/// ```
/// use perceus_ptr::make_shared;
///
/// let first = make_shared(vec![1, 2, 3]);
/// let second = first.clone();
///
/// assert_eq!(first.use_count(), 2);
/// assert_eq!(*second, vec![1, 2, 3]);
/// ```
pub struct SharedHandle<T: ?Sized> {
    block: Option<NonNull<ControlBlock>>,
    ptr: Option<NonNull<T>>,
    _owns: PhantomData<T>,
}

/// Allocate `value` and its control block together.
///
/// The returned handle has a use count of 1.
///
/// This does not wire a [`SelfObserving`] object's self-link, so its
/// `shared_from_this` keeps failing with [`OwnershipError::Unowned`]. Use
/// [`make_shared_observed`] for those types.
pub fn make_shared<T>(value: T) -> SharedHandle<T> {
    let (block, ptr) = DirectBlock::allocate(value);
    unsafe { SharedHandle::from_raw_parts(Some(block), Some(ptr)) }
}

/// Like [`make_shared`], and wires the object's self-observation link to
/// the new block.
pub fn make_shared_observed<T: SelfObserving>(value: T) -> SharedHandle<T> {
    make_shared(value).observed()
}

impl<T> SharedHandle<T> {
    /// Same as [`make_shared`].
    #[inline]
    pub fn new(value: T) -> Self {
        make_shared(value)
    }

    /// Get mutable access, cloning the value first if it is shared.
    ///
    /// When other strong or weak handles exist, this handle is moved to a
    /// fresh copy of the value and the others keep the original. A
    /// self-observing object's own link does not count as another handle,
    /// but a copy made here is not wired to its new block.
    #[track_caller]
    pub fn make_mut(&mut self) -> &mut T
    where
        T: Clone,
    {
        if !self.is_unique() {
            *self = make_shared((**self).clone());
        }
        match self.ptr {
            Some(ptr) => unsafe { &mut *ptr.as_ptr() },
            None => empty_deref("SharedHandle"),
        }
    }
}

impl<T: ?Sized> SharedHandle<T> {
    /// An empty handle.
    #[inline]
    pub const fn null() -> Self {
        Self {
            block: None,
            ptr: None,
            _owns: PhantomData,
        }
    }

    /// Share a boxed value, allocating a separate control block for it.
    ///
    /// Like [`make_shared`], this leaves a [`SelfObserving`] object unwired;
    /// see [`SharedHandle::from_box_observed`].
    #[inline]
    pub fn from_box(value: Box<T>) -> Self {
        Self::from_exclusive(ExclusiveHandle::from_box(value))
    }

    /// Take shared ownership of a raw pointer.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or come from `Box::into_raw`, and nothing else may
    /// own it.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self::from_exclusive(unsafe { ExclusiveHandle::<T, DefaultDestroyer>::from_raw(ptr) })
    }

    /// Take shared ownership of a raw pointer with a custom destroyer.
    ///
    /// The destroyer runs once, when the last strong handle goes away.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point at a live object that `destroyer` can
    /// release, and nothing else may own it.
    #[inline]
    pub unsafe fn from_raw_with<D>(ptr: *mut T, destroyer: D) -> Self
    where
        D: Destroyer<T> + 'static,
    {
        Self::from_exclusive(unsafe { ExclusiveHandle::from_raw_with(ptr, destroyer) })
    }

    fn from_exclusive<D>(object: ExclusiveHandle<T, D>) -> Self
    where
        D: Destroyer<T> + 'static,
    {
        let Some(ptr) = object.as_ptr() else {
            return Self::null();
        };
        let block = IndirectBlock::allocate(object);
        unsafe { Self::from_raw_parts(Some(block), Some(ptr)) }
    }

    /// Adopt one strong reference that the caller already counted.
    ///
    /// # Safety
    ///
    /// If `block` is set, the caller must own one strong reference to it
    /// and `ptr` must stay valid for as long as that block's object lives.
    #[inline]
    pub(crate) unsafe fn from_raw_parts(
        block: Option<NonNull<ControlBlock>>,
        ptr: Option<NonNull<T>>,
    ) -> Self {
        Self {
            block,
            ptr,
            _owns: PhantomData,
        }
    }

    /// Share `other`'s control block while exposing `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for as long as `other`'s object is alive.
    pub unsafe fn alias<U: ?Sized>(other: &SharedHandle<U>, ptr: NonNull<T>) -> Self {
        if let Some(block) = other.block {
            unsafe { block.as_ref() }.increment_strong();
        }
        unsafe { Self::from_raw_parts(other.block, Some(ptr)) }
    }

    /// Expose a part of the owned object, keeping the whole object alive.
    ///
    /// The strong reference held by `this` moves to the returned handle.
    /// Also converts to trait objects: `SharedHandle::map(h, |v| v as &dyn Trait)`.
    ///
    /// # Example
    ///
    /// ```
    /// use perceus_ptr::{make_shared, SharedHandle};
    ///
    /// struct Pair { left: String, right: String }
    ///
    /// let pair = make_shared(Pair { left: "l".into(), right: "r".into() });
    /// let right = SharedHandle::map(pair.clone(), |p| &p.right);
    /// drop(pair);
    /// assert_eq!(&*right, "r");
    /// assert_eq!(right.use_count(), 1);
    /// ```
    pub fn map<U: ?Sized>(this: Self, f: impl FnOnce(&T) -> &U) -> SharedHandle<U>
    where
        T: 'static,
    {
        let this = ManuallyDrop::new(this);
        let ptr = this.get().map(|value| NonNull::from(f(value)));
        unsafe { SharedHandle::from_raw_parts(this.block, ptr) }
    }

    /// Release ownership and become empty.
    #[inline]
    pub fn reset(&mut self) {
        self.release();
    }

    /// Release ownership, then share `value` as [`SharedHandle::from_box`] does.
    pub fn reset_to(&mut self, value: Box<T>) {
        self.release();
        *self = Self::from_box(value);
    }

    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }

    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.ptr.map(|ptr| unsafe { &*ptr.as_ptr() })
    }

    #[inline]
    pub fn as_ptr(&self) -> Option<NonNull<T>> {
        self.ptr
    }

    #[inline]
    pub fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Number of strong handles sharing this block, 0 when empty.
    #[inline]
    pub fn use_count(&self) -> usize {
        self.block
            .map_or(0, |block| unsafe { block.as_ref() }.strong_count())
    }

    /// Number of weak handles observing this block, 0 when empty.
    ///
    /// A self-observing object's internal link counts as one.
    #[inline]
    pub fn weak_count(&self) -> usize {
        self.block
            .map_or(0, |block| unsafe { block.as_ref() }.weak_count())
    }

    /// How the owned object was allocated, or `None` when empty.
    #[inline]
    pub fn allocation(&self) -> Option<Allocation> {
        self.block
            .map(|block| unsafe { block.as_ref() }.allocation())
    }

    /// Returns true if no other strong or weak handle shares the block.
    ///
    /// A self-observing object's link to itself is not counted.
    pub fn is_unique(&self) -> bool {
        self.block
            .is_some_and(|block| unsafe { block.as_ref() }.is_sole_owner(block))
    }

    /// Mutable access when this is the only handle of any kind.
    ///
    /// Returns `None` if the object is shared or observed.
    pub fn try_get_mut(&mut self) -> Option<&mut T> {
        if self.is_unique() {
            self.ptr.map(|ptr| unsafe { &mut *ptr.as_ptr() })
        } else {
            None
        }
    }

    /// Create a weak handle observing the same object.
    #[inline]
    pub fn downgrade(&self) -> WeakHandle<T> {
        WeakHandle::from(self)
    }

    /// Same block and same exposed pointer.
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.block == other.block && addr(this.ptr) == addr(other.ptr)
    }

    #[inline]
    pub(crate) fn block(&self) -> Option<NonNull<ControlBlock>> {
        self.block
    }

    fn release(&mut self) {
        self.ptr = None;
        if let Some(block) = self.block.take() {
            unsafe {
                if ControlBlock::decrement_strong(block) == 0 {
                    ControlBlock::free(block);
                }
            }
        }
    }
}

impl<T: ?Sized + SelfObserving> SharedHandle<T> {
    /// Like [`SharedHandle::from_box`], and wires the object's
    /// self-observation link to the new block.
    pub fn from_box_observed(value: Box<T>) -> Self {
        Self::from_box(value).observed()
    }

    /// Like [`SharedHandle::reset_to`] for self-observing objects.
    pub fn reset_to_observed(&mut self, value: Box<T>) {
        self.release();
        *self = Self::from_box_observed(value);
    }

    fn observed(self) -> Self {
        if let (Some(block), Some(ptr)) = (self.block, self.ptr) {
            unsafe { ptr.as_ref() }.self_weak().attach(block, ptr);
        }
        self
    }
}

fn addr<T: ?Sized>(ptr: Option<NonNull<T>>) -> *const () {
    ptr.map_or(ptr::null(), |ptr| ptr.cast::<()>().as_ptr().cast_const())
}

impl<T: ?Sized> Clone for SharedHandle<T> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            unsafe { block.as_ref() }.increment_strong();
        }
        unsafe { Self::from_raw_parts(self.block, self.ptr) }
    }

    fn clone_from(&mut self, source: &Self) {
        if !Self::ptr_eq(self, source) {
            *self = source.clone();
        }
    }
}

impl<T: ?Sized> Drop for SharedHandle<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T: ?Sized> Default for SharedHandle<T> {
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized> TryFrom<&WeakHandle<T>> for SharedHandle<T> {
    type Error = OwnershipError;

    /// Promote a weak handle, failing if its object is already gone.
    fn try_from(weak: &WeakHandle<T>) -> Result<Self, Self::Error> {
        if weak.expired() {
            return Err(OwnershipError::Expired);
        }
        Ok(weak.lock())
    }
}

impl<T: ?Sized> From<Box<T>> for SharedHandle<T> {
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized, D: Destroyer<T> + 'static> From<ExclusiveHandle<T, D>> for SharedHandle<T> {
    fn from(object: ExclusiveHandle<T, D>) -> Self {
        Self::from_exclusive(object)
    }
}

impl<T: ?Sized> Deref for SharedHandle<T> {
    type Target = T;

    #[inline]
    #[track_caller]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => empty_deref("SharedHandle"),
        }
    }
}

impl<T: ?Sized> PartialEq for SharedHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T: ?Sized> Eq for SharedHandle<T> {}

impl<T: ?Sized> Hash for SharedHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.block.hash(state);
        addr(self.ptr).hash(state);
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedHandle")
            .field("value", &self.get())
            .field("use_count", &self.use_count())
            .finish()
    }
}

impl<T: ?Sized> fmt::Pointer for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&addr(self.ptr), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::SelfWeak;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn test_make_shared_starts_unique() {
        let handle = make_shared(42);
        assert_eq!(*handle, 42);
        assert_eq!(handle.use_count(), 1);
        assert_eq!(handle.weak_count(), 0);
        assert_eq!(handle.allocation(), Some(Allocation::Direct));
    }

    #[test]
    fn test_clone_and_drop_adjust_count() {
        let first = make_shared(String::from("hi"));
        let second = first.clone();
        assert_eq!(first.use_count(), 2);
        assert_eq!(second.use_count(), 2);
        assert_eq!(first, second);

        drop(second);
        assert_eq!(first.use_count(), 1);
    }

    #[test]
    fn test_last_drop_destroys_once() {
        let drops = Rc::new(Cell::new(0));
        let first = SharedHandle::from_box(Box::new(DropCounter(drops.clone())));
        let second = first.clone();
        drop(first);
        assert_eq!(drops.get(), 0);
        drop(second);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_from_box_is_indirect() {
        let handle = SharedHandle::from_box(Box::new(1u8));
        assert_eq!(handle.allocation(), Some(Allocation::Indirect));
        assert_eq!(handle.use_count(), 1);
    }

    #[test]
    fn test_null_handle() {
        let handle: SharedHandle<i32> = SharedHandle::default();
        assert!(handle.is_null());
        assert_eq!(handle.use_count(), 0);
        assert_eq!(handle.get(), None);
        assert_eq!(handle.allocation(), None);
    }

    #[test]
    fn test_move_leaves_source_empty() {
        let mut source = make_shared(5);
        let target = mem::take(&mut source);
        assert!(source.is_null());
        assert_eq!(target.use_count(), 1);
    }

    #[test]
    fn test_reset_to_replaces_object() {
        let drops = Rc::new(Cell::new(0));
        let mut handle = make_shared(DropCounter(drops.clone()));
        handle.reset_to(Box::new(DropCounter(drops.clone())));
        assert_eq!(drops.get(), 1);
        assert_eq!(handle.allocation(), Some(Allocation::Indirect));
        handle.reset();
        assert_eq!(drops.get(), 2);
        assert!(handle.is_null());
    }

    #[test]
    fn test_clone_from_self_is_noop() {
        let mut handle = make_shared(3);
        let same = handle.clone();
        handle.clone_from(&same);
        assert_eq!(handle.use_count(), 2);

        let other = make_shared(4);
        handle.clone_from(&other);
        assert_eq!(*handle, 4);
        assert_eq!(same.use_count(), 1);
        assert_eq!(other.use_count(), 2);
    }

    #[test]
    fn test_map_keeps_owner_alive() {
        let drops = Rc::new(Cell::new(0));
        let owner = make_shared((7, DropCounter(drops.clone())));
        let part = SharedHandle::map(owner.clone(), |pair| &pair.0);
        assert_eq!(owner.use_count(), 2);
        assert_eq!(part.allocation(), Some(Allocation::Direct));

        drop(owner);
        assert_eq!(drops.get(), 0);
        assert_eq!(*part, 7);
        drop(part);
        assert_eq!(drops.get(), 1);
    }

    #[test]
    fn test_map_to_trait_object() {
        let handle = make_shared(12u32);
        let shown: SharedHandle<dyn fmt::Display> = SharedHandle::map(handle, |v| v as &dyn fmt::Display);
        assert_eq!(shown.to_string(), "12");
    }

    #[test]
    fn test_try_get_mut_requires_unique() {
        let mut handle = make_shared(vec![1]);
        if let Some(values) = handle.try_get_mut() {
            values.push(2);
        }
        assert_eq!(*handle, vec![1, 2]);

        let weak = handle.downgrade();
        assert!(handle.try_get_mut().is_none());
        drop(weak);

        let _other = handle.clone();
        assert!(handle.try_get_mut().is_none());
    }

    #[test]
    fn test_make_mut_clones_when_shared() {
        let mut first = make_shared(vec![1, 2, 3]);
        let second = first.clone();
        first.make_mut().push(4);
        assert_eq!(*first, vec![1, 2, 3, 4]);
        assert_eq!(*second, vec![1, 2, 3]);
        assert_eq!(second.use_count(), 1);
    }

    #[test]
    fn test_custom_destroyer_runs_on_last_release() {
        let calls = Rc::new(Cell::new(0));
        let seen = calls.clone();
        let raw = Box::into_raw(Box::new(9));
        let handle = unsafe {
            SharedHandle::from_raw_with(raw, move |ptr: NonNull<i32>| {
                seen.set(seen.get() + 1);
                drop(unsafe { Box::from_raw(ptr.as_ptr()) });
            })
        };
        let copy = handle.clone();
        drop(handle);
        assert_eq!(calls.get(), 0);
        drop(copy);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_from_exclusive_null_is_empty() {
        let empty: ExclusiveHandle<i32> = ExclusiveHandle::null();
        let shared = SharedHandle::from(empty);
        assert!(shared.is_null());
        assert_eq!(shared.use_count(), 0);
    }

    #[derive(Clone)]
    struct Node {
        this: SelfWeak<Node>,
        value: i32,
    }

    impl SelfObserving for Node {
        fn self_weak(&self) -> &SelfWeak<Self> {
            &self.this
        }
    }

    fn observed_node(value: i32) -> SharedHandle<Node> {
        make_shared_observed(Node {
            this: SelfWeak::new(),
            value,
        })
    }

    #[test]
    fn test_self_link_does_not_break_uniqueness() {
        let mut node = observed_node(1);
        assert_eq!(node.weak_count(), 1);
        assert!(node.is_unique());

        if let Some(inner) = node.try_get_mut() {
            inner.value = 2;
        }
        assert_eq!(node.value, 2);

        let weak = node.downgrade();
        assert!(!node.is_unique());
        assert!(node.try_get_mut().is_none());
        drop(weak);
        assert!(node.is_unique());

        let other = node.clone();
        assert!(!node.is_unique());
        drop(other);
    }

    #[test]
    fn test_make_mut_on_sole_observed_owner_stays_in_place() {
        let mut node = observed_node(1);
        let before = node.as_ptr();

        node.make_mut().value = 2;
        assert_eq!(node.as_ptr(), before);
        assert_eq!(node.value, 2);
        assert!(matches!(node.shared_from_this(), Ok(again) if again == node));
    }

    #[test]
    fn test_weak_count_inside_destructor_excludes_guard() {
        struct Watcher {
            me: RefCell<WeakHandle<Watcher>>,
            seen: Rc<Cell<Option<usize>>>,
        }
        impl Drop for Watcher {
            fn drop(&mut self) {
                self.seen.set(Some(self.me.borrow().weak_count()));
            }
        }

        let seen = Rc::new(Cell::new(None));
        let watcher = make_shared(Watcher {
            me: RefCell::new(WeakHandle::new()),
            seen: seen.clone(),
        });
        *watcher.me.borrow_mut() = watcher.downgrade();
        let outside = watcher.downgrade();
        assert_eq!(watcher.weak_count(), 2);

        drop(watcher);
        assert_eq!(seen.get(), Some(2));
        assert_eq!(outside.weak_count(), 1);
    }

    #[test]
    fn test_identity_equality() {
        let a = make_shared(1);
        let b = make_shared(1);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
        assert!(SharedHandle::ptr_eq(&a, &a.clone()));
    }
}
