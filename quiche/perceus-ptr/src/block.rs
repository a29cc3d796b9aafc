//! Control blocks: reference counts plus the strategy that destroys the object.
//!
//! Every shared or weak handle points at a [`ControlBlock`] header. The
//! header is the first field of one of two concrete blocks:
//!
//! - [`IndirectBlock`] owns a separately allocated object through an
//!   [`ExclusiveHandle`], so destroying the object runs that handle's
//!   destroyer. Two allocations: the object and the block.
//! - [`DirectBlock`] embeds the object in the block's own storage. The
//!   object is written in place after the header, destroyed with
//!   `drop_in_place`, and its memory goes away with the block. One
//!   allocation.
//!
//! The header tracks `strong` (owning handles) and `total` (owning plus
//! observing handles). A block moves through three states:
//!
//! ```text
//! Live (strong > 0) --strong -> 0--> ObjectDestroyed (strong = 0) --total -> 0--> Freed
//! ```
//!
//! The object is destroyed when `strong` reaches zero even if weak handles
//! remain; the block itself stays until `total` reaches zero so those weak
//! handles can still observe that the object is gone. Callers free the
//! block with [`ControlBlock::free`] once a decrement reports a total of 0.

use crate::count::Count;
use crate::destroy::Destroyer;
use crate::exclusive::ExclusiveHandle;
use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::cell::{Cell, UnsafeCell};
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};

/// How a control block holds its object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Allocation {
    /// The object has its own allocation; the block points at it.
    Indirect,
    /// The object lives inside the block's allocation.
    Direct,
}

/// The block pointer stored in a weak handle.
pub(crate) type BlockLink = Option<NonNull<ControlBlock>>;

/// Type-erased header shared by both block kinds.
#[repr(C)]
pub(crate) struct ControlBlock {
    strong: Count,
    total: Count,
    allocation: Allocation,
    /// Block pointer inside a self-observing object's internal weak handle.
    observer: Cell<Option<NonNull<BlockLink>>>,
    /// Set while the object's destructor runs and the guard reference is held.
    destroying: Cell<bool>,
    destroy_object: unsafe fn(NonNull<ControlBlock>),
    free_block: unsafe fn(NonNull<ControlBlock>),
}

impl ControlBlock {
    fn new(
        allocation: Allocation,
        destroy_object: unsafe fn(NonNull<ControlBlock>),
        free_block: unsafe fn(NonNull<ControlBlock>),
    ) -> Self {
        Self {
            strong: Count::new(1),
            total: Count::new(1),
            allocation,
            observer: Cell::new(None),
            destroying: Cell::new(false),
            destroy_object,
            free_block,
        }
    }

    #[inline]
    pub(crate) fn strong_count(&self) -> usize {
        self.strong.get()
    }

    #[inline]
    pub(crate) fn total_count(&self) -> usize {
        self.total.get()
    }

    /// Observing references, leaving out the teardown guard.
    #[inline]
    pub(crate) fn weak_count(&self) -> usize {
        let guard = usize::from(self.destroying.get());
        self.total_count() - self.strong_count() - guard
    }

    /// One strong reference and no observer except the object's own self-link.
    pub(crate) fn is_sole_owner(&self, this: NonNull<Self>) -> bool {
        match (self.strong.get(), self.total.get()) {
            (1, 1) => true,
            (1, 2) => self.owns_observer(this),
            _ => false,
        }
    }

    fn owns_observer(&self, this: NonNull<Self>) -> bool {
        self.observer
            .get()
            .is_some_and(|link| unsafe { *link.as_ptr() } == Some(this))
    }

    #[inline]
    pub(crate) fn allocation(&self) -> Allocation {
        self.allocation
    }

    #[inline]
    pub(crate) fn increment_strong(&self) {
        self.strong.increment();
        self.total.increment();
    }

    #[inline]
    pub(crate) fn increment_weak(&self) {
        self.total.increment();
    }

    /// Record where the owned object keeps its internal weak handle.
    ///
    /// The weak reference behind `link` must already be counted in `total`.
    /// Teardown clears it in place instead of going through
    /// [`ControlBlock::decrement_weak`].
    pub(crate) fn attach_observer(&self, link: NonNull<BlockLink>) {
        self.observer.set(Some(link));
    }

    fn detach_observer(&self, this: NonNull<Self>) {
        let Some(link) = self.observer.take() else {
            return;
        };
        let link = link.as_ptr();
        // The link is only ours if it still names this block.
        unsafe {
            if *link == Some(this) {
                *link = None;
                self.total.decrement();
            }
        }
    }

    /// Drop one strong reference, destroying the object when it was the last.
    ///
    /// Returns the remaining total count.
    ///
    /// # Safety
    ///
    /// `this` must point at a live block and the caller must give up one
    /// strong reference it owns.
    pub(crate) unsafe fn decrement_strong(this: NonNull<Self>) -> usize {
        let block = unsafe { this.as_ref() };
        block.total.decrement();
        if block.strong.decrement() > 0 {
            return block.total.get();
        }

        // Hold an extra total reference while the destructor runs so handles
        // dropped from inside it cannot free the block.
        block.total.increment();
        block.destroying.set(true);
        block.detach_observer(this);
        log::trace!(
            "destroying object of {:?} control block {:p}",
            block.allocation,
            this
        );
        unsafe { (block.destroy_object)(this) };
        block.destroying.set(false);
        block.total.decrement()
    }

    /// Drop one weak reference, returning the remaining total count.
    ///
    /// # Safety
    ///
    /// `this` must point at a live block and the caller must give up one
    /// weak reference it owns.
    #[inline]
    pub(crate) unsafe fn decrement_weak(this: NonNull<Self>) -> usize {
        unsafe { this.as_ref() }.total.decrement()
    }

    /// Release the block's memory.
    ///
    /// # Safety
    ///
    /// The total count must be zero and `this` must not be used again.
    pub(crate) unsafe fn free(this: NonNull<Self>) {
        let block = unsafe { this.as_ref() };
        debug_assert_eq!(block.total.get(), 0, "freeing a referenced block");
        log::trace!("freeing {:?} control block {:p}", block.allocation, this);
        let free_block = block.free_block;
        unsafe { free_block(this) };
    }
}

/// Block for an object allocated elsewhere.
#[repr(C)]
pub(crate) struct IndirectBlock<T: ?Sized, D: Destroyer<T>> {
    header: ControlBlock,
    object: UnsafeCell<ExclusiveHandle<T, D>>,
}

impl<T: ?Sized, D: Destroyer<T>> IndirectBlock<T, D> {
    /// Put `object` behind a new block with one strong reference.
    pub(crate) fn allocate(object: ExclusiveHandle<T, D>) -> NonNull<ControlBlock> {
        let block = Box::new(Self {
            header: ControlBlock::new(Allocation::Indirect, Self::destroy_object, Self::free_block),
            object: UnsafeCell::new(object),
        });
        let block = NonNull::from(Box::leak(block)).cast::<ControlBlock>();
        log::trace!("allocated indirect control block {:p}", block);
        block
    }

    unsafe fn destroy_object(this: NonNull<ControlBlock>) {
        let block = this.cast::<Self>().as_ptr();
        unsafe { (*(*block).object.get()).reset() };
    }

    unsafe fn free_block(this: NonNull<ControlBlock>) {
        drop(unsafe { Box::from_raw(this.cast::<Self>().as_ptr()) });
    }
}

/// Block with the object stored inline after the header.
#[repr(C)]
pub(crate) struct DirectBlock<T> {
    header: ControlBlock,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> DirectBlock<T> {
    /// Allocate a block and construct `value` inside it.
    ///
    /// Returns the block and the address of the embedded object.
    pub(crate) fn allocate(value: T) -> (NonNull<ControlBlock>, NonNull<T>) {
        let layout = Layout::new::<Self>();
        let raw = unsafe { alloc(layout) }.cast::<Self>();
        let Some(block) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };

        let object = unsafe {
            ptr::addr_of_mut!((*raw).header).write(ControlBlock::new(
                Allocation::Direct,
                Self::destroy_object,
                Self::free_block,
            ));
            let object = Self::value_ptr(block);
            object.as_ptr().write(value);
            object
        };
        log::trace!(
            "allocated direct control block {:p} ({} bytes)",
            block,
            layout.size()
        );
        (block.cast(), object)
    }

    /// # Safety
    ///
    /// `block` must point at an allocation laid out as `Self`.
    unsafe fn value_ptr(block: NonNull<Self>) -> NonNull<T> {
        let cell = unsafe { ptr::addr_of!((*block.as_ptr()).value) };
        unsafe { NonNull::new_unchecked(UnsafeCell::raw_get(cell).cast::<T>()) }
    }

    unsafe fn destroy_object(this: NonNull<ControlBlock>) {
        unsafe { ptr::drop_in_place(Self::value_ptr(this.cast()).as_ptr()) };
    }

    unsafe fn free_block(this: NonNull<ControlBlock>) {
        unsafe { dealloc(this.as_ptr().cast::<u8>(), Layout::new::<Self>()) };
    }
}
