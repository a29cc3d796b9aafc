//! Objects that can hand out handles to themselves.
//!
//! A type opts in by embedding a [`SelfWeak`] and implementing
//! [`SelfObserving`]. The observed constructors
//! ([`make_shared_observed`](crate::make_shared_observed),
//! [`SharedHandle::from_box_observed`]) point that embedded weak handle at
//! the new control block. From then on the object's own methods can call
//! [`SelfObserving::shared_from_this`] without knowing how it was allocated.
//!
//! When the last strong handle goes away the block clears the embedded link
//! in place before running the object's destructor, so the link never
//! decrements the block it lives in.

use crate::block::ControlBlock;
use crate::error::OwnershipError;
use crate::shared::SharedHandle;
use crate::weak::WeakHandle;
use std::cell::UnsafeCell;
use std::fmt;
use std::ptr::{self, NonNull};

/// Capability of obtaining shared and weak handles to `self`.
///
/// # Example
///
/// ```
/// use perceus_ptr::{make_shared_observed, SelfObserving, SelfWeak};
///
/// struct Session {
///     this: SelfWeak<Session>,
///     id: u32,
/// }
///
/// impl SelfObserving for Session {
///     fn self_weak(&self) -> &SelfWeak<Self> {
///         &self.this
///     }
/// }
///
/// let session = make_shared_observed(Session { this: SelfWeak::new(), id: 7 });
/// let again = session.shared_from_this().unwrap();
/// assert_eq!(again.id, 7);
/// assert_eq!(session.use_count(), 2);
/// ```
pub trait SelfObserving {
    /// The embedded link the observed constructors wire up.
    fn self_weak(&self) -> &SelfWeak<Self>;

    /// A new strong handle to `self`.
    ///
    /// Fails with [`OwnershipError::Unowned`] if no shared handle has taken
    /// ownership of this object, and with [`OwnershipError::Expired`] while
    /// the object is being destroyed.
    fn shared_from_this(&self) -> Result<SharedHandle<Self>, OwnershipError> {
        self.self_weak().upgrade()
    }

    /// A new weak handle to `self`; empty if the object is not owned.
    fn weak_from_this(&self) -> WeakHandle<Self> {
        self.self_weak().downgrade()
    }
}

/// The weak handle a [`SelfObserving`] object keeps to itself.
///
/// Cloning produces a fresh, unattached link: a copy of an object is a
/// different object and must be wired by its own owner.
pub struct SelfWeak<T: ?Sized> {
    weak: UnsafeCell<WeakHandle<T>>,
}

impl<T: ?Sized> SelfWeak<T> {
    #[inline]
    pub const fn new() -> Self {
        Self {
            weak: UnsafeCell::new(WeakHandle::new()),
        }
    }

    #[inline]
    fn weak(&self) -> &WeakHandle<T> {
        unsafe { &*self.weak.get() }
    }

    /// Returns true while a live shared handle owns the object.
    #[inline]
    pub fn is_attached(&self) -> bool {
        !self.weak().expired()
    }

    pub fn upgrade(&self) -> Result<SharedHandle<T>, OwnershipError> {
        let weak = self.weak();
        // Teardown clears the block but leaves the pointer behind.
        if weak.block.is_none() && weak.ptr.is_none() {
            return Err(OwnershipError::Unowned);
        }
        SharedHandle::try_from(weak)
    }

    #[inline]
    pub fn downgrade(&self) -> WeakHandle<T> {
        self.weak().clone()
    }

    /// Point the link at `block`, unless a live block already owns the object.
    pub(crate) fn attach(&self, block: NonNull<ControlBlock>, ptr: NonNull<T>) {
        if self.is_attached() {
            return;
        }
        let header = unsafe { block.as_ref() };
        header.increment_weak();
        let slot = self.weak.get();
        unsafe {
            *slot = WeakHandle::from_raw_parts(Some(block), Some(ptr));
            header.attach_observer(NonNull::new_unchecked(ptr::addr_of_mut!((*slot).block)));
        }
    }
}

impl<T: ?Sized> Default for SelfWeak<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for SelfWeak<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: ?Sized> fmt::Debug for SelfWeak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfWeak")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Allocation;
    use crate::shared::{make_shared, make_shared_observed};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Widget {
        this: SelfWeak<Widget>,
        label: &'static str,
    }

    impl Widget {
        fn new(label: &'static str) -> Self {
            Self {
                this: SelfWeak::new(),
                label,
            }
        }
    }

    impl SelfObserving for Widget {
        fn self_weak(&self) -> &SelfWeak<Self> {
            &self.this
        }
    }

    #[test]
    fn test_shared_from_this_after_make_shared() {
        let widget = make_shared_observed(Widget::new("w"));
        assert_eq!(widget.use_count(), 1);
        assert_eq!(widget.weak_count(), 1);

        let again = widget.shared_from_this();
        assert!(matches!(&again, Ok(handle) if *handle == widget));
        assert_eq!(widget.use_count(), 2);
    }

    #[test]
    fn test_shared_from_this_after_from_box() {
        let widget = SharedHandle::from_box_observed(Box::new(Widget::new("boxed")));
        assert_eq!(widget.allocation(), Some(Allocation::Indirect));
        let weak = widget.weak_from_this();
        assert_eq!(weak.lock().label, "boxed");
    }

    #[test]
    fn test_unowned_object_fails() {
        let loose = Widget::new("loose");
        assert!(matches!(
            loose.shared_from_this(),
            Err(OwnershipError::Unowned)
        ));
        assert!(loose.weak_from_this().expired());
    }

    #[test]
    fn test_plain_make_shared_does_not_wire() {
        let widget = make_shared(Widget::new("plain"));
        assert!(!widget.this.is_attached());
        assert_eq!(widget.weak_count(), 0);
        assert!(matches!(widget.shared_from_this(), Err(OwnershipError::Unowned)));

        let boxed = SharedHandle::from_box(Box::new(Widget::new("boxed")));
        assert!(matches!(boxed.shared_from_this(), Err(OwnershipError::Unowned)));
    }

    #[test]
    fn test_link_cleared_on_destruction() {
        struct Watcher {
            this: SelfWeak<Watcher>,
            during_drop: Rc<Cell<Option<bool>>>,
        }
        impl SelfObserving for Watcher {
            fn self_weak(&self) -> &SelfWeak<Self> {
                &self.this
            }
        }
        impl Drop for Watcher {
            fn drop(&mut self) {
                self.during_drop.set(Some(self.this.is_attached()));
            }
        }

        let seen = Rc::new(Cell::new(None));
        let watcher = make_shared_observed(Watcher {
            this: SelfWeak::new(),
            during_drop: seen.clone(),
        });
        let observer = watcher.downgrade();
        drop(watcher);

        assert_eq!(seen.get(), Some(false));
        assert!(observer.expired());
        assert_eq!(observer.weak_count(), 1);
    }

    #[test]
    fn test_clone_gives_fresh_link() {
        let widget = make_shared_observed(Widget::new("orig"));
        let copy = widget.this.clone();
        assert!(widget.this.is_attached());
        assert!(!copy.is_attached());
    }
}
