//! # Perceus-Ptr
//!
//! Ownership handles over heap objects with explicit, inspectable
//! control blocks: shared ownership, weak observation and exclusive
//! ownership, without a garbage collector.
//!
//! ## Features
//!
//! - **`SharedHandle`**: reference-counted owner; the object is destroyed
//!   when the last strong handle goes away
//! - **`WeakHandle`**: observes without owning; reports expiry and promotes
//!   to a strong handle while the object lives
//! - **Two allocation strategies**: `make_shared` stores object and counts
//!   in one allocation, `SharedHandle::from_box` keeps the object where it
//!   is and adds a separate control block
//! - **`SelfObserving`**: objects that hand out handles to themselves
//! - **`ExclusiveHandle`**: single owner with a pluggable destroyer, as
//!   small as a raw pointer when the destroyer is stateless
//! - **`CompressedPair`**: two-slot storage that elides stateless halves
//!
//! Counters are plain integers. Handles are `!Send` and `!Sync`, and
//! cycles of strong handles leak: break them with weak handles.
//!
//! ## Quick Start
//!
//! ```rust
//! use perceus_ptr::{make_shared, SharedHandle, WeakHandle};
//!
//! let parent = make_shared(String::from("parent"));
//! let observer: WeakHandle<String> = parent.downgrade();
//!
//! let promoted = SharedHandle::try_from(&observer).unwrap();
//! assert_eq!(parent.use_count(), 2);
//!
//! drop(promoted);
//! drop(parent); // Object destroyed here
//! assert!(observer.expired());
//! ```
//!
//! Control block lifecycle events are emitted through the `log` crate at
//! `trace` level.

mod block;
mod count;
mod destroy;
mod error;
mod exclusive;
mod observe;
mod pair;
mod shared;
mod weak;

pub use block::Allocation;
pub use destroy::{DefaultDestroyer, Destroyer};
pub use error::OwnershipError;
pub use exclusive::{ExclusiveArray, ExclusiveHandle};
pub use observe::{SelfObserving, SelfWeak};
pub use pair::{CompressedPair, PairLayout};
pub use shared::{make_shared, make_shared_observed, SharedHandle};
pub use weak::WeakHandle;
