//! Error type for ownership operations.

use thiserror::Error;

/// Failure of an ownership operation.
///
/// Only promotions can fail. Everything else either succeeds or is a
/// caller precondition (see [`SharedHandle`](crate::SharedHandle)'s `Deref`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum OwnershipError {
    /// The weak handle's object has already been destroyed.
    #[error("weak handle expired: the observed object has already been destroyed")]
    Expired,
    /// The object has never been owned by a shared handle.
    #[error("object is not owned by any shared handle")]
    Unowned,
}

/// Panic for dereferencing an empty handle.
#[cold]
#[track_caller]
#[allow(clippy::panic)]
pub(crate) fn empty_deref(kind: &'static str) -> ! {
    panic!("dereferenced an empty {kind}")
}
