//! Two-slot storage that costs nothing for stateless components.
//!
//! A `CompressedPair<A, B>` stores two values side by side. When either
//! component is a zero-sized type (a unit struct, a non-capturing closure,
//! `DefaultDestroyer`) it occupies no space at all, so the pair is exactly
//! as large as its stateful half. [`ExclusiveHandle`](crate::ExclusiveHandle)
//! keeps its pointer and destroyer in one of these.
//!
//! The layout is decided at compile time from the component sizes and is
//! reported by [`CompressedPair::LAYOUT`]. Behaviour is the same for every
//! layout; only the storage differs.

use std::mem::{self, size_of};

/// Which components of a pair take up storage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PairLayout {
    /// Neither component has state; the pair is zero-sized.
    BothEmpty,
    /// Only the second component has state.
    FirstEmpty,
    /// Only the first component has state.
    SecondEmpty,
    /// Both components are stored.
    NoneEmpty,
}

impl PairLayout {
    /// Compute the layout a pair of `A` and `B` gets.
    pub const fn of<A, B>() -> Self {
        match (size_of::<A>() == 0, size_of::<B>() == 0) {
            (true, true) => PairLayout::BothEmpty,
            (true, false) => PairLayout::FirstEmpty,
            (false, true) => PairLayout::SecondEmpty,
            (false, false) => PairLayout::NoneEmpty,
        }
    }

    /// Returns true if at least one component is elided.
    #[inline]
    pub const fn is_compressed(self) -> bool {
        !matches!(self, PairLayout::NoneEmpty)
    }
}

/// A pair of values where stateless components take no space.
///
/// # Example
///
/// ```
/// use perceus_ptr::{CompressedPair, PairLayout};
///
/// struct Tag;
///
/// let pair = CompressedPair::new(7u64, Tag);
/// assert_eq!(*pair.first(), 7);
/// assert_eq!(std::mem::size_of_val(&pair), 8);
/// assert_eq!(CompressedPair::<u64, Tag>::LAYOUT, PairLayout::SecondEmpty);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CompressedPair<A, B> {
    first: A,
    second: B,
}

impl<A, B> CompressedPair<A, B> {
    /// Storage layout of this pair type.
    pub const LAYOUT: PairLayout = PairLayout::of::<A, B>();

    #[inline]
    pub const fn new(first: A, second: B) -> Self {
        Self { first, second }
    }

    #[inline]
    pub const fn first(&self) -> &A {
        &self.first
    }

    #[inline]
    pub fn first_mut(&mut self) -> &mut A {
        &mut self.first
    }

    #[inline]
    pub const fn second(&self) -> &B {
        &self.second
    }

    #[inline]
    pub fn second_mut(&mut self) -> &mut B {
        &mut self.second
    }

    /// Borrow both components mutably at once.
    #[inline]
    pub fn as_mut_parts(&mut self) -> (&mut A, &mut B) {
        (&mut self.first, &mut self.second)
    }

    #[inline]
    pub fn into_parts(self) -> (A, B) {
        (self.first, self.second)
    }

    /// Exchange both components with another pair.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(self, other);
    }
}

impl<A, B> From<(A, B)> for CompressedPair<A, B> {
    fn from((first, second): (A, B)) -> Self {
        Self::new(first, second)
    }
}
