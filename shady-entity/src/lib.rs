//! Densely numbered entity references.
//!
//! The arena in `shady-ir` hands out a fresh, small integer to every node,
//! string, and node-list it interns. This crate gives those integers a
//! typed home: a `u32`-wrapping newtype per entity kind (`NodeId`,
//! `StringId`, ...) plus the two map flavors that index by them.

mod map;
mod primary;

pub use map::SecondaryMap;
pub use primary::PrimaryMap;

/// A type that can be used as a dense, zero-based index into a
/// [`PrimaryMap`] or [`SecondaryMap`].
///
/// Implementors are expected to be a thin wrapper around a `u32`; the
/// `entity_ref!` macro below generates a conforming implementation.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a linear index.
    fn new(index: usize) -> Self;

    /// Get the linear index of this reference.
    fn index(self) -> usize;
}

/// Declare a newtype wrapping a `u32` and implement [`EntityRef`],
/// `Display`, and `Debug` for it.
///
/// Mirrors the `entity_impl!` macro of `cranelift-entity`: every reference
/// type in `shady-ir` (`NodeId`, `StringId`, `NodeListId`) is declared this
/// way so a typo can never mix up, say, a `NodeId` and a `StringId` even
/// though both are `u32`s underneath.
#[macro_export]
macro_rules! entity_ref {
    ($ty:ident, $display_prefix:expr) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        #[cfg_attr(feature = "enable-serde", derive(serde::Serialize, serde::Deserialize))]
        pub struct $ty(u32);

        impl $crate::EntityRef for $ty {
            #[inline]
            fn new(index: usize) -> Self {
                debug_assert!(index < (u32::MAX as usize));
                $ty(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl core::fmt::Display for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                write!(f, "{}{}", $display_prefix, self.0)
            }
        }

        impl core::fmt::Debug for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                core::fmt::Display::fmt(self, f)
            }
        }
    };
}
