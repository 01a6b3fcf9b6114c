//! Densely numbered entity references as mapping keys, with an implicit
//! default for every key that hasn't been touched yet.

use crate::EntityRef;
use core::marker::PhantomData;
use core::ops::{Index, IndexMut};

/// A mapping `K -> V` for densely indexed entity references.
///
/// Unlike [`crate::PrimaryMap`], a `SecondaryMap` can't be used to
/// allocate entity references; it is used to hang extra information off
/// keys that some other `PrimaryMap` already owns (for example, a node's
/// cached type, or a basic block's CFG successor set).
///
/// The map does not track whether an entry has actually been written.
/// Instead it behaves as if every key already has a default entry.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    elems: Vec<V>,
    default: V,
    unused: PhantomData<K>,
}

impl<K, V> SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    /// Create a new empty map, using `V::default()` as the implicit value.
    pub fn new() -> Self
    where
        V: Default,
    {
        Self {
            elems: Vec::new(),
            default: Default::default(),
            unused: PhantomData,
        }
    }

    /// Create a new empty map with an explicit default value.
    ///
    /// Useful when `V` doesn't implement `Default`, or when the sensible
    /// "untouched" value isn't `Default::default()`.
    pub fn with_default(default: V) -> Self {
        Self {
            elems: Vec::new(),
            default,
            unused: PhantomData,
        }
    }

    /// Number of elements in the backing vector. Not necessarily the same
    /// as the number of keys that logically exist.
    pub fn len(&self) -> usize {
        self.elems.len()
    }

    /// Is this map completely untouched?
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }

    /// Get the element at `k`, if an entry has been materialized for it.
    pub fn get(&self, k: K) -> Option<&V> {
        self.elems.get(k.index())
    }

    /// Remove all entries, reverting every key to the default value.
    pub fn clear(&mut self) {
        self.elems.clear();
    }

    /// Grow the backing storage so that `n` entries exist, padding with
    /// clones of the default value.
    #[inline]
    pub fn resize(&mut self, n: usize) {
        self.elems.resize(n, self.default.clone());
    }

    /// Iterate over the values that have a materialized entry.
    pub fn values(&self) -> core::slice::Iter<'_, V> {
        self.elems.iter()
    }
}

/// Immutable indexing into a `SecondaryMap`. All keys are permitted;
/// untouched entries read back as the default value.
impl<K, V> Index<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    type Output = V;

    fn index(&self, k: K) -> &V {
        self.get(k).unwrap_or(&self.default)
    }
}

/// Mutable indexing into a `SecondaryMap`. The backing storage grows as
/// needed to accommodate new keys.
impl<K, V> IndexMut<K> for SecondaryMap<K, V>
where
    K: EntityRef,
    V: Clone,
{
    #[inline]
    fn index_mut(&mut self, k: K) -> &mut V {
        let i = k.index();
        if i >= self.elems.len() {
            self.resize(i + 1);
        }
        &mut self.elems[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity_ref;

    entity_ref!(E, "e");

    #[test]
    fn grows_on_write() {
        let mut m: SecondaryMap<E, u32> = SecondaryMap::new();
        assert!(m.is_empty());

        let e2 = E::new(2);
        m[e2] = 7;
        assert_eq!(m.len(), 3);
        assert_eq!(m[E::new(0)], 0);
        assert_eq!(m[e2], 7);
    }

    #[test]
    fn explicit_default() {
        let m: SecondaryMap<E, bool> = SecondaryMap::with_default(true);
        assert_eq!(m[E::new(5)], true);
    }
}
