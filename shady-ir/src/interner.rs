//! Structural intern tables, keyed directly by the concrete things this
//! crate actually interns (a [`crate::node::Payload`], a boxed string, a
//! `Vec<NodeId>`) rather than by an externally-supplied equality context.
//!
//! `cranelift_codegen::ctxhash` keeps its `CtxEq`/`CtxHash` traits and a
//! caller-supplied `Ctx` because its e-graph intern table compares nodes
//! whose operands are union-find roots: two payloads can be equal without
//! being `==` until dereferenced through the union-find, so equality needs
//! arena-shaped context at lookup time. Nothing in `shady-ir` has that
//! problem — an operand `NodeId` already denotes final identity within one
//! arena (see `Arena`'s own doc comment) — so carrying the context
//! parameter here would just be unused generality. `InternTable` drops it
//! and compares keys with plain `Eq`, which also lets lookup/insert use
//! `hashbrown`'s safe `RawTable::get`/`insert` instead of the `unsafe`
//! `find` + manual bucket dereference `ctxhash` needs to thread a context
//! through.

use hashbrown::raw::RawTable;
use rustc_hash::FxHasher;
use std::hash::{Hash, Hasher};

fn hash_of<K: Hash>(key: &K) -> u64 {
    let mut state = FxHasher::default();
    key.hash(&mut state);
    state.finish()
}

/// A structural intern table: `K` is the thing being deduplicated (a
/// `Payload`, a boxed string, a node-id list), `V` is whatever compact id
/// the caller allocated for it.
pub(crate) struct InternTable<K, V> {
    table: RawTable<(u64, K, V)>,
}

impl<K: Eq + Hash, V: Copy> InternTable<K, V> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        InternTable { table: RawTable::with_capacity(capacity) }
    }

    pub(crate) fn get(&self, key: &K) -> Option<V> {
        let hash = hash_of(key);
        self.table.get(hash, |(_, k, _)| k == key).map(|(_, _, v)| *v)
    }

    /// Insert a key known not to be present yet (the arena always calls
    /// [`InternTable::get`] first; a duplicate `insert` would just shadow
    /// the existing bucket rather than erroring, same as a `HashMap`).
    pub(crate) fn insert(&mut self, key: K, value: V) {
        let hash = hash_of(&key);
        self.table.insert(hash, (hash, key, value), |(h, _, _)| *h);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_keys_with_colliding_low_bits_dont_alias() {
        let mut table: InternTable<String, u32> = InternTable::with_capacity(4);
        table.insert("a".to_string(), 0);
        table.insert("b".to_string(), 1);
        assert_eq!(table.get(&"a".to_string()), Some(0));
        assert_eq!(table.get(&"b".to_string()), Some(1));
        assert_eq!(table.get(&"c".to_string()), None);
    }

    #[test]
    fn reinserting_an_equal_key_shadows_the_old_value() {
        let mut table: InternTable<u32, u32> = InternTable::with_capacity(4);
        table.insert(7, 100);
        table.insert(7, 200);
        assert_eq!(table.get(&7), Some(200));
    }
}
