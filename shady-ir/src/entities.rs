//! Arena-relative entity references.
//!
//! Mirrors `cranelift_codegen::ir::entities`: every handle into the arena
//! is a `u32`-wrapping newtype rather than a raw index or a pointer, so
//! the type checker catches a `StringId` passed where a `NodeId` was
//! expected.

use shady_entity::entity_ref;

entity_ref!(NodeId, "%");
entity_ref!(StringId, "$");
entity_ref!(NodeListId, "#");

/// A node reference tagged with the arena generation it was created in.
///
/// Spec.md §3 calls dereferencing a node after its owning arena has been
/// dropped a programming error; in debug builds we catch the common case
/// (a `Node` from a stale, already-replaced arena pass) by comparing
/// generations before dereferencing. Release builds skip the check, same
/// as `cranelift_codegen`'s own `debug_assert!`-gated consistency checks.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node {
    pub(crate) id: NodeId,
    pub(crate) generation: u32,
}

impl Node {
    pub(crate) fn new(id: NodeId, generation: u32) -> Self {
        Node { id, generation }
    }

    pub fn id(self) -> NodeId {
        self.id
    }

    /// The arena generation this handle was created in. Exposed for
    /// `shady-analysis`'s verifier, which checks every declaration in a
    /// `Module` was actually produced by the arena it claims to belong to.
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl core::fmt::Debug for Node {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        write!(f, "{}@gen{}", self.id, self.generation)
    }
}
