//! The arena: owner of every node and string in a compilation unit, and
//! the structural interner that makes hash-consing possible.
//!
//! Grounded on `cranelift_codegen::ctxhash` for the interning primitive
//! (see `crate::interner`, adapted per that module's doc comment) and on
//! spec.md §4.1.

use crate::address_space::AddressSpaceTable;
use crate::entities::{Node, NodeId, NodeListId, StringId};
use crate::interner::InternTable;
use crate::node::{NodeClass, NodeData, Payload};
use log::trace;
use shady_entity::PrimaryMap;
use std::cell::RefCell;

/// Target-shaped knobs spec.md §6 says the core reads, scoped to the
/// subset that changes typing/validation behavior rather than pure emit
/// choices (the rest lives on `shady::CompilerConfig`).
#[derive(Clone, Debug)]
pub struct ArenaConfig {
    /// Validate every structural/nominal node against [`crate::check`]
    /// as it's interned. Off during the earliest bind/normalize passes
    /// where `Unbound` and `UntypedNumber` nodes are still legal.
    pub check_types: bool,
    /// Permit constant folding during `intern_node` (scenario 6 in
    /// spec.md §8: `reinterpret(reinterpret(x))` folds away).
    pub allow_fold: bool,
    /// SIMT mode: whether non-uniform ("varying") values are permitted at
    /// all. Off for arenas modeling a single-threaded scalar target.
    pub is_simt: bool,
    pub address_spaces: AddressSpaceTable,
    /// Bit width used to represent a subgroup active-invocation mask.
    pub subgroup_mask_width: u32,
    /// Pointer width in bytes for the lowering target, consulted by
    /// `lower_lea`/`lower_decay_ptrs`.
    pub target_ptr_width_bytes: u8,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        ArenaConfig {
            check_types: true,
            allow_fold: true,
            is_simt: true,
            address_spaces: AddressSpaceTable::default(),
            subgroup_mask_width: 64,
            target_ptr_width_bytes: 8,
        }
    }
}

/// Errors raised while interning or mutating a node. Per spec.md §4.1
/// these are always fatal for the current compilation; the arena does
/// not attempt to recover from them.
#[derive(Debug, thiserror::Error)]
pub enum ArenaError {
    #[error("node {0} has already had its body set once")]
    BodyAlreadySet(NodeId),
    #[error("node class {0:?} cannot be interned structurally")]
    NotStructural(NodeClass),
}

/// Owner of every node and interned string produced while lowering a
/// single [`crate::module::Module`] (spec.md §3 "Arena ownership",
/// §5 "Resource discipline": each pass allocates a fresh `Arena`, and the
/// previous one is dropped once its `Module` is no longer needed).
pub struct Arena {
    config: ArenaConfig,
    generation: u32,
    nodes: RefCell<PrimaryMap<NodeId, NodeData>>,
    structural: RefCell<InternTable<Payload, NodeId>>,
    strings: RefCell<PrimaryMap<StringId, Box<str>>>,
    string_lookup: RefCell<InternTable<Box<str>, StringId>>,
    node_lists: RefCell<PrimaryMap<NodeListId, Vec<NodeId>>>,
    node_list_lookup: RefCell<InternTable<Vec<NodeId>, NodeListId>>,
}

// Monotonically increasing generation counter so distinct `Arena`s
// (typically one per pass) don't alias each other's `Node` handles even
// if their underlying `NodeId`s happen to collide numerically.
static NEXT_GENERATION: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(1);

impl Arena {
    pub fn new(config: ArenaConfig) -> Self {
        Arena {
            config,
            generation: NEXT_GENERATION.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            nodes: RefCell::new(PrimaryMap::new()),
            structural: RefCell::new(InternTable::with_capacity(1024)),
            strings: RefCell::new(PrimaryMap::new()),
            string_lookup: RefCell::new(InternTable::with_capacity(256)),
            node_lists: RefCell::new(PrimaryMap::new()),
            node_list_lookup: RefCell::new(InternTable::with_capacity(64)),
        }
    }

    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Intern a string, deduplicating against every string interned so
    /// far in this arena.
    pub fn intern_string(&self, s: &str) -> StringId {
        if let Some(id) = self.string_lookup.borrow().get(&s.to_owned().into_boxed_str()) {
            return id;
        }
        let boxed: Box<str> = s.into();
        let id = self.strings.borrow_mut().push(boxed.clone());
        self.string_lookup.borrow_mut().insert(boxed, id);
        id
    }

    pub fn get_string(&self, id: StringId) -> std::cell::Ref<'_, str> {
        std::cell::Ref::map(self.strings.borrow(), |s| &*s[id])
    }

    /// Intern a list of node ids, deduplicating against every list with
    /// the same contents interned so far in this arena (spec.md §4.1's
    /// third named `Arena` operation, alongside `intern_node`/`declare`).
    /// Used for operand lists that are themselves shared across many
    /// nodes rather than embedded inline (e.g. a `RecordType`'s member
    /// list reused by several `Composite`s of that type).
    pub fn intern_nodes(&self, ids: &[NodeId]) -> NodeListId {
        if let Some(existing) = self.node_list_lookup.borrow().get(&ids.to_vec()) {
            return existing;
        }
        let list = ids.to_vec();
        let id = self.node_lists.borrow_mut().push(list.clone());
        self.node_list_lookup.borrow_mut().insert(list, id);
        id
    }

    pub fn get_nodes(&self, id: NodeListId) -> std::cell::Ref<'_, [NodeId]> {
        std::cell::Ref::map(self.node_lists.borrow(), |lists| lists[id].as_slice())
    }

    /// Allocate a fresh, reference-identical node. Used for every
    /// [`NodeClass::Declaration`] and for `Param` (spec.md §3: nominal
    /// nodes are identified by creation, not by payload).
    fn fresh_node(&self, payload: Payload) -> Node {
        let id = self.nodes.borrow_mut().push(NodeData::new(payload));
        Node::new(id, self.generation)
    }

    /// Intern a node. Structural tags are deduplicated against every
    /// structurally-equal node already present; nominal tags always
    /// allocate fresh (spec.md §4.1).
    ///
    /// When `check_types` is enabled, the payload is validated via
    /// [`crate::check::type_of`] before insertion; a failure is treated as
    /// fatal, matching the "Failure" clause of spec.md §4.1 (a
    /// `CheckError` is returned rather than panicking directly, so
    /// callers — in particular `shady-passes` — can attach a module-level
    /// `CompilationError::InvariantViolation` with context, but no caller
    /// in this codebase is expected to recover from it).
    pub fn intern_node(&self, payload: Payload) -> Result<Node, crate::check::CheckError> {
        let class = payload.kind().class();
        let computed_ty = if self.config.check_types {
            Some(crate::check::type_of(self, &payload)?)
        } else {
            None
        };
        let id = if class.is_structural() {
            if let Some(existing) = self.structural.borrow().get(&payload) {
                trace!("intern_node: structural hit on {:?}, reusing {:?}", class, existing);
                return Ok(Node::new(existing, self.generation));
            }
            let id = self.nodes.borrow_mut().push(NodeData::new(payload.clone()));
            self.structural.borrow_mut().insert(payload, id);
            id
        } else {
            self.nodes.borrow_mut().push(NodeData::new(payload))
        };
        if let Some(Some(ty)) = computed_ty {
            self.nodes.borrow()[id].ty.set(Some(ty));
        }
        Ok(Node::new(id, self.generation))
    }

    /// Allocate a nominal declaration header without a body, so recursive
    /// and mutually-recursive references can close over it (spec.md §4.3,
    /// §9 "Cyclic and mutually-recursive IR graphs").
    pub fn declare(&self, payload: Payload) -> Node {
        debug_assert!(!payload.kind().class().is_structural());
        self.fresh_node(payload)
    }

    /// Replace a declaration's payload in place. Used by `shady-rewrite`'s
    /// two-phase nominal rewrite: `declare` allocates an empty header so
    /// self- and mutually-recursive references can resolve to it, then
    /// this fills in the body once those references have been rewritten.
    pub fn fill_declaration(&self, node: Node, payload: Payload) {
        debug_assert_eq!(node.generation, self.generation, "node from a different arena/pass");
        debug_assert!(!payload.kind().class().is_structural());
        self.nodes.borrow_mut()[node.id].payload = payload;
    }

    /// Read a node's payload.
    pub fn payload(&self, node: Node) -> std::cell::Ref<'_, Payload> {
        debug_assert_eq!(node.generation, self.generation, "node from a different arena/pass");
        self.payload_by_id(node.id)
    }

    /// Read a node's payload given only its bare id, without a generation
    /// check. Public analogue of [`Arena::payload_by_id`] for callers
    /// outside this crate (in particular `shady-rewrite`, which walks
    /// operand ids embedded in a payload it does not itself own a checked
    /// [`Node`] handle for).
    pub fn payload_of(&self, id: NodeId) -> std::cell::Ref<'_, Payload> {
        self.payload_by_id(id)
    }

    /// Reattach this arena's generation to a bare id known to have been
    /// allocated by it. Used by `shady-rewrite` to turn an operand
    /// `NodeId` back into a checked [`Node`] handle before recursing into
    /// [`Rewriter::rewrite_node`][rw].
    ///
    /// [rw]: ../shady_rewrite/struct.Rewriter.html#method.rewrite_node
    pub fn node_handle(&self, id: NodeId) -> Node {
        Node::new(id, self.generation)
    }

    /// Read a node's payload by its bare id, without a generation check.
    ///
    /// Every `NodeId` embedded in another node's payload (as an operand)
    /// was necessarily produced by this same arena, since nodes can only
    /// reference operands already interned in it (spec.md §3 "Arena
    /// ownership"). `type_of` and `is_subtype` walk such operand ids
    /// directly, so they use this instead of threading a generation-
    /// checked `Node` through every recursive call.
    pub(crate) fn payload_by_id(&self, id: NodeId) -> std::cell::Ref<'_, Payload> {
        std::cell::Ref::map(self.nodes.borrow(), |n| &n[id].payload)
    }

    /// Get a node's cached type, if inference has already filled it in.
    pub fn type_of_cached(&self, node: Node) -> Option<NodeId> {
        debug_assert_eq!(node.generation, self.generation, "node from a different arena/pass");
        self.nodes.borrow()[node.id].ty.get()
    }

    /// Get a node's cached type by bare id, without a generation check.
    /// Bare-id analogue of [`Arena::type_of_cached`], for the same reason
    /// [`Arena::payload_by_id`] exists alongside [`Arena::payload`]: `type_of`
    /// resolves an operand's already-cached type (e.g. a `Load`'s `ptr`, a
    /// `Call`'s args) by id, never through a checked [`Node`] handle.
    pub(crate) fn type_of_cached_by_id(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.borrow()[id].ty.get()
    }

    /// Cache a node's type. Idempotent: writing the same type twice is
    /// fine, but writing a *different* type after the first write is a
    /// bug in the calling pass.
    pub fn set_type_cache(&self, node: Node, ty: NodeId) {
        let nodes = self.nodes.borrow();
        let cell = &nodes[node.id].ty;
        match cell.get() {
            None => cell.set(Some(ty)),
            Some(existing) => debug_assert_eq!(existing, ty, "type cache written twice with different types"),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.borrow().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Payload;

    #[test]
    fn structural_interning_is_pointer_identity() {
        let arena = Arena::new(ArenaConfig {
            check_types: false,
            ..ArenaConfig::default()
        });
        let a = arena.intern_node(Payload::Bool).unwrap();
        let b = arena.intern_node(Payload::Bool).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(arena.node_count(), 1);
    }

    #[test]
    fn distinct_payloads_get_distinct_ids() {
        let arena = Arena::new(ArenaConfig {
            check_types: false,
            ..ArenaConfig::default()
        });
        let i32_ty = arena
            .intern_node(Payload::Int { width: 32, signed: true })
            .unwrap();
        let u32_ty = arena
            .intern_node(Payload::Int { width: 32, signed: false })
            .unwrap();
        assert_ne!(i32_ty.id(), u32_ty.id());
    }

    #[test]
    fn declarations_are_never_deduplicated() {
        let arena = Arena::new(ArenaConfig {
            check_types: false,
            ..ArenaConfig::default()
        });
        let name = arena.intern_string("foo");
        let a = arena.declare(Payload::NominalType { name, body: None });
        let b = arena.declare(Payload::NominalType { name, body: None });
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn string_interning_deduplicates() {
        let arena = Arena::new(ArenaConfig::default());
        let a = arena.intern_string("hello");
        let b = arena.intern_string("hello");
        assert_eq!(a, b);
    }

    #[test]
    fn node_list_interning_deduplicates_by_contents() {
        let arena = Arena::new(ArenaConfig {
            check_types: false,
            ..ArenaConfig::default()
        });
        let a = arena.intern_node(Payload::Bool).unwrap();
        let b = arena.intern_node(Payload::Unit).unwrap();
        let list1 = arena.intern_nodes(&[a.id(), b.id()]);
        let list2 = arena.intern_nodes(&[a.id(), b.id()]);
        let list3 = arena.intern_nodes(&[b.id(), a.id()]);
        assert_eq!(list1, list2);
        assert_ne!(list1, list3);
        assert_eq!(&*arena.get_nodes(list1), &[a.id(), b.id()]);
    }
}
