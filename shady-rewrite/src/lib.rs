//! A recursive, memoizing node-to-node translation framework, shared by
//! every pass in `shady-passes` (spec.md §4.3).
//!
//! Grounded on `cranelift_codegen::egraph::elaborate::Elaborator`: that
//! type walks an e-graph and emits "the best representative" of each
//! value into a destination function, memoizing via a scoped map so a
//! value already elaborated in an enclosing scope is reused rather than
//! recomputed. We generalize the same shape from "e-graph value -> best
//! concrete value" to "arbitrary source node -> rewritten destination
//! node", and trade the elaborator's literal scoping (parent scopes stay
//! visible to children) for an explicit `parent` chain so a speculative
//! child rewrite (used by `restructurize`'s bail-on-failure path) can be
//! dropped without disturbing the parent's memoization table.

mod identity;

use log::trace;
use shady_ir::{Arena, Module, Node, NodeId, StringId};
use std::cell::RefCell;
use std::collections::HashMap;

/// The function every pass supplies to describe what a node becomes.
/// Implementations call back into [`Rewriter::rewrite_node`] for any
/// operand they don't want to rewrite by hand, and fall through to
/// [`Rewriter::recreate_node_identity`] for tags they don't care about.
pub type RewriteFn<'a> = dyn Fn(&Rewriter<'a>, Node) -> Node + 'a;

/// Translates nodes from one arena to another, one source node at a time,
/// memoizing so a node reachable from multiple operands is rewritten
/// exactly once (spec.md §4.3 "Rewriter memoization").
pub struct Rewriter<'a> {
    pub src_arena: &'a Arena,
    pub dst_arena: &'a Arena,
    pub src_module: &'a Module,
    pub dst_module: RefCell<Module>,
    process: &'a RewriteFn<'a>,
    /// A parent rewriter whose memoization table is consulted (but never
    /// written to) before falling back to this rewriter's own table. Used
    /// by [`Rewriter::create_children_rewriter`] so a nested rewrite (one
    /// function body processed while rewriting an enclosing one) inherits
    /// everything the parent has already produced without aliasing its
    /// map.
    parent: Option<&'a Rewriter<'a>>,
    map: RefCell<HashMap<NodeId, NodeId>>,
}

impl<'a> Rewriter<'a> {
    pub fn new(
        src_arena: &'a Arena,
        dst_arena: &'a Arena,
        src_module: &'a Module,
        process: &'a RewriteFn<'a>,
    ) -> Self {
        Rewriter {
            src_arena,
            dst_arena,
            src_module,
            dst_module: RefCell::new(Module::new()),
            process,
            parent: None,
            map: RefCell::new(HashMap::new()),
        }
    }

    /// A rewriter sharing this one's arenas and `process` callback but
    /// with its own, initially-empty memoization table layered on top of
    /// this one's. Used when entering a nested scope (a function body, or
    /// `restructurize`'s speculative attempt at restructuring one loop)
    /// whose rewrites should not leak into the parent's map if the nested
    /// attempt is abandoned.
    pub fn create_children_rewriter(&'a self) -> Rewriter<'a> {
        Rewriter {
            src_arena: self.src_arena,
            dst_arena: self.dst_arena,
            src_module: self.src_module,
            dst_module: RefCell::new(Module::new()),
            process: self.process,
            parent: Some(self),
            map: RefCell::new(HashMap::new()),
        }
    }

    fn memoized(&self, id: NodeId) -> Option<NodeId> {
        if let Some(existing) = self.map.borrow().get(&id) {
            return Some(*existing);
        }
        self.parent.and_then(|p| p.memoized(id))
    }

    /// Rewrite a single source node, consulting (and then populating) the
    /// memoization table so repeated operand references are cheap.
    pub fn rewrite_node(&self, node: Node) -> Node {
        if let Some(existing) = self.memoized(node.id()) {
            trace!("rewrite_node: {:?} already mapped to {:?}", node.id(), existing);
            return self.dst_arena_node(existing);
        }
        let rewritten = (self.process)(self, node);
        self.map.borrow_mut().insert(node.id(), rewritten.id());
        rewritten
    }

    /// Rewrite every node in a slice, preserving order.
    pub fn rewrite_nodes(&self, nodes: &[Node]) -> Vec<Node> {
        nodes.iter().map(|&n| self.rewrite_node(n)).collect()
    }

    /// Rewrite a bare operand id, reattaching `src_arena`'s generation
    /// before recursing. Every pass that special-cases a handful of tags
    /// and falls through to [`Rewriter::recreate_node_identity`] for the
    /// rest needs this to touch up the operands it does special-case
    /// without reimplementing `identity.rs`'s private `rw` helper.
    pub fn rewrite_operand(&self, id: NodeId) -> NodeId {
        self.rewrite_node(self.src_arena.node_handle(id)).id()
    }

    /// Intern a source string into `dst_arena`. Strings are never
    /// structurally shared with operand identity the way nodes are, so
    /// this doesn't go through the memoization table.
    pub fn rewrite_string(&self, id: StringId) -> StringId {
        self.dst_arena.intern_string(&self.src_arena.get_string(id))
    }

    /// Build a [`Node`] handle for an id already known to live in
    /// `dst_arena` (the memoization table only stores bare ids; this
    /// reattaches the destination arena's generation).
    fn dst_arena_node(&self, id: NodeId) -> Node {
        self.dst_arena.node_handle(id)
    }

    /// The default recreate-by-identity rewrite: look up every operand
    /// through [`Rewriter::rewrite_node`] and reintern an otherwise
    /// unchanged copy of the payload. This is what a pass falls back to
    /// for every node tag it doesn't specifically transform (spec.md
    /// §4.3 "Identity rewriting").
    pub fn recreate_node_identity(&self, node: Node) -> Node {
        identity::recreate(self, node)
    }

    /// Rewrite a declaration's parameter list, preserving the nominal
    /// identity discipline: each source `Param` gets a fresh destination
    /// `Param` (never structurally deduplicated), memoized so later
    /// references to the same source `Param` resolve to the same
    /// destination one.
    pub fn recreate_params(&self, params: &[Node]) -> Vec<Node> {
        params
            .iter()
            .map(|&p| {
                if let Some(existing) = self.memoized(p.id()) {
                    return self.dst_arena_node(existing);
                }
                let rewritten = identity::recreate(self, p);
                self.map.borrow_mut().insert(p.id(), rewritten.id());
                rewritten
            })
            .collect()
    }

    /// Two-phase rewrite of a nominal declaration (`Function`,
    /// `BasicBlock`, `NominalType`): declare an empty header first so
    /// recursive/mutually-recursive references resolve, then fill in the
    /// body. Mirrors spec.md §4.3's "declare_header / fill_body" split,
    /// needed because a function that calls itself must see its own,
    /// already-allocated destination node while its body is being
    /// rewritten.
    pub fn rewrite_declaration(
        &self,
        node: Node,
        declare_header: impl FnOnce(&Self, Node) -> Node,
        fill_body: impl FnOnce(&Self, Node, Node),
    ) -> Node {
        if let Some(existing) = self.memoized(node.id()) {
            return self.dst_arena_node(existing);
        }
        let header = declare_header(self, node);
        self.map.borrow_mut().insert(node.id(), header.id());
        fill_body(self, node, header);
        header
    }

    /// Rewrite every declaration of `src_module` into `dst_module`, in
    /// source order (spec.md §5 "internal ordering": later passes such as
    /// `lift_everything`'s fixpoint depend on declarations being visited
    /// in the order they were produced).
    pub fn rewrite_module(&self) {
        for &decl in self.src_module.declarations() {
            let rewritten = self.rewrite_node(decl);
            self.dst_module.borrow_mut().add_declaration(rewritten);
        }
    }

    /// Consume the rewriter, returning the module it built.
    pub fn into_module(self) -> Module {
        self.dst_module.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::{Arena, ArenaConfig, Payload};

    fn identity_rewrite<'a>(r: &Rewriter<'a>, node: Node) -> Node {
        r.recreate_node_identity(node)
    }

    #[test]
    fn identity_rewrite_preserves_structural_sharing() {
        let src = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        let dst = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        let mut module = Module::new();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let name = src.intern_string("c");
        let decl = src.declare(Payload::Constant {
            annotations: vec![],
            name,
            type_hint: Some(i32_ty.id()),
            value: None,
        });
        module.add_declaration(decl);

        let process: &RewriteFn<'_> = &identity_rewrite;
        let rewriter = Rewriter::new(&src, &dst, &module, process);
        rewriter.rewrite_module();
        let out = rewriter.into_module();
        assert_eq!(out.declarations().len(), 1);
    }

    #[test]
    fn repeated_operand_reference_is_memoized() {
        let src = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        let dst = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        let module = Module::new();
        let bool_ty = src.intern_node(Payload::Bool).unwrap();

        let process: &RewriteFn<'_> = &identity_rewrite;
        let rewriter = Rewriter::new(&src, &dst, &module, process);
        let a = rewriter.rewrite_node(bool_ty);
        let b = rewriter.rewrite_node(bool_ty);
        assert_eq!(a.id(), b.id());
        assert_eq!(dst.node_count(), 1);
    }
}
