//! A control-flow graph over a function's abstractions (its `BasicBlock`s
//! and the inline bodies of structured instructions), built by following
//! terminators from an entry point.
//!
//! Grounded on `cranelift_codegen::flowgraph::ControlFlowGraph`: a
//! `SecondaryMap` from node to its predecessor/successor lists, computed
//! in one worklist-driven pass rather than incrementally maintained.
//! Cranelift's version backs its sets with `bforest` so edits to a
//! `Function` can cheaply recompute one block at a time; nothing here
//! ever mutates a `Module` in place (every pass produces a fresh one), so
//! there is no incremental-update story to support and plain `Vec`s
//! suffice.

use log::trace;
use shady_entity::SecondaryMap;
use shady_ir::node::Payload;
use shady_ir::{Arena, NodeId};

/// spec.md §4.4's five edge kinds.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum EdgeKind {
    /// A plain `Jump`.
    Jump,
    /// Entering the inner body of an `If`/`Match`/`Loop`/`Control`.
    StructuredEnterBody,
    /// An exit from inside a structured construct that bypasses its own
    /// tail (not modeled by this builder; reserved for a future pass that
    /// tracks `MergeBreak`/`MergeSelection` targets precisely — see the
    /// module doc comment on `successors_of`).
    StructuredLeaveBody,
    /// A loop body's back edge to its own header.
    StructuredLoopContinue,
    /// From a structured construct to its tail continuation.
    StructuredTail,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Edge {
    pub kind: EdgeKind,
    pub node: NodeId,
}

/// Which edge kinds a [`ControlFlowGraph::build`] call includes, and
/// whether the graph should be built over predecessors instead of
/// successors (for post-dominance).
#[derive(Clone, Copy, Debug)]
pub struct CfgBuildConfig {
    pub include_structured_exits: bool,
    pub include_structured_tails: bool,
    pub flipped: bool,
}

impl Default for CfgBuildConfig {
    fn default() -> Self {
        CfgBuildConfig {
            include_structured_exits: true,
            include_structured_tails: true,
            flipped: false,
        }
    }
}

#[derive(Clone, Default)]
struct CfgNode {
    successors: Vec<Edge>,
    predecessors: Vec<Edge>,
}

/// The control-flow graph of one function (or of any abstraction reachable
/// from a chosen entry), as a map of abstractions to their
/// predecessor/successor edge sets.
pub struct ControlFlowGraph {
    entry: NodeId,
    data: SecondaryMap<NodeId, CfgNode>,
    /// Discovery order (the order nodes were first reached by the
    /// worklist), consumed by [`crate::rpo`] to seed its own traversal.
    discovered: Vec<NodeId>,
}

impl ControlFlowGraph {
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    pub fn nodes(&self) -> &[NodeId] {
        &self.discovered
    }

    pub fn successors(&self, node: NodeId) -> impl Iterator<Item = Edge> + '_ {
        self.data[node].successors.iter().copied()
    }

    pub fn predecessors(&self, node: NodeId) -> impl Iterator<Item = Edge> + '_ {
        self.data[node].predecessors.iter().copied()
    }

    /// Build the CFG reachable from `entry` (a `Function` or `BasicBlock`
    /// declaration, or any inline structured-instruction body) by
    /// worklist, following [`successors_of`]. When `config.flipped` the
    /// successor/predecessor roles are swapped as they're recorded, so
    /// `successors`/`predecessors` above transparently serve
    /// post-dominance callers without a second code path.
    pub fn build(arena: &Arena, entry: NodeId, config: CfgBuildConfig) -> ControlFlowGraph {
        let mut cfg = ControlFlowGraph {
            entry,
            data: SecondaryMap::new(),
            discovered: Vec::new(),
        };
        let mut worklist = vec![entry];
        let mut seen = std::collections::HashSet::new();
        seen.insert(entry);
        while let Some(node) = worklist.pop() {
            cfg.discovered.push(node);
            let succs = successors_of(arena, node, &config);
            for edge in &succs {
                if seen.insert(edge.node) {
                    worklist.push(edge.node);
                }
                if config.flipped {
                    cfg.data[edge.node].successors.push(Edge { kind: edge.kind, node });
                    cfg.data[node].predecessors.push(*edge);
                } else {
                    cfg.data[node].successors.push(*edge);
                    cfg.data[edge.node].predecessors.push(Edge { kind: edge.kind, node });
                }
            }
        }
        trace!("built cfg from {:?}: {} abstractions discovered", entry, cfg.discovered.len());
        cfg
    }
}

/// Compute the outgoing control-flow edges of `node`, unwrapping
/// declarations (a `Function`/`BasicBlock` is transparent to its `body`)
/// and inline terminator components (`Branch`/`Switch` delegate to the
/// `Jump`s they carry) so the CFG's actual nodes are exactly the places
/// spec.md §4.4 calls "abstractions": basic blocks and the bodies of
/// structured instructions.
///
/// `Join`, `TailCall`, `Return`, and the `Merge*` terminators never
/// produce an edge here: `Join`'s target depends on which enclosing
/// `Control` owns the join point (DESIGN.md Open Question 3 — the
/// verifier rejects a `Join` that would need one, so there is no
/// "structured leave" edge to emit); `TailCall`/`Return` leave the
/// function; the `Merge*` terminators are only legal before
/// `shady-passes::lower_cf_instrs` has run and are resolved into plain
/// `Jump`s by that pass rather than by this analysis.
fn successors_of(arena: &Arena, node: NodeId, config: &CfgBuildConfig) -> Vec<Edge> {
    use Payload::*;
    match &*arena.payload_of(node) {
        Function { body: Some(b), .. } | BasicBlock { body: Some(b), .. } => successors_of(arena, *b, config),
        Function { body: None, .. } | BasicBlock { body: None, .. } => vec![],

        Jump { target, .. } => vec![Edge { kind: EdgeKind::Jump, node: *target }],
        Branch { true_jump, false_jump, .. } => {
            let mut edges = successors_of(arena, *true_jump, config);
            edges.extend(successors_of(arena, *false_jump, config));
            edges
        }
        Switch { case_jumps, default_jump, .. } => {
            let mut edges = successors_of(arena, *default_jump, config);
            for &j in case_jumps {
                edges.extend(successors_of(arena, j, config));
            }
            edges
        }
        Join { .. } | TailCall { .. } | Return { .. } | MergeSelection { .. } | MergeContinue { .. }
        | MergeBreak { .. } | Unreachable => vec![],

        If { true_case, false_case, tail, .. } => {
            let mut edges = vec![Edge { kind: EdgeKind::StructuredEnterBody, node: *true_case }];
            if let Some(f) = false_case {
                edges.push(Edge { kind: EdgeKind::StructuredEnterBody, node: *f });
            }
            if config.include_structured_tails {
                edges.push(Edge { kind: EdgeKind::StructuredTail, node: *tail });
            }
            edges
        }
        Match { cases, default, tail, .. } => {
            let mut edges: Vec<Edge> = cases
                .iter()
                .chain(std::iter::once(default))
                .map(|&c| Edge { kind: EdgeKind::StructuredEnterBody, node: c })
                .collect();
            if config.include_structured_tails {
                edges.push(Edge { kind: EdgeKind::StructuredTail, node: *tail });
            }
            edges
        }
        Loop { body, tail, .. } => {
            let mut edges = vec![
                Edge { kind: EdgeKind::StructuredEnterBody, node: *body },
                Edge { kind: EdgeKind::StructuredLoopContinue, node: *body },
            ];
            if config.include_structured_tails {
                edges.push(Edge { kind: EdgeKind::StructuredTail, node: *tail });
            }
            edges
        }
        Control { inside, tail, .. } => {
            let mut edges = vec![Edge { kind: EdgeKind::StructuredEnterBody, node: *inside }];
            if config.include_structured_tails {
                edges.push(Edge { kind: EdgeKind::StructuredTail, node: *tail });
            }
            edges
        }

        _ if config.include_structured_exits => vec![],
        _ => vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::{ArenaConfig, NodeIdVec};

    fn test_arena() -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() })
    }

    #[test]
    fn straight_line_jump_chain() {
        let arena = test_arena();
        let name_a = arena.intern_string("a");
        let name_b = arena.intern_string("b");
        let block_b = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(arena.intern_node(Payload::Return { args: NodeIdVec::new() }).unwrap().id()),
            name: name_b,
        });
        let jump = arena
            .intern_node(Payload::Jump { target: block_b.id(), args: NodeIdVec::new(), mem: None })
            .unwrap();
        let block_a = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(jump.id()),
            name: name_a,
        });

        let cfg = ControlFlowGraph::build(&arena, block_a.id(), CfgBuildConfig::default());
        let succs: Vec<_> = cfg.successors(block_a.id()).collect();
        assert_eq!(succs, [Edge { kind: EdgeKind::Jump, node: block_b.id() }]);
        assert_eq!(cfg.predecessors(block_b.id()).count(), 1);
    }

    #[test]
    fn branch_delegates_to_its_two_jumps() {
        let arena = test_arena();
        let name = arena.intern_string("f");
        let name_t = arena.intern_string("t");
        let name_f = arena.intern_string("f2");
        let cond = arena.intern_node(Payload::True).unwrap();

        let block_t = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(arena.intern_node(Payload::Unreachable).unwrap().id()),
            name: name_t,
        });
        let block_f = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(arena.intern_node(Payload::Unreachable).unwrap().id()),
            name: name_f,
        });
        let jump_t = arena
            .intern_node(Payload::Jump { target: block_t.id(), args: NodeIdVec::new(), mem: None })
            .unwrap();
        let jump_f = arena
            .intern_node(Payload::Jump { target: block_f.id(), args: NodeIdVec::new(), mem: None })
            .unwrap();
        let branch = arena
            .intern_node(Payload::Branch { cond: cond.id(), true_jump: jump_t.id(), false_jump: jump_f.id() })
            .unwrap();
        let entry = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(branch.id()),
            name,
        });

        let cfg = ControlFlowGraph::build(&arena, entry.id(), CfgBuildConfig::default());
        let mut succs: Vec<_> = cfg.successors(entry.id()).map(|e| e.node).collect();
        succs.sort_by_key(|n| format!("{n:?}"));
        let mut expected = vec![block_t.id(), block_f.id()];
        expected.sort_by_key(|n| format!("{n:?}"));
        assert_eq!(succs, expected);
    }
}
