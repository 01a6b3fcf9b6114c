//! Reverse post-order numbering, the numbering [`crate::dominators`] walks
//! over.
//!
//! Grounded on `cranelift_codegen::dominator_tree`'s own RPO computation
//! (a hand-rolled DFS rather than a borrowed crate, since cranelift's
//! `PackedOption`-based explicit stack is the shape worth copying, not a
//! generic graph-library traversal).

use crate::cfg::ControlFlowGraph;
use shady_entity::SecondaryMap;
use shady_ir::NodeId;

/// `rpo_index` is `None` for a node the traversal never reached (dead
/// code relative to the CFG's entry).
pub struct ReversePostOrder {
    order: Vec<NodeId>,
    index: SecondaryMap<NodeId, Option<u32>>,
}

impl ReversePostOrder {
    pub fn compute(cfg: &ControlFlowGraph) -> ReversePostOrder {
        let mut postorder = Vec::new();
        let mut visited = std::collections::HashSet::new();
        let mut stack = vec![(cfg.entry(), cfg.successors(cfg.entry()))];
        visited.insert(cfg.entry());

        while let Some((node, mut succs)) = stack.pop() {
            match succs.next() {
                Some(edge) => {
                    stack.push((node, succs));
                    if visited.insert(edge.node) {
                        stack.push((edge.node, cfg.successors(edge.node)));
                    }
                }
                None => postorder.push(node),
            }
        }

        postorder.reverse();
        let mut index = SecondaryMap::with_default(None);
        for (i, &node) in postorder.iter().enumerate() {
            index[node] = Some(i as u32);
        }
        ReversePostOrder { order: postorder, index }
    }

    /// Nodes in reverse post-order; index 0 is always the entry.
    pub fn order(&self) -> &[NodeId] {
        &self.order
    }

    pub fn rpo_index(&self, node: NodeId) -> Option<u32> {
        self.index[node]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgBuildConfig;
    use shady_ir::node::Payload;
    use shady_ir::{Arena, ArenaConfig, NodeIdVec};

    #[test]
    fn entry_is_rpo_zero_and_unreachable_node_is_none() {
        let arena = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        let name_a = arena.intern_string("a");
        let name_b = arena.intern_string("b");
        let name_unreached = arena.intern_string("u");
        let unreached = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(arena.intern_node(Payload::Unreachable).unwrap().id()),
            name: name_unreached,
        });
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
        let rpo = ReversePostOrder::compute(&cfg);
        assert_eq!(rpo.rpo_index(block_a.id()), Some(0));
        assert_eq!(rpo.rpo_index(block_b.id()), Some(1));
        assert_eq!(rpo.rpo_index(unreached.id()), None);
    }
}
