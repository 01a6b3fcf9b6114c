//! The dominator tree: each reachable node's immediate dominator.
//!
//! Ported in spirit from `cranelift_codegen::dominator_tree`'s iterative
//! Cooper/Harvey/Kennedy algorithm (the `idom(n) = intersect(preds(n))`
//! walk over RPO numbers), driven by [`crate::cfg::ControlFlowGraph`]
//! instead of cranelift's block layout. Cranelift additionally supports
//! cheap incremental recomputation after local edits (its `STRIDE`-spaced
//! RPO numbers); nothing here mutates a built CFG in place, so that
//! machinery is dropped in favor of recomputing from scratch, same
//! simplification as [`crate::cfg::ControlFlowGraph`] itself.

use crate::cfg::ControlFlowGraph;
use crate::rpo::ReversePostOrder;
use shady_entity::SecondaryMap;
use shady_ir::NodeId;

pub struct DominatorTree {
    idom: SecondaryMap<NodeId, Option<NodeId>>,
    rpo: ReversePostOrder,
    entry: NodeId,
}

impl DominatorTree {
    pub fn compute(cfg: &ControlFlowGraph) -> DominatorTree {
        let rpo = ReversePostOrder::compute(cfg);
        let mut idom: SecondaryMap<NodeId, Option<NodeId>> = SecondaryMap::with_default(None);
        let entry = cfg.entry();

        let mut changed = true;
        while changed {
            changed = false;
            for &node in rpo.order() {
                if node == entry {
                    continue;
                }
                let mut new_idom: Option<NodeId> = None;
                for pred in cfg.predecessors(node) {
                    if rpo.rpo_index(pred.node).is_none() {
                        continue; // unreachable predecessor, e.g. a back edge not yet resolved
                    }
                    new_idom = Some(match new_idom {
                        None => pred.node,
                        Some(current) => intersect(&idom, &rpo, current, pred.node),
                    });
                }
                if idom[node] != new_idom {
                    idom[node] = new_idom;
                    changed = true;
                }
            }
        }

        DominatorTree { idom, rpo, entry }
    }

    pub fn idom(&self, node: NodeId) -> Option<NodeId> {
        self.idom[node]
    }

    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.rpo.rpo_index(node).is_some()
    }

    /// Does `a` dominate `b`? Every node dominates itself.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if a == b {
            return true;
        }
        if !self.is_reachable(b) {
            return false;
        }
        let mut cursor = b;
        while let Some(next) = self.idom(cursor) {
            if next == a {
                return true;
            }
            cursor = next;
        }
        false
    }

    pub fn entry(&self) -> NodeId {
        self.entry
    }
}

/// Walk two nodes up the dominator tree, alternating on whichever has the
/// smaller RPO number, until they converge on their common ancestor.
fn intersect(
    idom: &SecondaryMap<NodeId, Option<NodeId>>,
    rpo: &ReversePostOrder,
    mut a: NodeId,
    mut b: NodeId,
) -> NodeId {
    loop {
        if a == b {
            return a;
        }
        let ra = rpo.rpo_index(a).expect("intersect only ever walks reachable nodes");
        let rb = rpo.rpo_index(b).expect("intersect only ever walks reachable nodes");
        while rpo.rpo_index(a).unwrap() > rb {
            a = idom[a].expect("a reachable non-entry node always has an idom once fully processed");
        }
        while rpo.rpo_index(b).unwrap() > ra {
            b = idom[b].expect("a reachable non-entry node always has an idom once fully processed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgBuildConfig;
    use shady_ir::node::Payload;
    use shady_ir::{Arena, ArenaConfig, NodeIdVec};

    /// entry -> a -> merge, entry -> b -> merge; merge's idom is entry.
    #[test]
    fn diamond_merges_idom_at_entry() {
        let arena = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        let names: Vec<_> = ["entry", "a", "b", "merge"].iter().map(|n| arena.intern_string(n)).collect();

        let merge = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(arena.intern_node(Payload::Return { args: NodeIdVec::new() }).unwrap().id()),
            name: names[3],
        });
        let jump_to_merge = |arena: &Arena| {
            arena
                .intern_node(Payload::Jump { target: merge.id(), args: NodeIdVec::new(), mem: None })
                .unwrap()
                .id()
        };
        let block_a = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(jump_to_merge(&arena)),
            name: names[1],
        });
        let block_b = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(jump_to_merge(&arena)),
            name: names[2],
        });
        let cond = arena.intern_node(Payload::True).unwrap();
        let jump_a = arena
            .intern_node(Payload::Jump { target: block_a.id(), args: NodeIdVec::new(), mem: None })
            .unwrap();
        let jump_b = arena
            .intern_node(Payload::Jump { target: block_b.id(), args: NodeIdVec::new(), mem: None })
            .unwrap();
        let branch = arena
            .intern_node(Payload::Branch { cond: cond.id(), true_jump: jump_a.id(), false_jump: jump_b.id() })
            .unwrap();
        let entry = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(branch.id()),
            name: names[0],
        });

        let cfg = ControlFlowGraph::build(&arena, entry.id(), CfgBuildConfig::default());
        let doms = DominatorTree::compute(&cfg);
        assert_eq!(doms.idom(block_a.id()), Some(entry.id()));
        assert_eq!(doms.idom(block_b.id()), Some(entry.id()));
        assert_eq!(doms.idom(merge.id()), Some(entry.id()));
        assert!(doms.dominates(entry.id(), merge.id()));
        assert!(!doms.dominates(block_a.id(), merge.id()));
    }
}
