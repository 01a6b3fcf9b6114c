//! The free frontier of an abstraction: every value used inside it that
//! is homed (per [`crate::schedule::Scheduler`]) to a block outside it.
//!
//! Grounded on `examples/original_source/src/shady/analysis/verify.c`'s
//! `verify_scoping`, which calls the original `shd_free_frontier` on a
//! whole function's `cfg->entry` and rejects a non-empty result as
//! "leaking variables", and on `lift_everything.c`'s per-`BasicBlock`
//! call, which instead uses a non-empty result as the list of values
//! that must become extra parameters once that block is pulled out into
//! its own function. Node ids are kept in a `BTreeSet`, not a
//! `HashSet`, so that second use gets a deterministic parameter order.

use crate::dominators::DominatorTree;
use crate::operands::child_node_ids;
use crate::schedule::Scheduler;
use shady_ir::node::NodeClass;
use shady_ir::{Arena, NodeId};
use std::collections::BTreeSet;

/// Is `block` part of the region rooted at `abs`? `abs` itself always
/// is; anything `abs` dominates in `cfg` is too. Calling with `abs` set
/// to a whole function's entry makes the region the entire function
/// (`verify_scoping`'s use); calling with a single `BasicBlock` makes the
/// region just that block and whatever it alone dominates (`lift_everything`'s
/// per-block use).
fn in_region(doms: &DominatorTree, abs: NodeId, block: NodeId) -> bool {
    block == abs || doms.dominates(abs, block)
}

/// The set of nodes used from within `abs`'s region but homed outside
/// it: a non-empty result means `abs` cannot stand on its own without
/// those values being passed in or lifted to module scope.
pub fn free_frontier(arena: &Arena, doms: &DominatorTree, scheduler: &Scheduler, abs: NodeId) -> BTreeSet<NodeId> {
    let mut frontier = BTreeSet::new();
    for node in scheduler.scheduled_nodes() {
        let home = scheduler.schedule_node(node).expect("scheduled_nodes only yields homed nodes");
        if !in_region(doms, abs, home) {
            continue;
        }
        for operand in child_node_ids(&arena.payload_of(node)) {
            if matches!(arena.payload_of(operand).kind().class(), NodeClass::Type | NodeClass::Declaration) {
                continue;
            }
            let crosses_in = match scheduler.schedule_node(operand) {
                Some(operand_home) => !in_region(doms, abs, operand_home),
                // Unhomed non-type/declaration operand: not reachable from any
                // abstraction's own body (e.g. a bare value never used as an
                // instruction's operand chain root), treated as module-level
                // and so never part of the frontier.
                None => false,
            };
            if crosses_in {
                frontier.insert(operand);
            }
        }
    }
    frontier
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgBuildConfig;
    use shady_ir::node::Payload;
    use shady_ir::{ArenaConfig, NodeIdVec};

    /// entry declares `x`; a child block uses `x` without it in its own
    /// params, so `x` shows up in that block's frontier but not entry's.
    #[test]
    fn child_block_using_outer_param_has_nonempty_frontier() {
        let arena = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        let ty = arena.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let x = arena.intern_node(Payload::Param { ty: ty.id(), name: arena.intern_string("x") }).unwrap();

        let name_child = arena.intern_string("child");
        let child_ret = arena.intern_node(Payload::Return { args: NodeIdVec::from_slice(&[x.id()]) }).unwrap();
        let child = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(child_ret.id()),
            name: name_child,
        });

        let name_entry = arena.intern_string("entry");
        let jump = arena
            .intern_node(Payload::Jump { target: child.id(), args: NodeIdVec::new(), mem: None })
            .unwrap();
        let entry = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::from_slice(&[x.id()]),
            body: Some(jump.id()),
            name: name_entry,
        });

        let cfg = ControlFlowGraph::build(&arena, entry.id(), CfgBuildConfig::default());
        let doms = DominatorTree::compute(&cfg);
        let scheduler = Scheduler::new(&arena, &cfg);

        let whole_fn_frontier = free_frontier(&arena, &doms, &scheduler, entry.id());
        assert!(whole_fn_frontier.is_empty(), "x is declared inside the function, not leaking out of it");

        let child_frontier = free_frontier(&arena, &doms, &scheduler, child.id());
        assert_eq!(child_frontier, BTreeSet::from([x.id()]));
    }
}
