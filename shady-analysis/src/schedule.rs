//! Assign each instruction a "home" abstraction: the block its let-binding
//! would live in if the module were lowered right now.
//!
//! Grounded on `examples/original_source/src/shady/analysis/scheduler.c`'s
//! role in `lift_everything.c` (`new_scheduler(cfg)`, then `free_frontier`
//! per block): because every value-class node is hash-consed, the same
//! structural node is one `NodeId` no matter how many blocks reference
//! it, so scheduling reduces to "claim each node for the first block,
//! visited in reverse-post-order, that reaches it while walking down from
//! its own body." RPO visits a block's dominators before the block
//! itself, so the first claimant is always a block the node is legally
//! usable from.

use crate::cfg::ControlFlowGraph;
use crate::operands::child_node_ids;
use shady_ir::node::{NodeClass, Payload};
use shady_ir::{Arena, NodeId};
use std::collections::{HashMap, HashSet};

pub struct Scheduler {
    home: HashMap<NodeId, NodeId>,
    members: HashMap<NodeId, Vec<NodeId>>,
}

impl Scheduler {
    pub fn new(arena: &Arena, cfg: &ControlFlowGraph) -> Scheduler {
        let cfg_nodes: HashSet<NodeId> = cfg.nodes().iter().copied().collect();
        let mut home = HashMap::new();
        let mut members: HashMap<NodeId, Vec<NodeId>> = HashMap::new();

        for &block in cfg.nodes() {
            for param in params_of(&arena.payload_of(block)) {
                home.entry(param).or_insert(block);
            }
        }
        for &block in cfg.nodes() {
            if let Some(body) = body_of(&arena.payload_of(block)) {
                claim(arena, &cfg_nodes, &mut home, &mut members, block, body);
            }
        }

        Scheduler { home, members }
    }

    /// The abstraction `node` is scheduled into, if it was reachable from
    /// some abstraction's body. `Param`s come back homed to the
    /// abstraction whose `params` lists them; `Type`/`Declaration` class
    /// nodes are never scheduled (they carry no home).
    pub fn schedule_node(&self, node: NodeId) -> Option<NodeId> {
        self.home.get(&node).copied()
    }

    /// The nodes homed to `block`, in no particular order.
    pub fn members_of(&self, block: NodeId) -> &[NodeId] {
        self.members.get(&block).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn scheduled_nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.home.keys().copied()
    }
}

fn params_of(payload: &Payload) -> Vec<NodeId> {
    match payload {
        Payload::Function { params, .. } | Payload::BasicBlock { params, .. } | Payload::Loop { params, .. } => {
            params.to_vec()
        }
        _ => vec![],
    }
}

fn body_of(payload: &Payload) -> Option<NodeId> {
    match payload {
        Payload::Function { body, .. } | Payload::BasicBlock { body, .. } => *body,
        _ => None,
    }
}

fn claim(
    arena: &Arena,
    cfg_nodes: &HashSet<NodeId>,
    home: &mut HashMap<NodeId, NodeId>,
    members: &mut HashMap<NodeId, Vec<NodeId>>,
    block: NodeId,
    node: NodeId,
) {
    if home.contains_key(&node) || cfg_nodes.contains(&node) {
        return;
    }
    let payload = arena.payload_of(node);
    if matches!(payload.kind().class(), NodeClass::Type | NodeClass::Declaration) {
        return;
    }
    let children = child_node_ids(&payload);
    drop(payload);

    home.insert(node, block);
    members.entry(block).or_default().push(node);
    for child in children {
        claim(arena, cfg_nodes, home, members, block, child);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cfg::CfgBuildConfig;
    use shady_ir::node::Payload;
    use shady_ir::{ArenaConfig, NodeIdVec};

    #[test]
    fn instruction_used_only_in_entry_is_homed_there() {
        let arena = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        let name = arena.intern_string("f");
        let ty = arena.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let alloc = arena.intern_node(Payload::StackAlloc { ty: ty.id() }).unwrap();
        let ret = arena.intern_node(Payload::Return { args: NodeIdVec::from_slice(&[alloc.id()]) }).unwrap();
        let entry = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(ret.id()),
            name,
        });

        let cfg = ControlFlowGraph::build(&arena, entry.id(), CfgBuildConfig::default());
        let scheduler = Scheduler::new(&arena, &cfg);
        assert_eq!(scheduler.schedule_node(alloc.id()), Some(entry.id()));
        assert_eq!(scheduler.schedule_node(ty.id()), None);
    }

    #[test]
    fn params_are_homed_to_their_declaring_block() {
        let arena = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        let name = arena.intern_string("f");
        let ty = arena.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let param = arena.intern_node(Payload::Param { ty: ty.id(), name: arena.intern_string("x") }).unwrap();
        let ret = arena.intern_node(Payload::Return { args: NodeIdVec::from_slice(&[param.id()]) }).unwrap();
        let entry = arena.declare(Payload::BasicBlock {
            params: NodeIdVec::from_slice(&[param.id()]),
            body: Some(ret.id()),
            name,
        });

        let cfg = ControlFlowGraph::build(&arena, entry.id(), CfgBuildConfig::default());
        let scheduler = Scheduler::new(&arena, &cfg);
        assert_eq!(scheduler.schedule_node(param.id()), Some(entry.id()));
    }
}
