//! The whole-module verifier, run after every pass in debug builds.
//!
//! Grounded on `examples/original_source/src/shady/analysis/verify.c`'s
//! `shd_verify_module`: same three checks, same order (arena identity,
//! scoping, then per-declaration body shape), and the same early-out —
//! the original skips scoping/body checks entirely when the arena was
//! built with `check_types` off, since `Unbound`/`UntypedNumber` nodes
//! are still legal before `infer` has run and would fail both checks
//! spuriously.

use crate::cfg::{CfgBuildConfig, ControlFlowGraph};
use crate::dominators::DominatorTree;
use crate::free_frontier::free_frontier;
use crate::schedule::Scheduler;
use log::error;
use shady_ir::node::Payload;
use shady_ir::{is_subtype, Arena, Module, Node, NodeId};

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("node {node:?} was not produced by this module's arena")]
    ForeignNode { node: NodeId },
    #[error("function {function:?} leaks {leaking:?} across its own boundary")]
    LeakingVariables { function: NodeId, leaking: Vec<NodeId> },
    #[error("basic block {block:?}'s body does not type as noret")]
    BasicBlockBodyNotNoret { block: NodeId },
    #[error("nominal type {decl:?}'s body is not a type")]
    NominalTypeBodyNotType { decl: NodeId },
    #[error("constant {decl:?}'s value does not match its type hint")]
    ConstantTypeMismatch { decl: NodeId },
    #[error("global variable {decl:?}'s initializer does not match its declared type")]
    GlobalInitTypeMismatch { decl: NodeId },
}

pub fn verify_module(arena: &Arena, module: &Module) -> Result<(), VerifyError> {
    verify_same_arena(arena, module)?;
    if arena.config().check_types {
        verify_scoping(arena, module)?;
        verify_bodies(arena, module)?;
    }
    Ok(())
}

fn verify_same_arena(arena: &Arena, module: &Module) -> Result<(), VerifyError> {
    for &decl in module.declarations() {
        if decl.generation() != arena.generation() {
            return Err(VerifyError::ForeignNode { node: decl.id() });
        }
    }
    Ok(())
}

/// No value computed inside a function may be used outside it.
fn verify_scoping(arena: &Arena, module: &Module) -> Result<(), VerifyError> {
    for &decl in module.declarations() {
        if !matches!(&*arena.payload(decl), Payload::Function { body: Some(_), .. }) {
            continue;
        }
        let cfg = ControlFlowGraph::build(arena, decl.id(), CfgBuildConfig::default());
        let doms = DominatorTree::compute(&cfg);
        let scheduler = Scheduler::new(arena, &cfg);
        let leaking = free_frontier(arena, &doms, &scheduler, cfg.entry());
        if !leaking.is_empty() {
            error!("function {:?} leaks {} variable(s) across its boundary", decl.id(), leaking.len());
            return Err(VerifyError::LeakingVariables {
                function: decl.id(),
                leaking: leaking.into_iter().collect(),
            });
        }
    }
    Ok(())
}

/// Per-declaration shape checks that don't depend on control flow.
fn verify_bodies(arena: &Arena, module: &Module) -> Result<(), VerifyError> {
    for &decl in module.declarations() {
        verify_nominal_node(arena, decl)?;
        if matches!(&*arena.payload(decl), Payload::Function { body: Some(_), .. }) {
            verify_blocks_reachable_from(arena, decl.id())?;
        }
    }
    Ok(())
}

fn verify_blocks_reachable_from(arena: &Arena, function: NodeId) -> Result<(), VerifyError> {
    let cfg = ControlFlowGraph::build(arena, function, CfgBuildConfig::default());
    for &node in cfg.nodes() {
        if matches!(&*arena.payload_of(node), Payload::BasicBlock { .. }) {
            verify_nominal_node(arena, arena.node_handle(node))?;
        }
    }
    Ok(())
}

fn verify_nominal_node(arena: &Arena, decl: Node) -> Result<(), VerifyError> {
    match &*arena.payload(decl) {
        Payload::BasicBlock { body: Some(body), .. } => {
            let noret = arena
                .intern_node(Payload::Noret)
                .expect("Noret always type-checks")
                .id();
            let body_ty = arena
                .type_of_cached(arena.node_handle(*body))
                .expect("a checked arena caches every interned node's type");
            if !is_subtype(arena, body_ty, noret) {
                return Err(VerifyError::BasicBlockBodyNotNoret { block: decl.id() });
            }
        }
        Payload::NominalType { body: Some(body), .. } => {
            let class = arena.payload_of(*body).kind().class();
            if class != shady_ir::NodeClass::Type {
                return Err(VerifyError::NominalTypeBodyNotType { decl: decl.id() });
            }
        }
        Payload::Constant { type_hint: Some(hint), value: Some(value), .. } => {
            let value_ty = arena
                .type_of_cached(arena.node_handle(*value))
                .expect("a checked arena caches every interned node's type");
            if !is_subtype(arena, value_ty, *hint) {
                return Err(VerifyError::ConstantTypeMismatch { decl: decl.id() });
            }
        }
        Payload::GlobalVariable { ty, init: Some(init), .. } => {
            let init_ty = arena
                .type_of_cached(arena.node_handle(*init))
                .expect("a checked arena caches every interned node's type");
            if !is_subtype(arena, init_ty, *ty) {
                return Err(VerifyError::GlobalInitTypeMismatch { decl: decl.id() });
            }
        }
        _ => {}
    }
    Ok(())
}
