//! Analyses over a `shady_ir::Module`: control-flow graphs, dominance,
//! loop structure, instruction scheduling, free-frontier computation, and
//! the module verifier. See `SPEC_FULL.md` §[D].

pub mod cfg;
pub mod dominators;
pub mod free_frontier;
pub mod loops;
mod operands;
pub mod rpo;
pub mod schedule;
pub mod verify;

pub use cfg::{CfgBuildConfig, ControlFlowGraph, Edge, EdgeKind};
pub use dominators::DominatorTree;
pub use loops::LoopForest;
pub use schedule::Scheduler;
pub use verify::{verify_module, VerifyError};
