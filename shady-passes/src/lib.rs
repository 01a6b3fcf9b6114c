//! The ordered lowering pipeline (spec.md §4.5): one module per pass, each
//! consuming a `Module` in one `Arena` and producing a fresh `Module` in a
//! fresh `Arena`, composed by `shady::Pipeline` in the fixed order
//! `bind, normalize, normalize_builtins, infer, lower_cf_instrs,
//! restructurize?, lift_everything, lower_int64, lower_subgroup_ops,
//! lower_lea, lower_decay_ptrs`.
//!
//! Grounded on `cranelift_codegen`'s individual pass modules (`dce.rs`,
//! `alias_analysis.rs`, `inline.rs`): one free `run` function per pass,
//! taking the function/module it transforms plus whatever side tables it
//! needs, returning a fresh result rather than mutating in place.

pub mod bind;
pub mod infer;
pub mod lift_everything;
pub mod lower_cf_instrs;
pub mod lower_decay_ptrs;
pub mod lower_int64;
pub mod lower_lea;
pub mod lower_subgroup_ops;
pub mod normalize;
pub mod normalize_builtins;
pub mod restructurize;

use shady_ir::{Arena, ArenaConfig};

/// The subset of spec.md §6's `CompilerConfig` that the passes themselves
/// read. `shady::CompilerConfig` carries the rest (emit-only knobs); the
/// umbrella crate's `Pipeline` narrows its own config down to this one
/// before calling into any pass.
#[derive(Clone, Debug)]
pub struct PassConfig {
    pub lower_int64: bool,
    pub emulate_subgroup_ops: bool,
    pub emulate_subgroup_ops_extended_types: bool,
    pub emulate_generic_ptrs: bool,
    pub emulate_physical_memory: bool,
    pub use_loop_for_fn_body: bool,
    pub decay_unsized_arrays: bool,
    pub target_ptr_width_bytes: u8,
    pub restructure_cf: bool,
}

impl Default for PassConfig {
    fn default() -> Self {
        PassConfig {
            lower_int64: false,
            emulate_subgroup_ops: false,
            emulate_subgroup_ops_extended_types: false,
            emulate_generic_ptrs: false,
            emulate_physical_memory: false,
            use_loop_for_fn_body: false,
            decay_unsized_arrays: false,
            target_ptr_width_bytes: 8,
            restructure_cf: false,
        }
    }
}

/// Every way a pass can fail to produce a module (spec.md §7's "pass
/// bailouts" and the invariant-violation/unsupported-construct kinds, as
/// they surface from inside an individual pass rather than at the
/// top-level `CompilationResult`).
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    #[error("could not resolve name {name:?}")]
    UnresolvedName { name: String },
    #[error(transparent)]
    Check(#[from] shady_ir::CheckError),
    #[error(transparent)]
    Verify(#[from] shady_analysis::VerifyError),
    #[error("pass bailed: {reason}")]
    Bail { reason: String },
    #[error("construct not supported by this lowering: {reason}")]
    Unsupported { reason: String },
}

/// A fresh destination `Arena` inheriting `src`'s configuration, with
/// `check_types` pinned to whatever this pass needs (spec.md §5: "module
/// `M_n` is produced before `M_{n-1}`'s arena is destroyed... entirely
/// re-allocated in the new arena").
pub(crate) fn fresh_arena(src: &Arena, check_types: bool) -> Arena {
    Arena::new(ArenaConfig { check_types, ..src.config().clone() })
}
