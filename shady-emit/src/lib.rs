//! Backend emission (spec.md §4.6, §6): the rewriter-shaped walk that
//! turns a fully-lowered `shady_ir::Module` into either a C-family
//! translation unit (text) or a SPIR-V module (bytes), instead of into
//! another `Module`.
//!
//! Grounded on `cranelift_codegen::isa`'s split between a target-keyed
//! instruction-selection table (here, a dialect-keyed one, §[F]'s
//! `isel::IselTable`) and the per-target emitters built on top of it
//! (here, `c::CEmitter` and `spirv::SpirvEmitter`). See `SPEC_FULL.md`
//! §[F].

pub mod c;
pub mod isel;
pub mod spirv;

/// How an instruction's result is made available to its uses (spec.md
/// §4.6 "Let-binding").
///
/// Grounded on the same distinction `cranelift_codegen`'s egraph
/// elaborator makes between rematerializing a pure value at every use
/// site versus pinning it to one local: here the choice is per-backend
/// rather than cost-driven, since a C-family target needs a named local
/// for anything with a side effect, while SPIR-V's SSA form has no
/// notion of "inline" at all and every instruction gets an id regardless.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum LetBinding {
    /// Substitute the expression at its use site; legal only for
    /// side-effect-free instructions used exactly once.
    NoBinding,
    /// Assign once to a uniquely-named local at the point of definition.
    LetBinding,
    /// Emit at module scope, ahead of every function (constants and the
    /// `__shady_private_globals` struct).
    GlobalBinding,
}

/// Whatever stops emission cold: an instruction or type the target
/// dialect/version has no rendering for (spec.md §7 kind 4,
/// "backend-unsupported constructs"), or a postcondition a supposedly
/// fully-lowered module failed to uphold (an `If`/`Match`/`Loop` reaching
/// the C backend, a pointer whose emulated representation `lower_lea`
/// should already have picked).
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("{dialect} has no rendering for {construct}")]
    Unsupported { dialect: &'static str, construct: String },
    #[error("emitter precondition violated: {reason}")]
    MalformedInput { reason: String },
}
