//! The compiler driver: configuration, the fixed pass pipeline, and
//! emit dispatch (spec.md §6 External interfaces, §7 Error handling).
//!
//! Grounded on `cranelift-umbrella`'s role relative to `cranelift-codegen`
//! and its individual backends: a thin top crate that owns the public
//! `Context`-equivalent (here, [`Pipeline`]) and the single config struct
//! callers actually construct, while every crate it drives keeps its own
//! narrower config type ([`shady_passes::PassConfig`],
//! [`shady_emit::c::CConfig`], [`shady_emit::spirv::SpirvConfig`]).

use shady_emit::c::{CConfig, CEmitter, Dialect};
use shady_emit::spirv::{SpirvConfig, SpirvEmitter, SpirvModule};
use shady_emit::EmitError;
use shady_ir::{Arena, ArenaConfig, Module};
use shady_passes::{PassConfig, PassError};

/// Every option spec.md §6's "Compiler config" names, plus the
/// backend-selection flags it groups under "backend-specific flags".
#[derive(Clone, Debug)]
pub struct CompilerConfig {
    pub allow_frontend_syntax: bool,
    pub per_thread_stack_size: u32,
    pub per_subgroup_stack_size: u32,
    pub subgroup_size: u32,
    pub target_spirv_version_major: u8,
    pub target_spirv_version_minor: u8,
    pub lower_int64: bool,
    pub emulate_subgroup_ops: bool,
    pub emulate_subgroup_ops_extended_types: bool,
    pub emulate_generic_ptrs: bool,
    pub emulate_physical_memory: bool,
    pub use_loop_for_fn_body: bool,
    pub decay_unsized_arrays: bool,
    pub dialect: BackendDialect,
    pub glsl_version: u32,
    pub target_ptr_width_bytes: u8,
}

/// One target family per spec.md §6's `dialect ∈ {C11, CUDA, GLSL, ISPC}`,
/// plus `SpirV` for the binary backend.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BackendDialect {
    SpirV,
    C11,
    Cuda,
    Glsl,
    Ispc,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            allow_frontend_syntax: false,
            per_thread_stack_size: 4096,
            per_subgroup_stack_size: 4096,
            subgroup_size: 32,
            target_spirv_version_major: 1,
            target_spirv_version_minor: 5,
            lower_int64: false,
            emulate_subgroup_ops: false,
            emulate_subgroup_ops_extended_types: false,
            emulate_generic_ptrs: false,
            emulate_physical_memory: false,
            use_loop_for_fn_body: false,
            decay_unsized_arrays: false,
            dialect: BackendDialect::SpirV,
            glsl_version: 460,
            target_ptr_width_bytes: 8,
        }
    }
}

impl CompilerConfig {
    fn pass_config(&self) -> PassConfig {
        PassConfig {
            lower_int64: self.lower_int64,
            emulate_subgroup_ops: self.emulate_subgroup_ops,
            emulate_subgroup_ops_extended_types: self.emulate_subgroup_ops_extended_types,
            emulate_generic_ptrs: self.emulate_generic_ptrs,
            emulate_physical_memory: self.emulate_physical_memory,
            use_loop_for_fn_body: self.use_loop_for_fn_body,
            decay_unsized_arrays: self.decay_unsized_arrays,
            target_ptr_width_bytes: self.target_ptr_width_bytes,
            restructure_cf: !self.use_loop_for_fn_body,
        }
    }

    fn arena_config(&self) -> ArenaConfig {
        ArenaConfig {
            target_ptr_width_bytes: self.target_ptr_width_bytes,
            subgroup_mask_width: self.subgroup_size.next_power_of_two().max(32),
            ..ArenaConfig::default()
        }
    }
}

/// Whatever an emitter produced, tagged by backend (spec.md §6: "SPIR-V
/// output"/"C-family output" are the two shapes a caller gets back).
#[derive(Debug)]
pub enum EmittedArtifact {
    SpirV(SpirvModule),
    CFamily(String),
}

/// The four error kinds spec.md §7 names, surfaced at the top-level
/// entry point as a single failure cause (§7 "Propagation policy").
#[derive(Debug, thiserror::Error)]
pub enum CompilationError {
    #[error("user error: {reason}")]
    UserError { reason: String },
    #[error("invariant violation: {0}")]
    InvariantViolation(#[from] shady_analysis::VerifyError),
    #[error("pass bailout escaped to the pipeline caller: {reason}")]
    PassBailout { reason: String },
    #[error("backend-unsupported construct: {0}")]
    UnsupportedConstruct(#[from] EmitError),
}

impl From<PassError> for CompilationError {
    fn from(err: PassError) -> Self {
        match err {
            PassError::UnresolvedName { name } => CompilationError::UserError { reason: format!("could not resolve name {name:?}") },
            PassError::Check(check_err) => CompilationError::UserError { reason: check_err.to_string() },
            PassError::Verify(verify_err) => CompilationError::InvariantViolation(verify_err),
            PassError::Bail { reason } => CompilationError::PassBailout { reason },
            PassError::Unsupported { reason } => CompilationError::PassBailout { reason },
        }
    }
}

/// `0` on success, non-zero otherwise (spec.md §6 "Exit codes"). Not
/// wired to `std::process::exit` anywhere in this crate — CLI argument
/// parsing and process exit are out of scope (spec.md §1's Non-goals);
/// a prospective CLI driver calls this to decide its own exit code.
pub fn exit_code(result: &Result<EmittedArtifact, CompilationError>) -> i32 {
    match result {
        Ok(_) => 0,
        Err(CompilationError::UserError { .. }) => 1,
        Err(CompilationError::InvariantViolation(_)) => 2,
        Err(CompilationError::PassBailout { .. }) => 3,
        Err(CompilationError::UnsupportedConstruct(_)) => 4,
    }
}

pub type CompilationResult = Result<EmittedArtifact, CompilationError>;

/// Drives the fixed pass order (spec.md §4.5) over a source `Module`,
/// then dispatches to whichever backend `CompilerConfig::dialect` names.
///
/// Grounded on `cranelift_codegen::Context::compile`: one driver struct
/// wrapping a linear sequence of fallible passes, each producing the
/// input to the next, with early return on the first failure.
pub struct Pipeline {
    config: CompilerConfig,
}

impl Pipeline {
    pub fn new(config: CompilerConfig) -> Pipeline {
        Pipeline { config }
    }

    pub fn run(&self, src_arena: &Arena, src: &Module) -> CompilationResult {
        let pass_cfg = self.config.pass_config();
        macro_rules! run_pass {
            ($pass:path, $arena:expr, $module:expr) => {
                $pass($arena, $module, &pass_cfg).map_err(CompilationError::from)?
            };
        }

        let (arena, module) = run_pass!(shady_passes::bind::run, src_arena, src);
        let (arena, module) = run_pass!(shady_passes::normalize::run, &arena, &module);
        let (arena, module) = run_pass!(shady_passes::normalize_builtins::run, &arena, &module);
        let (arena, module) = run_pass!(shady_passes::infer::run, &arena, &module);
        let (arena, module) = run_pass!(shady_passes::lower_cf_instrs::run, &arena, &module);
        let (arena, module) = if pass_cfg.restructure_cf {
            run_pass!(shady_passes::restructurize::run, &arena, &module)
        } else {
            (arena, module)
        };
        let (arena, module) = run_pass!(shady_passes::lift_everything::run, &arena, &module);
        let (arena, module) = run_pass!(shady_passes::lower_int64::run, &arena, &module);
        let (arena, module) = run_pass!(shady_passes::lower_subgroup_ops::run, &arena, &module);
        let (arena, module) = run_pass!(shady_passes::lower_lea::run, &arena, &module);
        let (arena, module) = run_pass!(shady_passes::lower_decay_ptrs::run, &arena, &module);

        shady_analysis::verify::verify_module(&arena, &module)?;
        log::debug!("pipeline completed, emitting for {:?}", self.config.dialect);
        self.emit(&arena, &module)
    }

    fn emit(&self, arena: &Arena, module: &Module) -> CompilationResult {
        match self.config.dialect {
            BackendDialect::SpirV => {
                let spirv_cfg = SpirvConfig { version_major: self.config.target_spirv_version_major, version_minor: self.config.target_spirv_version_minor };
                let emitter = SpirvEmitter::new(arena, module, spirv_cfg);
                Ok(EmittedArtifact::SpirV(emitter.emit_module()?))
            }
            other => {
                let dialect = match other {
                    BackendDialect::C11 => Dialect::C11,
                    BackendDialect::Cuda => Dialect::Cuda,
                    BackendDialect::Glsl => Dialect::Glsl,
                    BackendDialect::Ispc => Dialect::Ispc,
                    BackendDialect::SpirV => unreachable!(),
                };
                let c_cfg = CConfig { dialect, glsl_version: self.config.glsl_version };
                let emitter = CEmitter::new(arena, module, c_cfg);
                Ok(EmittedArtifact::CFamily(emitter.emit_module()?))
            }
        }
    }

    /// Allocate the initial source-side `Arena` a front-end should
    /// populate before calling [`Pipeline::run`] — `check_types` starts
    /// off so `Unbound`/`UntypedNumber` nodes (legal only before `bind`/
    /// `infer`) can be interned.
    pub fn new_source_arena(&self) -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..self.config.arena_config() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_module_arena() -> (Arena, Module) {
        let arena = Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() });
        (arena, Module::new())
    }

    #[test]
    fn default_config_targets_spirv_1_5() {
        let cfg = CompilerConfig::default();
        assert_eq!(cfg.target_spirv_version_major, 1);
        assert_eq!(cfg.target_spirv_version_minor, 5);
        assert_eq!(cfg.dialect, BackendDialect::SpirV);
    }

    #[test]
    fn exit_code_is_zero_only_on_success() {
        let ok: CompilationResult = Ok(EmittedArtifact::CFamily(String::new()));
        assert_eq!(exit_code(&ok), 0);
        let err: CompilationResult = Err(CompilationError::UserError { reason: "x".into() });
        assert_eq!(exit_code(&err), 1);
    }

    #[test]
    fn an_empty_module_compiles_to_an_empty_c_translation_unit() {
        let (arena, module) = empty_module_arena();
        let cfg = CompilerConfig { dialect: BackendDialect::C11, ..CompilerConfig::default() };
        let pipeline = Pipeline::new(cfg);
        let result = pipeline.run(&arena, &module);
        match result {
            Ok(EmittedArtifact::CFamily(text)) => assert!(!text.is_empty()),
            other => panic!("expected a C-family artifact, got {other:?}"),
        }
    }

    #[test]
    fn pass_error_unresolved_name_maps_to_user_error() {
        let err = CompilationError::from(PassError::UnresolvedName { name: "foo".into() });
        assert!(matches!(err, CompilationError::UserError { .. }));
    }

    #[test]
    fn pass_error_bail_maps_to_pass_bailout() {
        let err = CompilationError::from(PassError::Bail { reason: "speculative loop aborted".into() });
        assert!(matches!(err, CompilationError::PassBailout { .. }));
    }
}
