//! The per-dialect instruction-selection table: how a [`PrimOpKind`] is
//! rendered as C-family text.
//!
//! Grounded on `examples/original_source/src/backend/c/emit_c_instructions.c`'s
//! `isel_table`/`isel_table_c`/`isel_table_glsl`/`isel_table_glsl_120`/
//! `isel_table_ispc` arrays: a dialect-independent fallback table for the
//! ops every C-family dialect spells the same way (the algebraic,
//! comparison, and bitwise ops — `[add_op] = { IsMono, OsInfix, "+" }`)
//! plus dialect-specific overlay tables consulted first. The original
//! also distinguishes `IsMono` (one spelling for every scalar type) from
//! `IsPoly` (a spelling per signed/unsigned/float width, e.g.
//! `.f_ops = {"sinf", "sinf", "sin"}` for `f32`/`f16`/`f64`); that
//! distinction is kept here as [`TypeClass`]-keyed overlay entries versus
//! [`IselTable::mono`] entries, rather than collapsing to one table that
//! would force every dialect to spell every overload explicitly.
//!
//! `reinterpret_op`/`convert_op`/`offset_of_op`/`add_carry_op`/
//! `sub_borrow_op`/`mul_extended_op`/`select_op`/`extract_op`/`insert_op`/
//! `shuffle_op`/`subgroup_elect_first_op` are all dedicated cases in the
//! original's `emit_instruction`, outside `isel_table` entirely (the
//! extended-arithmetic ones are even an outright `error("TODO: implement
//! extended arithm ops in C")` there); `c::CEmitter` mirrors that split by
//! handling `Reinterpret`/`Convert`/`AddCarry`/`SubBorrow`/`MulExtended`/
//! `Select`/`Extract`/`Insert`/`Shuffle`/`SubgroupElect` directly rather
//! than routing them through this table, and this table only covers the
//! ops the original's `isel_table*` arrays actually list.

use shady_ir::PrimOpKind;
use std::collections::HashMap;

/// How a primop's arguments are laid out around its spelling (spec.md
/// §4.6 "ISel table"), mirroring the original's `OpStyle` enum
/// (`OsInfix`/`OsPrefix`/`OsCall`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EmitStyle {
    /// `a OP b` (binary) — the spelling is the infix operator text.
    Infix(&'static str),
    /// `OP a` (unary) — the spelling is the prefix operator text.
    Prefix(&'static str),
    /// `name(args…)` — the spelling is the callee name.
    Call(&'static str),
}

/// The scalar type family an overload is keyed on, mirroring the
/// original's `u_ops`/`s_ops`/`f_ops` three-way split.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TypeClass {
    Unsigned,
    Signed,
    Float,
}

impl TypeClass {
    pub fn of(signed: bool, is_float: bool) -> TypeClass {
        if is_float {
            TypeClass::Float
        } else if signed {
            TypeClass::Signed
        } else {
            TypeClass::Unsigned
        }
    }
}

/// A dialect's view of how every [`PrimOpKind`] should be spelled,
/// layered over a shared fallback (spec.md §4.6: "A fallback table
/// covers ops common to all dialects").
pub struct IselTable {
    mono: HashMap<PrimOpKind, EmitStyle>,
    poly: HashMap<(PrimOpKind, TypeClass), EmitStyle>,
    fallback: Option<Box<IselTable>>,
}

impl IselTable {
    fn empty() -> IselTable {
        IselTable { mono: HashMap::new(), poly: HashMap::new(), fallback: None }
    }

    fn with_fallback(fallback: IselTable) -> IselTable {
        IselTable { mono: HashMap::new(), poly: HashMap::new(), fallback: Some(Box::new(fallback)) }
    }

    fn mono(mut self, op: PrimOpKind, style: EmitStyle) -> Self {
        self.mono.insert(op, style);
        self
    }

    fn poly(mut self, op: PrimOpKind, class: TypeClass, style: EmitStyle) -> Self {
        self.poly.insert((op, class), style);
        self
    }

    /// Look up `op`'s rendering for a value of the given type class,
    /// checking this table's poly then mono entries before falling back
    /// to the dialect-independent table (`isel_table` consulted after
    /// `isel_table_c`/`_glsl`/`_ispc` in the original).
    pub fn lookup(&self, op: PrimOpKind, class: TypeClass) -> Option<EmitStyle> {
        if let Some(style) = self.poly.get(&(op, class)) {
            return Some(*style);
        }
        if let Some(style) = self.mono.get(&op) {
            return Some(*style);
        }
        self.fallback.as_ref().and_then(|f| f.lookup(op, class))
    }

    /// The dialect-independent table: algebraic, comparison, and bitwise
    /// ops every C-family dialect spells identically (`isel_table` in the
    /// original — the commented-out shift rows are deliberately included
    /// here since this port's `Shr` has no arithmetic/logical split to
    /// resolve, unlike the original's `rshift_arithm_op`/
    /// `rshift_logical_op`).
    pub fn common() -> IselTable {
        use EmitStyle::*;
        use PrimOpKind::*;
        IselTable::empty()
            .mono(Add, Infix("+"))
            .mono(Sub, Infix("-"))
            .mono(Mul, Infix("*"))
            .mono(Div, Infix("/"))
            .mono(Mod, Infix("%"))
            .mono(Eq, Infix("=="))
            .mono(Neq, Infix("!="))
            .mono(Lt, Infix("<"))
            .mono(Lte, Infix("<="))
            .mono(Gt, Infix(">"))
            .mono(Gte, Infix(">="))
            .mono(And, Infix("&"))
            .mono(Or, Infix("|"))
            .mono(Xor, Infix("^"))
            .mono(Not, Prefix("!"))
            .mono(Shl, Infix("<<"))
            .mono(Shr, Infix(">>"))
            // `%` is not defined on C float types; this is the one place
            // in the common table a type class actually changes the
            // spelling rather than just the width.
            .poly(Mod, TypeClass::Float, Call("fmod"))
    }

    /// C11/CUDA: `subgroup_ballot_op`'s `packmask` spelling is ISPC-only
    /// in the original (see [`IselTable::ispc`]); CUDA/C11 have no
    /// `isel_table`-driven entry for it in the source excerpt available
    /// here, so CUDA gets the natural warp-vote intrinsic and plain C11
    /// has none (left to [`IselTable::lookup`] returning `None`, which
    /// `c::CEmitter` turns into `EmitError::Unsupported`).
    pub fn c_family() -> IselTable {
        use EmitStyle::*;
        use PrimOpKind::*;
        IselTable::with_fallback(IselTable::common()).mono(SubgroupBallot, Call("__ballot_sync"))
    }

    /// GLSL: bitwise ops on `bool` route through the boolean keywords in
    /// GLSL ≤120 rather than `&`/`|`/`^`/`!` (`isel_table_glsl_120` in the
    /// original); `GL_KHR_shader_subgroup`'s `subgroupBroadcastFirst`/
    /// `subgroupBallot` builtins are the natural GLSL spelling for the two
    /// subgroup ops the original's table does cover elsewhere
    /// (inferred — the excerpt available here only shows ISPC's
    /// `packmask`/`lanemask`/`reduce_add` row, not a GLSL subgroup table).
    pub fn glsl(glsl_version: u32) -> IselTable {
        use EmitStyle::*;
        use PrimOpKind::*;
        let mut t = IselTable::with_fallback(IselTable::common())
            .mono(SubgroupBroadcastFirst, Call("subgroupBroadcastFirst"))
            .mono(SubgroupBallot, Call("subgroupBallot"));
        if glsl_version <= 120 {
            t = t
                .mono(Mod, Call("mod"))
                .mono(And, Call("and"))
                .mono(Or, Call("or"))
                .mono(Xor, Call("xor"))
                .mono(Not, Call("not"));
        }
        t
    }

    /// ISPC: `subgroup_ballot_op -> packmask` is the one subgroup row the
    /// original's `isel_table_ispc` actually carries;
    /// `SubgroupBroadcastFirst -> broadcast` follows the same
    /// "programIndex"-based cross-lane builtin family but has no literal
    /// table row in the excerpt available here (inferred).
    pub fn ispc() -> IselTable {
        use EmitStyle::*;
        use PrimOpKind::*;
        IselTable::with_fallback(IselTable::common())
            .mono(SubgroupBroadcastFirst, Call("broadcast"))
            .mono(SubgroupBallot, Call("packmask"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_table_maps_add_to_infix_plus() {
        let t = IselTable::common();
        assert_eq!(t.lookup(PrimOpKind::Add, TypeClass::Signed), Some(EmitStyle::Infix("+")));
    }

    #[test]
    fn glsl_120_overlay_shadows_the_common_infix_xor() {
        let t = IselTable::glsl(120);
        assert_eq!(t.lookup(PrimOpKind::Xor, TypeClass::Unsigned), Some(EmitStyle::Call("xor")));
    }

    #[test]
    fn glsl_400_falls_back_to_the_common_infix_xor() {
        let t = IselTable::glsl(450);
        assert_eq!(t.lookup(PrimOpKind::Xor, TypeClass::Unsigned), Some(EmitStyle::Infix("^")));
    }

    #[test]
    fn float_mod_overrides_the_integer_percent_operator() {
        let t = IselTable::common();
        assert_eq!(t.lookup(PrimOpKind::Mod, TypeClass::Float), Some(EmitStyle::Call("fmod")));
        assert_eq!(t.lookup(PrimOpKind::Mod, TypeClass::Signed), Some(EmitStyle::Infix("%")));
    }

    #[test]
    fn an_op_with_no_entry_anywhere_misses() {
        let t = IselTable::common();
        assert_eq!(t.lookup(PrimOpKind::Convert, TypeClass::Signed), None);
    }
}
