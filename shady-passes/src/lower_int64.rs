//! 64-bit integer emulation for backends without native `i64` (spec.md
//! §4.5 item 8), gated by `PassConfig::lower_int64`.
//!
//! Grounded on `examples/original_source/src/shady/passes/lower_int64.c`:
//! an `Int{width:64}` type becomes a two-member `i32` record, an
//! `IntLiteral` of width 64 folds into its low/high halves, and a 64-bit
//! `PrimOp::Add` expands into `AddCarry` on the low halves plus two
//! chained `Add`s (with the carry) on the high halves. That file only
//! implements `Add` and leaves every other arithmetic/comparison op
//! identity-copied behind a `// TODO: convert into and then out of
//! unsigned` — but spec.md §4.5 item 8 (and its worked example) names
//! shifts split into cross-half cases and comparisons lexicographic on
//! `(hi, lo)` as part of this pass's job, so those are filled in here by
//! the same halves-and-recombine shape the C source establishes for
//! `Add`, not transliterated from any further original source.
//!
//! Every lowered 64-bit value is represented as a `Tuple` of its two
//! `i32` halves rather than going through the C source's `extract_op`
//! call at every single use site: since this pass alone decides the
//! shape (every 64-bit value it produces is exactly a two-element
//! tuple), a freshly-built pair can be destructured directly. The one
//! place an actual `Extract` still has to be emitted is a 64-bit value
//! this pass didn't just build itself (a `Param`, a `Load`, a call
//! result) — anything bound by reference rather than produced inline.
//!
//! Determining whether an operand is a 64-bit integer doesn't have a
//! cached type to consult (`infer`'s cache lives in its own arena, and
//! no pass downstream of it carries that cache forward into its own
//! fresh one), so this pass resolves it itself with a small structural
//! walk over literals, params, pointer loads, and chains of arithmetic
//! `PrimOp`s — not full inference, but enough to cover every shape the
//! passes upstream of this one actually produce.

use crate::{fresh_arena, PassConfig, PassError};
use shady_ir::{Arena, Module, Node, NodeId, NodeIdVec, Payload, PrimOpKind};
use shady_rewrite::{RewriteFn, Rewriter};

pub fn run(src_arena: &Arena, src: &Module, cfg: &PassConfig) -> Result<(Arena, Module), PassError> {
    let dst_arena = fresh_arena(src_arena, false);

    let process: &RewriteFn<'_> = &|r, node| process_node(r, node, cfg);
    let rewriter = Rewriter::new(src_arena, &dst_arena, src, process);
    rewriter.rewrite_module();

    let module = rewriter.into_module();

    Ok((dst_arena, module))
}

fn process_node(r: &Rewriter<'_>, node: Node, cfg: &PassConfig) -> Node {
    if !cfg.lower_int64 {
        return r.recreate_node_identity(node);
    }
    let payload = r.src_arena.payload(node).clone();
    match &payload {
        Payload::Int { width: 64, signed } => lower_int64_type(r.dst_arena, *signed),
        Payload::IntLiteral { width: 64, signed, value } => lower_int64_literal(r.dst_arena, *signed, *value),
        Payload::PrimOp { op, operands, .. } if lowerable(*op) => {
            match resolve_int_width(r.src_arena, operands[0]) {
                Some((64, signed)) => lower_primop(r, *op, operands, signed),
                _ => r.recreate_node_identity(node),
            }
        }
        _ => r.recreate_node_identity(node),
    }
}

fn lowerable(op: PrimOpKind) -> bool {
    use PrimOpKind::*;
    matches!(op, Add | Sub | And | Or | Xor | Shl | Shr | Eq | Neq | Lt | Lte | Gt | Gte)
}

/// A 64-bit integer becomes a `{lo: u32, hi: <signed-as-original i32>}`
/// record: the low half is a raw bit pattern, always unsigned; the sign,
/// if any, lives in the high half, so giving it the original
/// signedness makes every comparison and shift below fall out of the
/// halves' own operand types rather than needing a signed/unsigned
/// variant of each `PrimOpKind`.
fn lower_int64_type(dst: &Arena, signed: bool) -> Node {
    let lo = dst.intern_node(Payload::Int { width: 32, signed: false }).unwrap().id();
    let hi = dst.intern_node(Payload::Int { width: 32, signed }).unwrap().id();
    dst.intern_node(Payload::RecordType {
        members: [lo, hi].into_iter().collect(),
        names: vec![],
        special: shady_ir::RecordSpecial::Plain,
    })
    .unwrap()
}

fn lower_int64_literal(dst: &Arena, signed: bool, value: u64) -> Node {
    let lo = int_literal(dst, 32, false, value & 0xFFFF_FFFF);
    let hi = int_literal(dst, 32, signed, value >> 32);
    tuple_of(dst, lo, hi)
}

fn lower_primop(r: &Rewriter<'_>, op: PrimOpKind, operands: &[NodeId], signed: bool) -> Node {
    use PrimOpKind::*;
    match op {
        Add => lower_add(r, operands),
        Sub => lower_sub(r, operands),
        And | Or | Xor => lower_bitwise(r, op, operands),
        Eq | Neq | Lt | Lte | Gt | Gte => lower_compare(r, op, operands),
        Shl | Shr => lower_shift(r, op, operands, signed),
        _ => unreachable!("lowerable() only admits the arms handled above"),
    }
}

fn lower_add(r: &Rewriter<'_>, operands: &[NodeId]) -> Node {
    let dst = r.dst_arena;
    let (a_lo, a_hi) = halves(r, operands[0]);
    let (b_lo, b_hi) = halves(r, operands[1]);
    let carry_pair = primop2(dst, PrimOpKind::AddCarry, a_lo, b_lo);
    let lo = extract(dst, carry_pair, 0);
    let carry = extract(dst, carry_pair, 1);
    let hi_sum = primop2(dst, PrimOpKind::Add, a_hi, b_hi);
    let hi = primop2(dst, PrimOpKind::Add, hi_sum, carry);
    tuple_of(dst, lo, hi)
}

fn lower_sub(r: &Rewriter<'_>, operands: &[NodeId]) -> Node {
    let dst = r.dst_arena;
    let (a_lo, a_hi) = halves(r, operands[0]);
    let (b_lo, b_hi) = halves(r, operands[1]);
    let borrow_pair = primop2(dst, PrimOpKind::SubBorrow, a_lo, b_lo);
    let lo = extract(dst, borrow_pair, 0);
    let borrow = extract(dst, borrow_pair, 1);
    let hi_diff = primop2(dst, PrimOpKind::Sub, a_hi, b_hi);
    let hi = primop2(dst, PrimOpKind::Sub, hi_diff, borrow);
    tuple_of(dst, lo, hi)
}

fn lower_bitwise(r: &Rewriter<'_>, op: PrimOpKind, operands: &[NodeId]) -> Node {
    let dst = r.dst_arena;
    let (a_lo, a_hi) = halves(r, operands[0]);
    let (b_lo, b_hi) = halves(r, operands[1]);
    let lo = primop2(dst, op, a_lo, b_lo);
    let hi = primop2(dst, op, a_hi, b_hi);
    tuple_of(dst, lo, hi)
}

/// Lexicographic comparison on `(hi, lo)`: the high halves decide
/// unless they're equal, in which case the low halves (always compared
/// unsigned, since they're raw bit patterns) break the tie.
fn lower_compare(r: &Rewriter<'_>, op: PrimOpKind, operands: &[NodeId]) -> Node {
    use PrimOpKind::*;
    let dst = r.dst_arena;
    let (a_lo, a_hi) = halves(r, operands[0]);
    let (b_lo, b_hi) = halves(r, operands[1]);
    let hi_eq = primop2(dst, Eq, a_hi, b_hi);
    match op {
        Eq => primop2(dst, And, hi_eq, primop2(dst, Eq, a_lo, b_lo)),
        Neq => primop2(dst, Or, primop2(dst, Neq, a_hi, b_hi), primop2(dst, Neq, a_lo, b_lo)),
        Lt | Lte | Gt | Gte => {
            let hi_strict = primop2(dst, op, a_hi, b_hi);
            let lo_cmp = primop2(dst, op, a_lo, b_lo);
            primop2(dst, Or, hi_strict, primop2(dst, And, hi_eq, lo_cmp))
        }
        _ => unreachable!("lower_compare is only called for comparison ops"),
    }
}

/// Cross-half shift, guarded with `Select` so the shift amount used on
/// any single 32-bit half never reaches 32 (an undefined shift amount
/// on a 32-bit operand): `in_low_half` picks between "the shift stays
/// within the low half's own width" and "the shift has moved entirely
/// into the other half", and `amt_eq_zero` exists purely so the
/// complementary shift (`32 - amt`) is never itself computed as a
/// shift-by-32 when `amt` is zero.
fn lower_shift(r: &Rewriter<'_>, op: PrimOpKind, operands: &[NodeId], signed: bool) -> Node {
    use PrimOpKind::*;
    let dst = r.dst_arena;
    let (a_lo, a_hi) = halves(r, operands[0]);
    let amt = r.dst_arena.node_handle(r.rewrite_operand(operands[1]));

    let zero = int_literal(dst, 32, false, 0);
    let one = int_literal(dst, 32, false, 1);
    let thirty_two = int_literal(dst, 32, false, 32);
    let amt_eq_zero = primop2(dst, Eq, amt, zero);
    let in_low_half = primop2(dst, Lt, amt, thirty_two);
    let complementary_amt = select(dst, amt_eq_zero, one, primop2(dst, Sub, thirty_two, amt));
    let overflow_amt = primop2(dst, Sub, amt, thirty_two);

    match op {
        Shl => {
            let carried_up = select(dst, amt_eq_zero, zero, primop2(dst, Shr, a_lo, complementary_amt));
            let hi_in_low_half = primop2(dst, Or, primop2(dst, Shl, a_hi, amt), carried_up);
            let hi_past_low_half = primop2(dst, Shl, a_lo, overflow_amt);
            let new_hi = select(dst, in_low_half, hi_in_low_half, hi_past_low_half);
            let new_lo = select(dst, in_low_half, primop2(dst, Shl, a_lo, amt), zero);
            tuple_of(dst, new_lo, new_hi)
        }
        Shr => {
            let carried_down = select(dst, amt_eq_zero, zero, primop2(dst, Shl, a_hi, complementary_amt));
            let lo_in_low_half = primop2(dst, Or, primop2(dst, Shr, a_lo, amt), carried_down);
            let lo_past_low_half = primop2(dst, Shr, a_hi, overflow_amt);
            let new_lo = select(dst, in_low_half, lo_in_low_half, lo_past_low_half);
            let sign_fill = if signed {
                primop2(dst, Shr, a_hi, int_literal(dst, 32, false, 31))
            } else {
                zero
            };
            let new_hi = select(dst, in_low_half, primop2(dst, Shr, a_hi, amt), sign_fill);
            tuple_of(dst, new_lo, new_hi)
        }
        _ => unreachable!("lower_shift is only called for Shl/Shr"),
    }
}

/// The low/high halves of a 64-bit operand, in `dst_arena`. A value
/// this pass just built itself is literally a `Tuple` of its halves,
/// so those are read back directly; anything else (a bound `Param`, a
/// `Load`, ...) is split with an explicit `Extract`.
fn halves(r: &Rewriter<'_>, operand: NodeId) -> (Node, Node) {
    let rewritten = r.rewrite_operand(operand);
    let dst = r.dst_arena;
    let as_tuple = {
        let payload = dst.payload(dst.node_handle(rewritten));
        match &*payload {
            Payload::Tuple { contents } if contents.len() == 2 => Some((contents[0], contents[1])),
            _ => None,
        }
    };
    if let Some((lo, hi)) = as_tuple {
        return (dst.node_handle(lo), dst.node_handle(hi));
    }
    let value = dst.node_handle(rewritten);
    (extract(dst, value, 0), extract(dst, value, 1))
}

fn int_literal(dst: &Arena, width: u8, signed: bool, value: u64) -> Node {
    dst.intern_node(Payload::IntLiteral { width, signed, value }).unwrap()
}

fn tuple_of(dst: &Arena, lo: Node, hi: Node) -> Node {
    dst.intern_node(Payload::Tuple { contents: [lo.id(), hi.id()].into_iter().collect() }).unwrap()
}

fn primop2(dst: &Arena, op: PrimOpKind, a: Node, b: Node) -> Node {
    dst.intern_node(Payload::PrimOp { op, type_args: NodeIdVec::new(), operands: [a.id(), b.id()].into_iter().collect() }).unwrap()
}

fn extract(dst: &Arena, value: Node, index: u64) -> Node {
    let idx = int_literal(dst, 32, false, index);
    dst.intern_node(Payload::PrimOp {
        op: PrimOpKind::Extract,
        type_args: NodeIdVec::new(),
        operands: [value.id(), idx.id()].into_iter().collect(),
    })
    .unwrap()
}

fn select(dst: &Arena, cond: Node, if_true: Node, if_false: Node) -> Node {
    dst.intern_node(Payload::PrimOp {
        op: PrimOpKind::Select,
        type_args: NodeIdVec::new(),
        operands: [cond.id(), if_true.id(), if_false.id()].into_iter().collect(),
    })
    .unwrap()
}

/// Best-effort structural resolution of an operand's integer width and
/// signedness, without a type cache to consult (see the module doc
/// comment). Covers every shape the upstream passes actually hand this
/// one: literals, typed params, loads from locals/params, and chains of
/// arithmetic `PrimOp`s (whose result mirrors their first operand, the
/// same rule `infer` uses).
fn resolve_int_width(arena: &Arena, id: NodeId) -> Option<(u8, bool)> {
    match &*arena.payload_of(id) {
        Payload::Int { width, signed } => Some((*width, *signed)),
        Payload::QualifiedType { inner, .. } => resolve_int_width(arena, *inner),
        Payload::Param { ty, .. } => resolve_int_width(arena, *ty),
        Payload::IntLiteral { width, signed, .. } => Some((*width, *signed)),
        Payload::PrimOp { op, operands, .. } if chains_int_width(*op) && !operands.is_empty() => {
            resolve_int_width(arena, operands[0])
        }
        Payload::Load { ptr } => resolve_pointee_int_width(arena, *ptr),
        _ => None,
    }
}

fn chains_int_width(op: PrimOpKind) -> bool {
    use PrimOpKind::*;
    matches!(op, Add | Sub | Mul | Div | Mod | And | Or | Xor | Shl | Shr)
}

fn resolve_pointee_int_width(arena: &Arena, ptr: NodeId) -> Option<(u8, bool)> {
    let pointee = match &*arena.payload_of(ptr) {
        Payload::Param { ty, .. } => pointee_of_ptr_type(arena, *ty),
        Payload::StackAlloc { ty } | Payload::LocalAlloc { ty } => Some(*ty),
        _ => None,
    }?;
    resolve_int_width(arena, pointee)
}

fn pointee_of_ptr_type(arena: &Arena, ty: NodeId) -> Option<NodeId> {
    let unwrapped = match &*arena.payload_of(ty) {
        Payload::QualifiedType { inner, .. } => *inner,
        _ => ty,
    };
    match &*arena.payload_of(unwrapped) {
        Payload::PtrType { pointee, .. } => Some(*pointee),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::ArenaConfig;

    fn unchecked() -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() })
    }

    fn int64_param(src: &Arena, name: &str) -> Node {
        let ty = src.intern_node(Payload::Int { width: 64, signed: true }).unwrap();
        let qty = src.intern_node(Payload::QualifiedType { uniformity: shady_ir::Uniformity::Varying, inner: ty.id() }).unwrap();
        let name = src.intern_string(name);
        src.declare(Payload::Param { ty: qty.id(), name })
    }

    #[test]
    fn int64_type_lowers_to_a_two_member_record() {
        let src = unchecked();
        let ty = src.intern_node(Payload::Int { width: 64, signed: true }).unwrap();
        let literal = src.intern_node(Payload::IntLiteral { width: 64, signed: true, value: 0 }).unwrap();
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(literal.id(), 1) }).unwrap();
        let block_name = src.intern_string("entry");
        let entry = src.declare(Payload::BasicBlock { params: NodeIdVec::new(), body: Some(ret.id()), name: block_name });
        let fn_name = src.intern_string("f");
        let function = src.declare(Payload::Function {
            annotations: vec![],
            name: fn_name,
            params: NodeIdVec::new(),
            return_types: NodeIdVec::from_elem(ty.id(), 1),
            body: Some(entry.id()),
        });
        let mut module = Module::new();
        module.add_declaration(function);

        let cfg = PassConfig { lower_int64: true, ..PassConfig::default() };
        let (dst_arena, dst_module) = run(&src, &module, &cfg).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { return_types, .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a function");
        };
        let Payload::RecordType { members, .. } = &*dst_arena.payload_of(return_types[0]) else {
            panic!("expected the 64-bit return type to lower to a record");
        };
        assert_eq!(members.len(), 2);
    }

    #[test]
    fn int64_literal_folds_into_its_low_and_high_halves() {
        let src = unchecked();
        let literal = src.intern_node(Payload::IntLiteral { width: 64, signed: false, value: 0x0000_0002_FFFF_FFFF }).unwrap();
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(literal.id(), 1) }).unwrap();
        let block_name = src.intern_string("entry");
        let entry = src.declare(Payload::BasicBlock { params: NodeIdVec::new(), body: Some(ret.id()), name: block_name });
        let fn_name = src.intern_string("f");
        let function = src.declare(Payload::Function {
            annotations: vec![],
            name: fn_name,
            params: NodeIdVec::new(),
            return_types: NodeIdVec::new(),
            body: Some(entry.id()),
        });
        let mut module = Module::new();
        module.add_declaration(function);

        let cfg = PassConfig { lower_int64: true, ..PassConfig::default() };
        let (dst_arena, dst_module) = run(&src, &module, &cfg).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a body");
        };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else {
            panic!("expected a return");
        };
        let Payload::Tuple { contents } = &*dst_arena.payload_of(args[0]) else {
            panic!("expected the folded literal to be a two-element tuple");
        };
        let Payload::IntLiteral { value: lo, .. } = &*dst_arena.payload_of(contents[0]) else { panic!() };
        let Payload::IntLiteral { value: hi, .. } = &*dst_arena.payload_of(contents[1]) else { panic!() };
        assert_eq!(*lo, 0xFFFF_FFFF);
        assert_eq!(*hi, 2);
    }

    #[test]
    fn add_on_int64_params_expands_to_carry_propagation() {
        let src = unchecked();
        let a = int64_param(&src, "a");
        let b = int64_param(&src, "b");
        let sum = src
            .intern_node(Payload::PrimOp {
                op: PrimOpKind::Add,
                type_args: NodeIdVec::new(),
                operands: [a.id(), b.id()].into_iter().collect(),
            })
            .unwrap();
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(sum.id(), 1) }).unwrap();
        let block_name = src.intern_string("entry");
        let entry = src.declare(Payload::BasicBlock { params: NodeIdVec::new(), body: Some(ret.id()), name: block_name });
        let fn_name = src.intern_string("f");
        let function = src.declare(Payload::Function {
            annotations: vec![],
            name: fn_name,
            params: [a.id(), b.id()].into_iter().collect(),
            return_types: NodeIdVec::new(),
            body: Some(entry.id()),
        });
        let mut module = Module::new();
        module.add_declaration(function);

        let cfg = PassConfig { lower_int64: true, ..PassConfig::default() };
        let (dst_arena, dst_module) = run(&src, &module, &cfg).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a body");
        };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else {
            panic!("expected a return");
        };
        let Payload::Tuple { contents } = &*dst_arena.payload_of(args[0]) else {
            panic!("expected the sum to be a lo/hi tuple");
        };
        let Payload::PrimOp { op: lo_op, .. } = &*dst_arena.payload_of(contents[0]) else { panic!() };
        assert_eq!(*lo_op, PrimOpKind::Extract, "low half comes from the AddCarry pair");
        let Payload::PrimOp { op: hi_op, .. } = &*dst_arena.payload_of(contents[1]) else { panic!() };
        assert_eq!(*hi_op, PrimOpKind::Add, "high half chains the carry onto the high-word add");
    }

    #[test]
    fn disabled_leaves_int64_untouched() {
        let src = unchecked();
        let ty = src.intern_node(Payload::Int { width: 64, signed: true }).unwrap();
        let literal = src.intern_node(Payload::IntLiteral { width: 64, signed: true, value: 5 }).unwrap();
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(literal.id(), 1) }).unwrap();
        let block_name = src.intern_string("entry");
        let entry = src.declare(Payload::BasicBlock { params: NodeIdVec::new(), body: Some(ret.id()), name: block_name });
        let fn_name = src.intern_string("f");
        let function = src.declare(Payload::Function {
            annotations: vec![],
            name: fn_name,
            params: NodeIdVec::new(),
            return_types: NodeIdVec::from_elem(ty.id(), 1),
            body: Some(entry.id()),
        });
        let mut module = Module::new();
        module.add_declaration(function);

        let (dst_arena, dst_module) = run(&src, &module, &PassConfig::default()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { return_types, .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a function");
        };
        assert!(matches!(&*dst_arena.payload_of(return_types[0]), Payload::Int { width: 64, .. }));
    }
}
