//! Uniformity inference: every node gets a concrete, cached type,
//! replacing the deliberately-imprecise `Uniformity::Unknown` that
//! [`shady_ir::check::type_of`] hands back for every `PrimOp` (spec.md
//! §4.5 item 4).
//!
//! `check::type_of`'s own comment on that placeholder, for the
//! arithmetic group specifically, is this pass's grounding: "full
//! per-operand unification happens in `shady-passes::infer`, which has
//! the whole function's context." This module has that context because
//! it runs as a `Rewriter`, which visits every operand before the node
//! that uses it — so by the time a `PrimOp`'s type is computed, every
//! one of its operands already has its real, meet-computed uniformity
//! cached in the destination arena. The same placeholder leaks into
//! every other `PrimOp` group too (comparisons, `Not`,
//! `Convert`/`Select`/...), not just arithmetic, so this pass fixes the
//! uniformity component there as well — only the arithmetic group's
//! *inner* type also needs recomputing, since `check::type_of` stubs it
//! to `unit` rather than the operand type it should mirror.
//!
//! The destination arena is built with `check_types: false` so
//! `Arena::intern_node` never tries to compute (and cache) a type on its
//! own; this pass is the sole writer of every node's type cache, exactly
//! once each, sidestepping `Arena::set_type_cache`'s "written twice with
//! a different value" hazard entirely rather than working around it.
//! There is no `original_source/` file named `infer.c` in this pack; the
//! rest of this pass's behavior (falling through to `check::type_of` for
//! every non-arithmetic tag) is grounded on that function's own doc
//! comment and the general shape every pass in this crate follows.

use crate::{fresh_arena, PassConfig, PassError};
use shady_ir::{Arena, Module, Node, NodeClass, NodeId, Payload, PrimOpKind, Uniformity};
use shady_rewrite::{RewriteFn, Rewriter};
use std::cell::RefCell;

fn is_arithmetic(op: PrimOpKind) -> bool {
    use PrimOpKind::*;
    matches!(op, Add | Sub | Mul | Div | Mod | And | Or | Xor | Shl | Shr)
}

pub fn run(src_arena: &Arena, src: &Module, _cfg: &PassConfig) -> Result<(Arena, Module), PassError> {
    let dst_arena = fresh_arena(src_arena, false);
    let error: RefCell<Option<PassError>> = RefCell::new(None);

    let process: &RewriteFn<'_> = &|r, node| infer_node(r, node, &error);
    let rewriter = Rewriter::new(src_arena, &dst_arena, src, process);
    rewriter.rewrite_module();

    if let Some(err) = error.borrow_mut().take() {
        return Err(err);
    }
    let module = rewriter.into_module();
    Ok((dst_arena, module))
}

fn infer_node(r: &Rewriter<'_>, node: Node, error: &RefCell<Option<PassError>>) -> Node {
    let rewritten = r.recreate_node_identity(node);
    let class = r.dst_arena.payload(rewritten).kind().class();
    if !matches!(class, NodeClass::Type | NodeClass::Declaration) {
        infer_type(r.dst_arena, rewritten, error);
    }
    rewritten
}

fn infer_type(arena: &Arena, node: Node, error: &RefCell<Option<PassError>>) {
    // Structural interning may have handed back a node this pass already
    // typed (the same payload visited via two different operand paths).
    if arena.type_of_cached(node).is_some() {
        return;
    }
    let payload = arena.payload(node).clone();

    if let Payload::UntypedNumber { .. } = &payload {
        // The front end this pass's input is expected to have gone
        // through never leaves an untyped numeral this late; if one does
        // survive, default it to a 32-bit signed integer rather than
        // leaving it untyped, matching `IntLiteral`'s own default width
        // in `check::type_of`.
        let int32 = arena.intern_node(Payload::Int { width: 32, signed: true }).unwrap().id();
        let ty = arena
            .intern_node(Payload::QualifiedType { uniformity: Uniformity::Uniform, inner: int32 })
            .unwrap()
            .id();
        arena.set_type_cache(node, ty);
        return;
    }

    if let Payload::PrimOp { op, operands, .. } = &payload {
        infer_primop(arena, node, &payload, *op, operands, error);
        return;
    }

    match shady_ir::check::type_of(arena, &payload) {
        Ok(Some(ty)) => arena.set_type_cache(node, ty),
        Ok(None) => {}
        Err(err) => {
            error.borrow_mut().get_or_insert(PassError::Check(err));
        }
    }
}

/// Every `PrimOp` gets `Uniformity::Unknown` from `check::type_of` — not
/// only the arithmetic group its doc comment names, every other group
/// (comparisons, `Not`, `Convert`/`Select`/...) hits the same placeholder
/// — so this replaces the uniformity component for all of them with the
/// real meet of every operand's uniformity. The *inner* type is only
/// recomputed for the arithmetic group (it mirrors the first operand's
/// inner type, where `check::type_of`'s placeholder uses `unit`
/// unconditionally); every other group keeps whatever inner type
/// `check::type_of` already assigns it (`bool` for comparisons, a
/// multi-return record for the carry ops), since those are correct
/// as-is and only their uniformity was ever a stand-in.
fn infer_primop(
    arena: &Arena,
    node: Node,
    payload: &Payload,
    op: PrimOpKind,
    operands: &[NodeId],
    error: &RefCell<Option<PassError>>,
) {
    let placeholder = match shady_ir::check::type_of(arena, payload) {
        Ok(Some(ty)) => ty,
        Ok(None) => return,
        Err(err) => {
            error.borrow_mut().get_or_insert(PassError::Check(err));
            return;
        }
    };
    let Payload::QualifiedType { inner: placeholder_inner, .. } = &*arena.payload_of(placeholder) else {
        unreachable!("check::type_of always wraps a PrimOp's result in a QualifiedType")
    };
    let uniformity = operands
        .iter()
        .filter_map(|&o| qualified_parts(arena, o).map(|(u, _)| u))
        .fold(Uniformity::Uniform, |acc, u| acc.meet(u));
    let inner = if is_arithmetic(op) {
        qualified_parts(arena, operands[0]).map(|(_, inner)| inner).unwrap_or(*placeholder_inner)
    } else {
        *placeholder_inner
    };
    let ty = arena
        .intern_node(Payload::QualifiedType { uniformity, inner })
        .expect("a qualified type built from already-typed operands always type-checks");
    arena.set_type_cache(node, ty.id());
}

fn qualified_parts(arena: &Arena, operand: NodeId) -> Option<(Uniformity, NodeId)> {
    let ty = arena.type_of_cached(arena.node_handle(operand))?;
    match &*arena.payload_of(ty) {
        Payload::QualifiedType { uniformity, inner } => Some((*uniformity, *inner)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::{ArenaConfig, NodeIdVec};

    fn unchecked() -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() })
    }

    #[test]
    fn varying_plus_uniform_infers_varying() {
        let src = unchecked();
        let a = src.intern_node(Payload::LocalAlloc { ty: src.intern_node(Payload::Int { width: 32, signed: true }).unwrap().id() }).unwrap();
        let a_val = src.intern_node(Payload::Load { ptr: a.id() }).unwrap(); // Load is Varying
        let one = src.intern_node(Payload::IntLiteral { width: 32, signed: true, value: 1 }).unwrap(); // Uniform
        let sum = src
            .intern_node(Payload::PrimOp {
                op: PrimOpKind::Add,
                type_args: NodeIdVec::new(),
                operands: [a_val.id(), one.id()].into_iter().collect(),
            })
            .unwrap();
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(sum.id(), 1) }).unwrap();
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

        let (dst_arena, dst_module) = run(&src, &module, &PassConfig::default()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a body");
        };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else {
            panic!("expected a return");
        };
        let sum_ty = dst_arena.type_of_cached(dst_arena.node_handle(args[0])).expect("sum should be typed");
        let Payload::QualifiedType { uniformity, .. } = &*dst_arena.payload_of(sum_ty) else {
            panic!("expected a qualified type");
        };
        assert_eq!(*uniformity, Uniformity::Varying);
    }

    #[test]
    fn untyped_number_defaults_to_signed_32_bit() {
        let src = unchecked();
        let literal_str = src.intern_string("7");
        let untyped = src.intern_node(Payload::UntypedNumber { literal: literal_str }).unwrap();
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(untyped.id(), 1) }).unwrap();
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

        let (dst_arena, dst_module) = run(&src, &module, &PassConfig::default()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a body");
        };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else {
            panic!("expected a return");
        };
        let ty = dst_arena.type_of_cached(dst_arena.node_handle(args[0])).unwrap();
        let Payload::QualifiedType { inner, .. } = &*dst_arena.payload_of(ty) else {
            panic!("expected a qualified type");
        };
        assert!(matches!(&*dst_arena.payload_of(*inner), Payload::Int { width: 32, signed: true }));
    }
}
