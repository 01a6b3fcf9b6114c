//! Grammar normalization: implicit composite subscripts on a
//! pointer-typed base lower to `PtrCompositeElement` (spec.md §4.5 item
//! 2's second clause).
//!
//! Nothing in `original_source/src/shady/{passes,pipeline}` corresponds
//! to this pass directly, so it's grounded on spec.md's own wording plus
//! the general shape every other pass here uses (a `Rewriter` whose
//! `process` special-cases the one tag it cares about and falls through
//! to [`shady_rewrite::Rewriter::recreate_node_identity`] for the rest).
//!
//! The first clause of item 2 ("every non-trivial instruction becomes a
//! let-bound node") has no IR-level node to act on: this graph has no
//! statement list, so sequencing and let-binding is an emit-time
//! decision the `LetBinding` enum in `shady-emit` makes directly off the
//! DAG's sharing structure, not something the IR itself represents
//! before or after this pass runs. Nothing is stubbed here for it.

use crate::{fresh_arena, PassConfig, PassError};
use shady_ir::{Arena, Module, Node, NodeId, Payload, PrimOpKind};
use shady_rewrite::{RewriteFn, Rewriter};

/// Whether `id` is, syntactically and without needing inference, a node
/// that produces a pointer. Every case here is a type already present in
/// the graph as a plain structural reference (a `Param`'s `ty`, a
/// `GlobalVariable`'s `ty`) or a tag that can only ever produce a
/// pointer, so none of it needs `infer` (which hasn't run yet) to answer.
fn produces_pointer(arena: &Arena, id: NodeId) -> bool {
    match &*arena.payload_of(id) {
        Payload::NullPtr { .. }
        | Payload::LocalAlloc { .. }
        | Payload::StackAlloc { .. }
        | Payload::PtrArrayElementOffset { .. }
        | Payload::PtrCompositeElement { .. } => true,
        Payload::Param { ty, .. } => matches!(&*arena.payload_of(*ty), Payload::PtrType { .. }),
        Payload::RefDecl { decl } => {
            matches!(&*arena.payload_of(*decl), Payload::GlobalVariable { .. })
        }
        _ => false,
    }
}

pub fn run(src_arena: &Arena, src: &Module, _cfg: &PassConfig) -> Result<(Arena, Module), PassError> {
    let dst_arena = fresh_arena(src_arena, false);
    let process: &RewriteFn<'_> = &normalize_node;
    let rewriter = Rewriter::new(src_arena, &dst_arena, src, process);
    rewriter.rewrite_module();
    let module = rewriter.into_module();
    Ok((dst_arena, module))
}

fn normalize_node(r: &Rewriter<'_>, node: Node) -> Node {
    let payload = r.src_arena.payload(node).clone();
    let Payload::PrimOp { op: PrimOpKind::Extract, type_args, operands } = &payload else {
        return r.recreate_node_identity(node);
    };
    if operands.len() != 2 || !produces_pointer(r.src_arena, operands[0]) {
        return r.recreate_node_identity(node);
    }
    let _ = type_args;
    let ptr = r.rewrite_operand(operands[0]);
    let index = r.rewrite_operand(operands[1]);
    r.dst_arena
        .intern_node(Payload::PtrCompositeElement { ptr, index })
        .expect("PtrCompositeElement of already-rewritten operands always type-checks in an unchecked arena")
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::{ArenaConfig, NodeIdVec};

    fn unchecked() -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() })
    }

    #[test]
    fn extract_on_a_pointer_becomes_ptr_composite_element() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let ptr_ty = src
            .intern_node(Payload::PtrType {
                pointee: i32_ty.id(),
                address_space: shady_ir::AddressSpace::Generic,
                is_reference: false,
            })
            .unwrap();
        let name = src.intern_string("p");
        let param = src.declare(Payload::Param { ty: ptr_ty.id(), name });
        let idx = src.intern_node(Payload::IntLiteral { width: 32, signed: true, value: 0 }).unwrap();
        let extract = src
            .intern_node(Payload::PrimOp {
                op: PrimOpKind::Extract,
                type_args: NodeIdVec::new(),
                operands: [param.id(), idx.id()].into_iter().collect(),
            })
            .unwrap();
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(extract.id(), 1) }).unwrap();
        let block_name = src.intern_string("entry");
        let entry = src.declare(Payload::BasicBlock {
            params: NodeIdVec::from_elem(param.id(), 1),
            body: Some(ret.id()),
            name: block_name,
        });
        let fn_name = src.intern_string("f");
        let function = src.declare(Payload::Function {
            annotations: vec![],
            name: fn_name,
            params: NodeIdVec::from_elem(param.id(), 1),
            return_types: NodeIdVec::new(),
            body: Some(entry.id()),
        });
        let mut module = Module::new();
        module.add_declaration(function);

        let (dst_arena, dst_module) = run(&src, &module, &PassConfig::default()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a function body");
        };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else {
            panic!("expected a return terminator");
        };
        assert!(matches!(&*dst_arena.payload_of(args[0]), Payload::PtrCompositeElement { .. }));
    }

    #[test]
    fn extract_on_a_plain_value_is_left_alone() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let name = src.intern_string("v");
        let param = src.declare(Payload::Param { ty: i32_ty.id(), name });
        let idx = src.intern_node(Payload::IntLiteral { width: 32, signed: true, value: 0 }).unwrap();
        let extract = src
            .intern_node(Payload::PrimOp {
                op: PrimOpKind::Extract,
                type_args: NodeIdVec::new(),
                operands: [param.id(), idx.id()].into_iter().collect(),
            })
            .unwrap();

        let dst = unchecked();
        let module = Module::new();
        let process: &RewriteFn<'_> = &normalize_node;
        let rewriter = Rewriter::new(&src, &dst, &module, process);
        let rewritten = rewriter.rewrite_node(extract);
        assert!(matches!(&*dst.payload(rewritten), Payload::PrimOp { op: PrimOpKind::Extract, .. }));
    }
}
