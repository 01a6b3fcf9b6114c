//! Unsized-array pointer decay (spec.md §4.5 item 11), gated by
//! `PassConfig::decay_unsized_arrays`.
//!
//! Grounded on `examples/original_source/src/shady/passes/ptr/
//! lower_decay_ptrs.c`, which is a one-case pass: a `PtrType` whose
//! pointee is an `ArrType` with no `size` (a C-style flexible-array-
//! member tail, or a pointer that's merely annotated as pointing into
//! an array of unknown length) decays into a pointer to the array's
//! element type directly, dropping the `ArrType` wrapper. The original
//! builds the decayed `PtrType` with a designated initializer that
//! only names `pointed_type`/`address_space`, so `is_reference` comes
//! out false regardless of the input pointer's own flag; that's
//! reproduced here rather than threaded through, to stay faithful to
//! what the source actually emits rather than what a reference
//! implementation "should" preserve.
//!
//! `PtrCompositeElement` navigation onto an unsized trailing record
//! field is the one combination this decay can't make sense of (there's
//! no element stride to decay a field access into — see decision 2 in
//! DESIGN.md's "Open Question decisions"): that case is
//! `PassError::Unsupported` rather than silently guessed at.

use crate::{fresh_arena, PassConfig, PassError};
use shady_ir::{Arena, Module, Node, Payload};
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
    if !cfg.decay_unsized_arrays {
        return r.recreate_node_identity(node);
    }
    let payload = r.src_arena.payload(node).clone();
    match &payload {
        Payload::PtrType { pointee, address_space, .. } => match &*r.src_arena.payload_of(*pointee) {
            Payload::ArrType { elem, size: None } => {
                let new_elem = r.rewrite_operand(*elem);
                r.dst_arena
                    .intern_node(Payload::PtrType { pointee: new_elem, address_space: *address_space, is_reference: false })
                    .unwrap()
            }
            _ => r.recreate_node_identity(node),
        },
        Payload::PtrCompositeElement { ptr, index } => {
            if trailing_member_is_unsized_array(r.src_arena, *ptr, *index) {
                panic!("lower_decay_ptrs: composite-element access into an unsized trailing array field is unsupported");
            }
            r.recreate_node_identity(node)
        }
        _ => r.recreate_node_identity(node),
    }
}

/// Whether `ptr`'s pointee is a record whose `index`-th member is a
/// trailing `ArrType` with no `size` — the one shape decision 2 in
/// DESIGN.md's "Open Question decisions" rules out rather than decays.
fn trailing_member_is_unsized_array(arena: &Arena, ptr: shady_ir::NodeId, index: shady_ir::NodeId) -> bool {
    let Payload::IntLiteral { value, .. } = &*arena.payload_of(index) else {
        return false;
    };
    let pointee = match &*arena.payload_of(ptr) {
        Payload::Param { ty, .. } => match &*arena.payload_of(*ty) {
            Payload::QualifiedType { inner, .. } => Some(*inner),
            _ => Some(*ty),
        },
        Payload::StackAlloc { ty } | Payload::LocalAlloc { ty } => Some(*ty),
        _ => None,
    };
    let Some(pointee) = pointee.and_then(|p| match &*arena.payload_of(p) {
        Payload::PtrType { pointee, .. } => Some(*pointee),
        _ => None,
    }) else {
        return false;
    };
    let Payload::RecordType { members, .. } = &*arena.payload_of(pointee) else {
        return false;
    };
    match members.get(*value as usize) {
        Some(member) => matches!(&*arena.payload_of(*member), Payload::ArrType { size: None, .. }),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::{ArenaConfig, NodeIdVec};

    fn unchecked() -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() })
    }

    fn decay_cfg() -> PassConfig {
        PassConfig { decay_unsized_arrays: true, ..PassConfig::default() }
    }

    fn function_returning(src: &Arena, ty_for_param: Node) -> Module {
        let name = src.intern_string("p");
        let param = src.declare(Payload::Param { ty: ty_for_param.id(), name });
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(param.id(), 1) }).unwrap();
        let block_name = src.intern_string("entry");
        let entry = src.declare(Payload::BasicBlock { params: NodeIdVec::new(), body: Some(ret.id()), name: block_name });
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
        module
    }

    #[test]
    fn a_pointer_to_an_unsized_array_decays_to_a_pointer_to_its_element() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let arr = src.intern_node(Payload::ArrType { elem: i32_ty.id(), size: None }).unwrap();
        let ptr_ty = src
            .intern_node(Payload::PtrType { pointee: arr.id(), address_space: shady_ir::AddressSpace::Global, is_reference: false })
            .unwrap();
        let module = function_returning(&src, ptr_ty);

        let (dst_arena, dst_module) = run(&src, &module, &decay_cfg()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { params, .. } = &*dst_arena.payload(dst_function) else { panic!() };
        let Payload::Param { ty, .. } = &*dst_arena.payload_of(params[0]) else { panic!() };
        let Payload::PtrType { pointee, .. } = &*dst_arena.payload_of(*ty) else {
            panic!("expected the param's type to stay a pointer");
        };
        assert!(matches!(&*dst_arena.payload_of(*pointee), Payload::Int { width: 32, .. }), "the ArrType wrapper should be gone");
    }

    #[test]
    fn a_sized_array_pointer_is_left_untouched() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let arr = src.intern_node(Payload::ArrType { elem: i32_ty.id(), size: Some(4) }).unwrap();
        let ptr_ty = src
            .intern_node(Payload::PtrType { pointee: arr.id(), address_space: shady_ir::AddressSpace::Global, is_reference: false })
            .unwrap();
        let module = function_returning(&src, ptr_ty);

        let (dst_arena, dst_module) = run(&src, &module, &decay_cfg()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { params, .. } = &*dst_arena.payload(dst_function) else { panic!() };
        let Payload::Param { ty, .. } = &*dst_arena.payload_of(params[0]) else { panic!() };
        let Payload::PtrType { pointee, .. } = &*dst_arena.payload_of(*ty) else { panic!() };
        assert!(matches!(&*dst_arena.payload_of(*pointee), Payload::ArrType { size: Some(4), .. }));
    }

    #[test]
    fn disabled_leaves_unsized_array_pointers_untouched() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let arr = src.intern_node(Payload::ArrType { elem: i32_ty.id(), size: None }).unwrap();
        let ptr_ty = src
            .intern_node(Payload::PtrType { pointee: arr.id(), address_space: shady_ir::AddressSpace::Global, is_reference: false })
            .unwrap();
        let module = function_returning(&src, ptr_ty);

        let (dst_arena, dst_module) = run(&src, &module, &PassConfig::default()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { params, .. } = &*dst_arena.payload(dst_function) else { panic!() };
        let Payload::Param { ty, .. } = &*dst_arena.payload_of(params[0]) else { panic!() };
        let Payload::PtrType { pointee, .. } = &*dst_arena.payload_of(*ty) else { panic!() };
        assert!(matches!(&*dst_arena.payload_of(*pointee), Payload::ArrType { size: None, .. }));
    }
}
