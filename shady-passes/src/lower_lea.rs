//! Pointer-navigation lowering for address spaces with no native
//! indexing instruction (spec.md §4.5 item 10), gated by
//! `PassConfig::emulate_generic_ptrs`/`emulate_physical_memory`.
//!
//! Grounded on `examples/original_source/src/shady/pipeline/mem/lower_lea.c`:
//! a `PtrArrayElementOffset` (array-stride addressing) or
//! `PtrCompositeElement` (record-field addressing) whose base pointer
//! lives in an address space this arena marks `emulated`
//! (`ArenaConfig::address_spaces`, not the C source's hardcoded
//! `is_as_emulated`) gets rewritten into `reinterpret`-casts through a
//! plain integer of the arena's pointer width, with the stride/offset
//! folded in as ordinary integer arithmetic; every other pointer op is
//! left untouched.
//!
//! The C source computes strides and field offsets with `size_of_op`/
//! `offset_of_op` primops that this IR has no equivalent of (confirmed:
//! `PrimOpKind` has no `SizeOf`/`OffsetOf` variant, and no data-layout
//! module exists anywhere in `shady-ir`). Rather than inventing a primop
//! the rest of the pipeline would never produce or consume, this pass
//! resolves sizes and offsets itself with a small structural walk
//! (`type_byte_size`/`member_byte_offset` below) that folds straight to
//! an `IntLiteral`: every type this pass is ever asked to lower has a
//! shape fixed at compile time, so there is nothing dynamic a primop
//! would buy over a literal computed once, here, in Rust. Record layout
//! is the flat cumulative sum of member sizes in declaration order, with
//! no alignment padding — the same simplification spec.md's own type
//! tables make by not carrying a per-type alignment field.
//!
//! Like `lower_int64`/`lower_subgroup_ops`, there's no type cache to
//! consult for a `ptr` operand's pointee/address-space/reference-ness;
//! `resolve_ptr_type` below mirrors `shady_ir::check`'s private
//! `ptr_type_of` helper structurally, since that one isn't `pub`.

use crate::{fresh_arena, PassConfig, PassError};
use shady_ir::{AddressSpace, Arena, Module, Node, NodeId, NodeIdVec, Payload, PrimOpKind, RecordSpecial};
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
    let payload = r.src_arena.payload(node).clone();
    match &payload {
        Payload::PtrArrayElementOffset { ptr, offset } => {
            match resolve_ptr_type(r.src_arena, *ptr) {
                Some((pointee, address_space, is_reference)) if must_lower(r.src_arena, cfg, address_space, is_reference) => {
                    lower_ptr_offset(r, *ptr, pointee, address_space, *offset)
                        .expect("lower_lea: array-element offset on an unsized element type")
                }
                _ => r.recreate_node_identity(node),
            }
        }
        Payload::PtrCompositeElement { ptr, index } => match resolve_ptr_type(r.src_arena, *ptr) {
            Some((pointee, address_space, is_reference)) if must_lower(r.src_arena, cfg, address_space, is_reference) => {
                lower_ptr_index(r, *ptr, pointee, address_space, is_reference, *index)
                    .expect("lower_lea: composite-element offset with a non-literal or unsized index")
            }
            _ => r.recreate_node_identity(node),
        },
        _ => r.recreate_node_identity(node),
    }
}

/// Whether navigation into `address_space` must become integer
/// arithmetic: either this arena only has a generic-pointer abstraction
/// to begin with, or the space is physical but the backend has no native
/// indexing instruction for it (`ArenaConfig::address_spaces`'
/// `emulated` flag). References are never lowered by the physical-memory
/// path: a reference has no independent byte address to offset (the
/// type checker rejects `PtrArrayElementOffset` on one outright, and
/// `PtrCompositeElement` on one is field access on a value, not a
/// pointer computation).
fn must_lower(arena: &Arena, cfg: &PassConfig, address_space: AddressSpace, is_reference: bool) -> bool {
    let generic = cfg.emulate_generic_ptrs && address_space == AddressSpace::Generic;
    let physical = cfg.emulate_physical_memory && !is_reference && arena.config().address_spaces.get(address_space).emulated;
    generic || physical
}

fn lower_ptr_offset(
    r: &Rewriter<'_>,
    ptr: NodeId,
    pointee: NodeId,
    address_space: AddressSpace,
    offset: NodeId,
) -> Result<Node, PassError> {
    let dst = r.dst_arena;
    let elem = match &*r.src_arena.payload_of(pointee) {
        Payload::ArrType { elem, .. } => *elem,
        _ => pointee,
    };
    let dst_elem = r.dst_arena.node_handle(r.rewrite_operand(elem));
    let stride = type_byte_size(r.dst_arena, dst_elem.id())
        .ok_or_else(|| PassError::Unsupported { reason: "array-element type has no statically known size".into() })?;

    let base = dst.node_handle(r.rewrite_operand(ptr));
    let new_ptr_ty = dst.intern_node(Payload::PtrType { pointee: dst_elem.id(), address_space, is_reference: false }).unwrap();

    let offset_rewritten = dst.node_handle(r.rewrite_operand(offset));
    if is_literal_zero(dst, offset_rewritten) {
        return Ok(reinterpret_cast(dst, new_ptr_ty, base));
    }

    let ptr_width = ptr_width_int(dst, r.src_arena.config().target_ptr_width_bytes);
    let base_int = reinterpret_cast(dst, ptr_width, base);
    let offset_int = convert(dst, ptr_width, offset_rewritten);
    let stride_literal = int_literal(dst, ptr_width, stride);
    let scaled = primop2(dst, PrimOpKind::Mul, offset_int, stride_literal);
    let result_int = primop2(dst, PrimOpKind::Add, base_int, scaled);
    Ok(reinterpret_cast(dst, new_ptr_ty, result_int))
}

fn lower_ptr_index(
    r: &Rewriter<'_>,
    ptr: NodeId,
    pointee: NodeId,
    address_space: AddressSpace,
    is_reference: bool,
    index: NodeId,
) -> Result<Node, PassError> {
    let dst = r.dst_arena;
    let literal_index = match &*r.src_arena.payload_of(index) {
        Payload::IntLiteral { value, .. } => *value,
        _ => return Err(PassError::Unsupported { reason: "composite-element index is not a literal".into() }),
    };
    let member_ty = match &*r.src_arena.payload_of(pointee) {
        Payload::RecordType { members, .. } => *members
            .get(literal_index as usize)
            .ok_or_else(|| PassError::Unsupported { reason: "composite-element index out of bounds".into() })?,
        _ => return Err(PassError::Unsupported { reason: "composite-element navigation into a non-record type".into() }),
    };
    let dst_member_ty = dst.node_handle(r.rewrite_operand(member_ty));
    let dst_record_ty = r.rewrite_operand(pointee);
    let offset = member_byte_offset(dst, dst_record_ty, literal_index)
        .ok_or_else(|| PassError::Unsupported { reason: "record member has no statically known offset".into() })?;

    let base = dst.node_handle(r.rewrite_operand(ptr));
    let new_ptr_ty = dst.intern_node(Payload::PtrType { pointee: dst_member_ty.id(), address_space, is_reference }).unwrap();

    if offset == 0 {
        return Ok(reinterpret_cast(dst, new_ptr_ty, base));
    }

    let ptr_width = ptr_width_int(dst, r.src_arena.config().target_ptr_width_bytes);
    let base_int = reinterpret_cast(dst, ptr_width, base);
    let offset_literal = int_literal(dst, ptr_width, offset);
    let result_int = primop2(dst, PrimOpKind::Add, base_int, offset_literal);
    Ok(reinterpret_cast(dst, new_ptr_ty, result_int))
}

/// Mirrors `shady_ir::check`'s private `ptr_type_of`, structurally, over
/// the source arena (not a type cache — see the module doc comment).
fn resolve_ptr_type(arena: &Arena, ptr: NodeId) -> Option<(NodeId, AddressSpace, bool)> {
    match &*arena.payload_of(ptr) {
        Payload::Param { ty, .. } => resolve_ptr_type_from_type(arena, *ty),
        Payload::StackAlloc { ty } | Payload::LocalAlloc { ty } => Some((*ty, AddressSpace::Private, false)),
        Payload::RefDecl { decl } => match &*arena.payload_of(*decl) {
            Payload::GlobalVariable { ty, address_space, .. } => Some((*ty, *address_space, false)),
            _ => None,
        },
        Payload::PtrArrayElementOffset { ptr, .. } => {
            let (pointee, address_space, _) = resolve_ptr_type(arena, *ptr)?;
            let elem = match &*arena.payload_of(pointee) {
                Payload::ArrType { elem, .. } => *elem,
                _ => pointee,
            };
            Some((elem, address_space, false))
        }
        Payload::PtrCompositeElement { ptr, index } => {
            let (pointee, address_space, is_reference) = resolve_ptr_type(arena, *ptr)?;
            let member_ty = match (&*arena.payload_of(pointee), &*arena.payload_of(*index)) {
                (Payload::RecordType { members, .. }, Payload::IntLiteral { value, .. }) => members.get(*value as usize).copied(),
                _ => None,
            }?;
            Some((member_ty, address_space, is_reference))
        }
        _ => None,
    }
}

fn resolve_ptr_type_from_type(arena: &Arena, ty: NodeId) -> Option<(NodeId, AddressSpace, bool)> {
    let unwrapped = match &*arena.payload_of(ty) {
        Payload::QualifiedType { inner, .. } => *inner,
        _ => ty,
    };
    match &*arena.payload_of(unwrapped) {
        Payload::PtrType { pointee, address_space, is_reference } => Some((*pointee, *address_space, *is_reference)),
        _ => None,
    }
}

/// A type's byte size if it's one this pass can fold to a literal at
/// lowering time — every shape `lower_ptr_offset`/`lower_ptr_index`
/// actually needs a stride or field offset for. See the module doc
/// comment for why this exists instead of a `size_of_op` primop.
fn type_byte_size(arena: &Arena, ty: NodeId) -> Option<u64> {
    match &*arena.payload_of(ty) {
        Payload::Bool => Some(1),
        Payload::Int { width, .. } | Payload::Float { width } => Some((*width as u64 + 7) / 8),
        Payload::PtrType { .. } => Some(arena.config().target_ptr_width_bytes as u64),
        Payload::ArrType { elem, size: Some(n) } => Some(type_byte_size(arena, *elem)? * n),
        Payload::PackType { elem, width } => Some(type_byte_size(arena, *elem)? * *width as u64),
        Payload::RecordType { members, special: RecordSpecial::Plain, .. } => {
            members.iter().try_fold(0u64, |acc, m| Some(acc + type_byte_size(arena, *m)?))
        }
        Payload::NominalTypeRef { decl } => match &*arena.payload_of(*decl) {
            Payload::NominalType { body: Some(inner), .. } => type_byte_size(arena, *inner),
            _ => None,
        },
        _ => None,
    }
}

/// The byte offset of `record`'s `index`-th member: the flat sum of
/// every preceding member's size.
fn member_byte_offset(arena: &Arena, record: NodeId, index: u64) -> Option<u64> {
    let Payload::RecordType { members, .. } = &*arena.payload_of(record) else {
        return None;
    };
    members.iter().take(index as usize).try_fold(0u64, |acc, m| Some(acc + type_byte_size(arena, *m)?))
}

fn is_literal_zero(arena: &Arena, value: Node) -> bool {
    matches!(&*arena.payload(value), Payload::IntLiteral { value: 0, .. })
}

fn ptr_width_int(dst: &Arena, width_bytes: u8) -> Node {
    dst.intern_node(Payload::Int { width: width_bytes * 8, signed: false }).expect("plain Int never fails to intern")
}

fn int_literal(dst: &Arena, width_ty: Node, value: u64) -> Node {
    let Payload::Int { width, signed } = &*dst.payload(width_ty) else {
        unreachable!("ptr_width_int always returns an Int")
    };
    dst.intern_node(Payload::IntLiteral { width: *width, signed: *signed, value }).unwrap()
}

fn reinterpret_cast(dst: &Arena, target_ty: Node, value: Node) -> Node {
    dst.intern_node(Payload::PrimOp {
        op: PrimOpKind::Reinterpret,
        type_args: NodeIdVec::from_elem(target_ty.id(), 1),
        operands: NodeIdVec::from_elem(value.id(), 1),
    })
    .unwrap()
}

fn convert(dst: &Arena, target_ty: Node, value: Node) -> Node {
    dst.intern_node(Payload::PrimOp {
        op: PrimOpKind::Convert,
        type_args: NodeIdVec::from_elem(target_ty.id(), 1),
        operands: NodeIdVec::from_elem(value.id(), 1),
    })
    .unwrap()
}

fn primop2(dst: &Arena, op: PrimOpKind, a: Node, b: Node) -> Node {
    dst.intern_node(Payload::PrimOp { op, type_args: NodeIdVec::new(), operands: [a.id(), b.id()].into_iter().collect() }).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::ArenaConfig;

    fn unchecked() -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() })
    }

    fn physical_cfg() -> PassConfig {
        PassConfig { emulate_physical_memory: true, ..PassConfig::default() }
    }

    /// A `GlobalVariable` in `AddressSpace::Global`, which the default
    /// `ArenaConfig::address_spaces` table already marks `emulated`.
    fn global_ptr(src: &Arena, ty: Node) -> Node {
        let name = src.intern_string("g");
        let decl = src.declare(Payload::GlobalVariable { annotations: vec![], name, ty: ty.id(), address_space: AddressSpace::Global, init: None });
        src.intern_node(Payload::RefDecl { decl: decl.id() }).unwrap()
    }

    fn wrap_in_function(src: &Arena, body: Node) -> Module {
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(body.id(), 1) }).unwrap();
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
        module
    }

    #[test]
    fn array_offset_in_an_emulated_space_becomes_integer_arithmetic() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let arr = src.intern_node(Payload::ArrType { elem: i32_ty.id(), size: Some(4) }).unwrap();
        let ptr = global_ptr(&src, arr);
        let offset = src.intern_node(Payload::IntLiteral { width: 32, signed: false, value: 2 }).unwrap();
        let lea = src.intern_node(Payload::PtrArrayElementOffset { ptr: ptr.id(), offset: offset.id() }).unwrap();
        let module = wrap_in_function(&src, lea);

        let (dst_arena, dst_module) = run(&src, &module, &physical_cfg()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else { panic!() };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else { panic!() };
        let Payload::PrimOp { op, .. } = &*dst_arena.payload_of(args[0]) else {
            panic!("expected the lea to lower to a reinterpret-cast primop");
        };
        assert_eq!(*op, PrimOpKind::Reinterpret);
    }

    #[test]
    fn zero_offset_skips_the_multiply_and_add() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let arr = src.intern_node(Payload::ArrType { elem: i32_ty.id(), size: Some(4) }).unwrap();
        let ptr = global_ptr(&src, arr);
        let offset = src.intern_node(Payload::IntLiteral { width: 32, signed: false, value: 0 }).unwrap();
        let lea = src.intern_node(Payload::PtrArrayElementOffset { ptr: ptr.id(), offset: offset.id() }).unwrap();
        let module = wrap_in_function(&src, lea);

        let (dst_arena, dst_module) = run(&src, &module, &physical_cfg()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else { panic!() };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else { panic!() };
        let Payload::PrimOp { op, operands, .. } = &*dst_arena.payload_of(args[0]) else { panic!() };
        assert_eq!(*op, PrimOpKind::Reinterpret);
        assert!(
            matches!(&*dst_arena.payload_of(operands[0]), Payload::PrimOp { op: PrimOpKind::Reinterpret, .. }),
            "the cast's operand should be the base pointer's own cast, not an Add"
        );
    }

    #[test]
    fn a_non_emulated_space_is_left_untouched() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let arr = src.intern_node(Payload::ArrType { elem: i32_ty.id(), size: Some(4) }).unwrap();
        let alloc = src.intern_node(Payload::StackAlloc { ty: arr.id() }).unwrap();
        let offset = src.intern_node(Payload::IntLiteral { width: 32, signed: false, value: 1 }).unwrap();
        let lea = src.intern_node(Payload::PtrArrayElementOffset { ptr: alloc.id(), offset: offset.id() }).unwrap();
        let module = wrap_in_function(&src, lea);

        let (dst_arena, dst_module) = run(&src, &module, &physical_cfg()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else { panic!() };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else { panic!() };
        assert!(
            matches!(&*dst_arena.payload_of(args[0]), Payload::PtrArrayElementOffset { .. }),
            "StackAlloc defaults to the Private address space, which isn't marked emulated here"
        );
    }

    #[test]
    fn composite_element_offset_folds_to_a_literal_member_offset() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let i64_ty = src.intern_node(Payload::Int { width: 64, signed: true }).unwrap();
        let record = src
            .intern_node(Payload::RecordType {
                members: [i32_ty.id(), i64_ty.id()].into_iter().collect(),
                names: vec![],
                special: RecordSpecial::Plain,
            })
            .unwrap();
        let ptr = global_ptr(&src, record);
        let index = src.intern_node(Payload::IntLiteral { width: 32, signed: false, value: 1 }).unwrap();
        let lea = src.intern_node(Payload::PtrCompositeElement { ptr: ptr.id(), index: index.id() }).unwrap();
        let module = wrap_in_function(&src, lea);

        let (dst_arena, dst_module) = run(&src, &module, &physical_cfg()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else { panic!() };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else { panic!() };
        let Payload::PrimOp { op, operands, .. } = &*dst_arena.payload_of(args[0]) else { panic!() };
        assert_eq!(*op, PrimOpKind::Reinterpret);
        let Payload::PrimOp { op: add_op, operands: add_operands, .. } = &*dst_arena.payload_of(operands[0]) else {
            panic!("expected an Add folding in the second member's byte offset")
        };
        assert_eq!(*add_op, PrimOpKind::Add);
        let Payload::IntLiteral { value, .. } = &*dst_arena.payload_of(add_operands[1]) else { panic!() };
        assert_eq!(*value, 4, "member 1 sits after a 4-byte i32, regardless of i64's own size");
    }
}
