//! The default "recreate this node unchanged, but with rewritten
//! operands" fallback every pass falls through to for node tags it
//! doesn't specifically transform (spec.md §4.3 "Identity rewriting").
//!
//! One arm per tag in `shady_ir`'s node table. Structural tags go
//! straight through `dst_arena.intern_node`; nominal (declaration) tags
//! go through the two-phase `declare` / `fill_declaration` split so a
//! declaration's body may reference the declaration itself.

use crate::Rewriter;
use shady_ir::{Annotation, AnnotationPayload, Node, NodeId, NodeIdVec, Payload, StringId};

fn rw(r: &Rewriter<'_>, id: NodeId) -> NodeId {
    r.rewrite_operand(id)
}

fn rw_opt(r: &Rewriter<'_>, id: Option<NodeId>) -> Option<NodeId> {
    id.map(|id| rw(r, id))
}

fn rw_vec(r: &Rewriter<'_>, ids: &NodeIdVec) -> NodeIdVec {
    ids.iter().map(|&id| rw(r, id)).collect()
}

fn rw_str(r: &Rewriter<'_>, id: StringId) -> StringId {
    r.rewrite_string(id)
}

fn rw_str_vec(r: &Rewriter<'_>, ids: &[StringId]) -> Vec<StringId> {
    ids.iter().map(|&id| rw_str(r, id)).collect()
}

fn rw_annotations(r: &Rewriter<'_>, anns: &[Annotation]) -> Vec<Annotation> {
    anns.iter()
        .map(|a| Annotation {
            name: rw_str(r, a.name),
            payload: match &a.payload {
                AnnotationPayload::None => AnnotationPayload::None,
                AnnotationPayload::Value(id) => AnnotationPayload::Value(rw(r, *id)),
                AnnotationPayload::Values(ids) => AnnotationPayload::Values(rw_vec(r, ids)),
                AnnotationPayload::Map(pairs) => AnnotationPayload::Map(
                    pairs.iter().map(|(k, v)| (rw_str(r, *k), rw(r, *v))).collect(),
                ),
            },
        })
        .collect()
}

pub(crate) fn recreate(r: &Rewriter<'_>, node: Node) -> Node {
    let payload = r.src_arena.payload_of(node.id()).clone();
    if !payload.kind().class().is_structural() {
        return recreate_declaration(r, node, payload);
    }
    let rewritten = recreate_structural(r, &payload);
    r.dst_arena
        .intern_node(rewritten)
        .expect("a payload rewritten operand-for-operand from a valid source must still type-check")
}

fn recreate_structural(r: &Rewriter<'_>, payload: &Payload) -> Payload {
    match payload {
        Payload::Noret => Payload::Noret,
        Payload::Unit => Payload::Unit,
        Payload::Bool => Payload::Bool,
        Payload::Int { width, signed } => Payload::Int { width: *width, signed: *signed },
        Payload::Float { width } => Payload::Float { width: *width },
        Payload::Mask => Payload::Mask,
        Payload::RecordType { members, names, special } => Payload::RecordType {
            members: rw_vec(r, members),
            names: rw_str_vec(r, names),
            special: *special,
        },
        Payload::FnType { params, returns } => Payload::FnType {
            params: rw_vec(r, params),
            returns: rw_vec(r, returns),
        },
        Payload::BbType { params } => Payload::BbType { params: rw_vec(r, params) },
        Payload::JoinPointType { yields } => Payload::JoinPointType { yields: rw_vec(r, yields) },
        Payload::PtrType { pointee, address_space, is_reference } => Payload::PtrType {
            pointee: rw(r, *pointee),
            address_space: *address_space,
            is_reference: *is_reference,
        },
        Payload::ArrType { elem, size } => Payload::ArrType { elem: rw(r, *elem), size: *size },
        Payload::PackType { elem, width } => Payload::PackType { elem: rw(r, *elem), width: *width },
        Payload::NominalTypeRef { decl } => Payload::NominalTypeRef { decl: rw(r, *decl) },
        Payload::ImageType { sampled_type } => Payload::ImageType { sampled_type: rw(r, *sampled_type) },
        Payload::SampledImageType { image_type } => {
            Payload::SampledImageType { image_type: rw(r, *image_type) }
        }
        Payload::SamplerType => Payload::SamplerType,
        Payload::QualifiedType { uniformity, inner } => {
            Payload::QualifiedType { uniformity: *uniformity, inner: rw(r, *inner) }
        }

        Payload::Param { ty, name } => Payload::Param { ty: rw(r, *ty), name: rw_str(r, *name) },
        Payload::IntLiteral { width, signed, value } => {
            Payload::IntLiteral { width: *width, signed: *signed, value: *value }
        }
        Payload::FloatLiteral { width, bits } => Payload::FloatLiteral { width: *width, bits: *bits },
        Payload::True => Payload::True,
        Payload::False => Payload::False,
        Payload::StringLiteral { value } => Payload::StringLiteral { value: rw_str(r, *value) },
        Payload::NullPtr { ty } => Payload::NullPtr { ty: rw(r, *ty) },
        Payload::Composite { ty, contents } => {
            Payload::Composite { ty: rw_opt(r, *ty), contents: rw_vec(r, contents) }
        }
        Payload::Fill { ty, value } => Payload::Fill { ty: rw(r, *ty), value: rw(r, *value) },
        Payload::Undef { ty } => Payload::Undef { ty: rw(r, *ty) },
        Payload::FnAddr { function } => Payload::FnAddr { function: rw(r, *function) },
        Payload::RefDecl { decl } => Payload::RefDecl { decl: rw(r, *decl) },
        Payload::Tuple { contents } => Payload::Tuple { contents: rw_vec(r, contents) },
        Payload::Unbound { name } => Payload::Unbound { name: rw_str(r, *name) },
        Payload::UntypedNumber { literal } => Payload::UntypedNumber { literal: rw_str(r, *literal) },

        Payload::PrimOp { op, type_args, operands } => Payload::PrimOp {
            op: *op,
            type_args: rw_vec(r, type_args),
            operands: rw_vec(r, operands),
        },
        Payload::Call { callee, args } => Payload::Call { callee: rw(r, *callee), args: rw_vec(r, args) },
        Payload::StackAlloc { ty } => Payload::StackAlloc { ty: rw(r, *ty) },
        Payload::LocalAlloc { ty } => Payload::LocalAlloc { ty: rw(r, *ty) },
        Payload::Load { ptr } => Payload::Load { ptr: rw(r, *ptr) },
        Payload::Store { ptr, value } => Payload::Store { ptr: rw(r, *ptr), value: rw(r, *value) },
        Payload::PtrArrayElementOffset { ptr, offset } => {
            Payload::PtrArrayElementOffset { ptr: rw(r, *ptr), offset: rw(r, *offset) }
        }
        Payload::PtrCompositeElement { ptr, index } => {
            Payload::PtrCompositeElement { ptr: rw(r, *ptr), index: rw(r, *index) }
        }
        Payload::CopyBytes { dst, src, count } => {
            Payload::CopyBytes { dst: rw(r, *dst), src: rw(r, *src), count: rw(r, *count) }
        }
        Payload::FillBytes { dst, value, count } => {
            Payload::FillBytes { dst: rw(r, *dst), value: rw(r, *value), count: rw(r, *count) }
        }
        Payload::DebugPrintf { format, args } => {
            Payload::DebugPrintf { format: rw_str(r, *format), args: rw_vec(r, args) }
        }
        Payload::Comment { text } => Payload::Comment { text: rw_str(r, *text) },
        Payload::PushStack { value } => Payload::PushStack { value: rw(r, *value) },
        Payload::PopStack { ty } => Payload::PopStack { ty: rw(r, *ty) },
        Payload::GetStackBasePointer => Payload::GetStackBasePointer,
        Payload::SetStackBasePointer { value } => Payload::SetStackBasePointer { value: rw(r, *value) },
        Payload::If { yield_types, cond, true_case, false_case, tail } => Payload::If {
            yield_types: rw_vec(r, yield_types),
            cond: rw(r, *cond),
            true_case: rw(r, *true_case),
            false_case: rw_opt(r, *false_case),
            tail: rw(r, *tail),
        },
        Payload::Match { yield_types, inspect, literals, cases, default, tail } => Payload::Match {
            yield_types: rw_vec(r, yield_types),
            inspect: rw(r, *inspect),
            literals: rw_vec(r, literals),
            cases: rw_vec(r, cases),
            default: rw(r, *default),
            tail: rw(r, *tail),
        },
        Payload::Loop { yield_types, params, body, initial_args, tail } => Payload::Loop {
            yield_types: rw_vec(r, yield_types),
            params: rw_vec(r, params),
            body: rw(r, *body),
            initial_args: rw_vec(r, initial_args),
            tail: rw(r, *tail),
        },
        Payload::Control { yield_types, inside, tail } => Payload::Control {
            yield_types: rw_vec(r, yield_types),
            inside: rw(r, *inside),
            tail: rw(r, *tail),
        },
        Payload::BindIdentifiers { names, values } => {
            Payload::BindIdentifiers { names: rw_str_vec(r, names), values: rw_vec(r, values) }
        }

        Payload::Jump { target, args, mem } => {
            Payload::Jump { target: rw(r, *target), args: rw_vec(r, args), mem: rw_opt(r, *mem) }
        }
        Payload::Branch { cond, true_jump, false_jump } => Payload::Branch {
            cond: rw(r, *cond),
            true_jump: rw(r, *true_jump),
            false_jump: rw(r, *false_jump),
        },
        Payload::Switch { value, case_values, case_jumps, default_jump } => Payload::Switch {
            value: rw(r, *value),
            case_values: rw_vec(r, case_values),
            case_jumps: rw_vec(r, case_jumps),
            default_jump: rw(r, *default_jump),
        },
        Payload::Join { join_point, args } => {
            Payload::Join { join_point: rw(r, *join_point), args: rw_vec(r, args) }
        }
        Payload::TailCall { callee, args } => {
            Payload::TailCall { callee: rw(r, *callee), args: rw_vec(r, args) }
        }
        Payload::Return { args } => Payload::Return { args: rw_vec(r, args) },
        Payload::MergeSelection { args } => Payload::MergeSelection { args: rw_vec(r, args) },
        Payload::MergeContinue { args } => Payload::MergeContinue { args: rw_vec(r, args) },
        Payload::MergeBreak { args } => Payload::MergeBreak { args: rw_vec(r, args) },
        Payload::Unreachable => Payload::Unreachable,

        Payload::Function { .. }
        | Payload::BasicBlock { .. }
        | Payload::Constant { .. }
        | Payload::GlobalVariable { .. }
        | Payload::NominalType { .. } => {
            unreachable!("declarations are handled by recreate_declaration")
        }
    }
}

fn recreate_declaration(r: &Rewriter<'_>, node: Node, payload: Payload) -> Node {
    match payload {
        Payload::Function { annotations, name, params, return_types, body } => {
            r.rewrite_declaration(
                node,
                |r, _src| {
                    r.dst_arena.declare(Payload::Function {
                        annotations: vec![],
                        name: rw_str(r, name),
                        params: NodeIdVec::new(),
                        return_types: rw_vec(r, &return_types),
                        body: None,
                    })
                },
                |r, _src, header| {
                    let new_params = r.recreate_params(
                        &params.iter().map(|&p| r.src_arena.node_handle(p)).collect::<Vec<_>>(),
                    );
                    let new_body = rw_opt(r, body);
                    let new_annotations = rw_annotations(r, &annotations);
                    r.dst_arena.fill_declaration(
                        header,
                        Payload::Function {
                            annotations: new_annotations,
                            name: rw_str(r, name),
                            params: new_params.iter().map(|n| n.id()).collect(),
                            return_types: rw_vec(r, &return_types),
                            body: new_body,
                        },
                    );
                },
            )
        }
        Payload::BasicBlock { params, body, name } => r.rewrite_declaration(
            node,
            |r, _src| {
                r.dst_arena
                    .declare(Payload::BasicBlock { params: NodeIdVec::new(), body: None, name: rw_str(r, name) })
            },
            |r, _src, header| {
                let new_params = r.recreate_params(
                    &params.iter().map(|&p| r.src_arena.node_handle(p)).collect::<Vec<_>>(),
                );
                let new_body = rw_opt(r, body);
                r.dst_arena.fill_declaration(
                    header,
                    Payload::BasicBlock {
                        params: new_params.iter().map(|n| n.id()).collect(),
                        body: new_body,
                        name: rw_str(r, name),
                    },
                );
            },
        ),
        Payload::Constant { annotations, name, type_hint, value } => r.rewrite_declaration(
            node,
            |r, _src| {
                r.dst_arena.declare(Payload::Constant {
                    annotations: vec![],
                    name: rw_str(r, name),
                    type_hint: rw_opt(r, type_hint),
                    value: None,
                })
            },
            |r, _src, header| {
                let new_value = rw_opt(r, value);
                let new_annotations = rw_annotations(r, &annotations);
                r.dst_arena.fill_declaration(
                    header,
                    Payload::Constant {
                        annotations: new_annotations,
                        name: rw_str(r, name),
                        type_hint: rw_opt(r, type_hint),
                        value: new_value,
                    },
                );
            },
        ),
        Payload::GlobalVariable { annotations, name, ty, address_space, init } => r.rewrite_declaration(
            node,
            |r, _src| {
                r.dst_arena.declare(Payload::GlobalVariable {
                    annotations: vec![],
                    name: rw_str(r, name),
                    ty: rw(r, ty),
                    address_space,
                    init: None,
                })
            },
            |r, _src, header| {
                let new_init = rw_opt(r, init);
                let new_annotations = rw_annotations(r, &annotations);
                r.dst_arena.fill_declaration(
                    header,
                    Payload::GlobalVariable {
                        annotations: new_annotations,
                        name: rw_str(r, name),
                        ty: rw(r, ty),
                        address_space,
                        init: new_init,
                    },
                );
            },
        ),
        Payload::NominalType { name, body } => r.rewrite_declaration(
            node,
            |r, _src| r.dst_arena.declare(Payload::NominalType { name: rw_str(r, name), body: None }),
            |r, _src, header| {
                let new_body = rw_opt(r, body);
                r.dst_arena
                    .fill_declaration(header, Payload::NominalType { name: rw_str(r, name), body: new_body });
            },
        ),
        _ => unreachable!("non-declaration payload routed to recreate_declaration"),
    }
}
