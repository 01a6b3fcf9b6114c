//! Enumerate the immediate `NodeId` children of a payload, the way
//! `shady-rewrite::identity::recreate_structural` enumerates them to
//! rewrite each one — except here they're collected rather than replaced.
//! [`crate::schedule`] uses this to walk an abstraction's expression DAG;
//! [`crate::free_frontier`] reuses it to find which of those children
//! cross a scheduling boundary.

use shady_ir::node::Payload;
use shady_ir::NodeId;

/// Every `NodeId` a payload directly names, types and declarations
/// included; callers filter by [`shady_ir::NodeClass`] afterward. Structured
/// control-flow fields (`true_case`, `tail`, a `Jump`'s `target`, ...) are
/// included too — they name other abstractions, and callers that only
/// want to stay within one abstraction's own expression tree rely on
/// those ids already being claimed elsewhere (see `schedule::claim`'s
/// `cfg_nodes` guard) rather than on this function filtering them out.
pub fn child_node_ids(payload: &Payload) -> Vec<NodeId> {
    use Payload::*;
    match payload {
        Noret | Unit | Bool | Mask | SamplerType | GetStackBasePointer | Unreachable => vec![],
        Int { .. } | Float { .. } => vec![],

        RecordType { members, .. } => members.to_vec(),
        FnType { params, returns } => params.iter().chain(returns).copied().collect(),
        BbType { params } => params.to_vec(),
        JoinPointType { yields } => yields.to_vec(),
        PtrType { pointee, .. } => vec![*pointee],
        ArrType { elem, .. } => vec![*elem],
        PackType { elem, .. } => vec![*elem],
        NominalTypeRef { decl } => vec![*decl],
        ImageType { sampled_type } => vec![*sampled_type],
        SampledImageType { image_type } => vec![*image_type],
        QualifiedType { inner, .. } => vec![*inner],

        Param { ty, .. } => vec![*ty],
        IntLiteral { .. } | FloatLiteral { .. } | True | False | StringLiteral { .. } | Unbound { .. }
        | UntypedNumber { .. } => vec![],
        NullPtr { ty } => vec![*ty],
        Composite { ty, contents } => (*ty).into_iter().chain(contents.iter().copied()).collect(),
        Fill { ty, value } => vec![*ty, *value],
        Undef { ty } => vec![*ty],
        FnAddr { function } => vec![*function],
        RefDecl { decl } => vec![*decl],
        Tuple { contents } => contents.to_vec(),

        PrimOp { type_args, operands, .. } => type_args.iter().chain(operands).copied().collect(),
        Call { callee, args } => std::iter::once(*callee).chain(args.iter().copied()).collect(),
        StackAlloc { ty } | LocalAlloc { ty } | PopStack { ty } => vec![*ty],
        Load { ptr } => vec![*ptr],
        Store { ptr, value } => vec![*ptr, *value],
        PtrArrayElementOffset { ptr, offset } => vec![*ptr, *offset],
        PtrCompositeElement { ptr, index } => vec![*ptr, *index],
        CopyBytes { dst, src, count } => vec![*dst, *src, *count],
        FillBytes { dst, value, count } => vec![*dst, *value, *count],
        DebugPrintf { args, .. } => args.to_vec(),
        Comment { .. } => vec![],
        PushStack { value } => vec![*value],
        SetStackBasePointer { value } => vec![*value],
        If { yield_types, cond, true_case, false_case, tail } => yield_types
            .iter()
            .copied()
            .chain([*cond, *true_case])
            .chain(*false_case)
            .chain([*tail])
            .collect(),
        Match { yield_types, inspect, literals, cases, default, tail } => yield_types
            .iter()
            .chain([inspect])
            .chain(literals)
            .chain(cases)
            .chain([default, tail])
            .copied()
            .collect(),
        Loop { yield_types, params, body, initial_args, tail } => yield_types
            .iter()
            .chain(params)
            .chain([body])
            .chain(initial_args)
            .chain([tail])
            .copied()
            .collect(),
        Control { yield_types, inside, tail } => yield_types.iter().chain([inside, tail]).copied().collect(),
        BindIdentifiers { values, .. } => values.to_vec(),

        Jump { target, args, mem } => {
            std::iter::once(*target).chain(args.iter().copied()).chain(*mem).collect()
        }
        Branch { cond, true_jump, false_jump } => vec![*cond, *true_jump, *false_jump],
        Switch { value, case_values, case_jumps, default_jump } => std::iter::once(*value)
            .chain(case_values.iter().copied())
            .chain(case_jumps.iter().copied())
            .chain([*default_jump])
            .collect(),
        Join { join_point, args } => std::iter::once(*join_point).chain(args.iter().copied()).collect(),
        TailCall { callee, args } => std::iter::once(*callee).chain(args.iter().copied()).collect(),
        Return { args } | MergeSelection { args } | MergeContinue { args } | MergeBreak { args } => args.to_vec(),

        Function { params, return_types, body, .. } => {
            params.iter().chain(return_types).copied().chain(*body).collect()
        }
        BasicBlock { params, body, .. } => params.iter().copied().chain(*body).collect(),
        Constant { type_hint, value, .. } => (*type_hint).into_iter().chain(*value).collect(),
        GlobalVariable { ty, init, .. } => std::iter::once(*ty).chain(*init).collect(),
        NominalType { body, .. } => (*body).into_iter().collect(),
    }
}
