//! The tagged node universe and its classification into
//! types/values/instructions/terminators/declarations.
//!
//! Grounded on `examples/original_source/include/shady/ir.h`'s
//! `TYPE_NODES`/`VALUE_NODES`/`INSTRUCTION_NODES`/`TERMINATOR_NODES` X-macro
//! tables and `src/shady/generator/generator.c`'s table-driven dispatch
//! (§9 design note "Tagged-union node variants"): one macro lists every
//! `(Tag, Class)` pair exactly once, and the node-kind enum, its
//! classification, and its debug name are all derived from that one list
//! so they can't drift out of sync the way three hand-written `match`
//! statements eventually would.

use crate::address_space::AddressSpace;
use crate::entities::{NodeId, NodeListId, StringId};
use smallvec::SmallVec;

/// A short, fixed-size list of node operands. Most instructions have one
/// to four operands; this avoids a heap allocation for the common case
/// while still handing off to `Vec`'s storage for wide `Composite`s calls.
pub type NodeIdVec = SmallVec<[NodeId; 4]>;

macro_rules! for_each_node_tag {
    ($m:ident) => {
        $m! {
            // --- types ---
            Noret: Type,
            Unit: Type,
            Bool: Type,
            Int: Type,
            Float: Type,
            Mask: Type,
            RecordType: Type,
            FnType: Type,
            BbType: Type,
            JoinPointType: Type,
            PtrType: Type,
            ArrType: Type,
            PackType: Type,
            NominalTypeRef: Type,
            ImageType: Type,
            SampledImageType: Type,
            SamplerType: Type,
            QualifiedType: Type,
            // --- values ---
            Param: Value,
            IntLiteral: Value,
            FloatLiteral: Value,
            True: Value,
            False: Value,
            StringLiteral: Value,
            NullPtr: Value,
            Composite: Value,
            Fill: Value,
            Undef: Value,
            FnAddr: Value,
            RefDecl: Value,
            Tuple: Value,
            Unbound: Value,
            UntypedNumber: Value,
            // --- instructions ---
            PrimOp: Instruction,
            Call: Instruction,
            StackAlloc: Instruction,
            LocalAlloc: Instruction,
            Load: Instruction,
            Store: Instruction,
            PtrArrayElementOffset: Instruction,
            PtrCompositeElement: Instruction,
            CopyBytes: Instruction,
            FillBytes: Instruction,
            DebugPrintf: Instruction,
            Comment: Instruction,
            PushStack: Instruction,
            PopStack: Instruction,
            GetStackBasePointer: Instruction,
            SetStackBasePointer: Instruction,
            If: Instruction,
            Match: Instruction,
            Loop: Instruction,
            Control: Instruction,
            BindIdentifiers: Instruction,
            // --- terminators ---
            Jump: Terminator,
            Branch: Terminator,
            Switch: Terminator,
            Join: Terminator,
            TailCall: Terminator,
            Return: Terminator,
            MergeSelection: Terminator,
            MergeContinue: Terminator,
            MergeBreak: Terminator,
            Unreachable: Terminator,
            // --- declarations ---
            Function: Declaration,
            BasicBlock: Declaration,
            Constant: Declaration,
            GlobalVariable: Declaration,
            NominalType: Declaration,
        }
    };
}

macro_rules! define_node_kind {
    ($($tag:ident: $class:ident),* $(,)?) => {
        /// The tag identifying a node's variant.
        #[derive(Clone, Copy, PartialEq, Eq, Hash)]
        pub enum NodeKind {
            $($tag),*
        }

        impl NodeKind {
            /// Which of the five disjoint node classes this tag belongs to.
            pub fn class(self) -> NodeClass {
                match self {
                    $(NodeKind::$tag => NodeClass::$class),*
                }
            }

            /// Debug/printing name, identical to the Rust identifier.
            pub fn name(self) -> &'static str {
                match self {
                    $(NodeKind::$tag => stringify!($tag)),*
                }
            }
        }

        impl core::fmt::Debug for NodeKind {
            fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
                f.write_str(self.name())
            }
        }
    };
}

for_each_node_tag!(define_node_kind);

/// The five disjoint node classes of spec.md §3.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeClass {
    Type,
    Value,
    Instruction,
    Terminator,
    Declaration,
}

impl NodeClass {
    /// Whether a declaration of this class is identified by allocation
    /// (nominal) rather than by its payload (structural). Only
    /// declarations and `Param`s are nominal; everything else is
    /// structurally interned.
    pub fn is_structural(self) -> bool {
        !matches!(self, NodeClass::Declaration)
    }
}

/// `RecordType`'s layout-intent flag (spec.md §3).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RecordSpecial {
    Plain,
    MultipleReturn,
    DecorateBlock,
}

/// An annotation attached to a declaration (spec.md §6).
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Annotation {
    pub name: StringId,
    pub payload: AnnotationPayload,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum AnnotationPayload {
    None,
    Value(NodeId),
    Values(NodeIdVec),
    Map(Vec<(StringId, NodeId)>),
}

/// A built-in operator, dispatched on by [`crate::check::type_of`] and
/// consumed verbatim by `shady-emit`'s ISel table.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PrimOpKind {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    AddCarry,
    SubBorrow,
    MulExtended,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    And,
    Or,
    Xor,
    Not,
    Shl,
    Shr,
    Convert,
    Reinterpret,
    Select,
    Extract,
    Insert,
    Shuffle,
    SubgroupBroadcastFirst,
    SubgroupElect,
    SubgroupBallot,
}

/// The per-tag data a node carries, beyond its [`NodeKind`] and cached
/// type. One variant per tag in `for_each_node_tag!`, holding exactly the
/// fields spec.md §3 lists for it.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Payload {
    // --- types ---
    Noret,
    Unit,
    Bool,
    Int { width: u8, signed: bool },
    Float { width: u8 },
    Mask,
    RecordType {
        members: NodeIdVec,
        names: Vec<StringId>,
        special: RecordSpecial,
    },
    FnType {
        params: NodeIdVec,
        returns: NodeIdVec,
    },
    BbType {
        params: NodeIdVec,
    },
    JoinPointType {
        yields: NodeIdVec,
    },
    PtrType {
        pointee: NodeId,
        address_space: AddressSpace,
        is_reference: bool,
    },
    ArrType {
        elem: NodeId,
        size: Option<u64>,
    },
    PackType {
        elem: NodeId,
        width: u32,
    },
    NominalTypeRef {
        decl: NodeId,
    },
    ImageType {
        sampled_type: NodeId,
    },
    SampledImageType {
        image_type: NodeId,
    },
    SamplerType,
    QualifiedType {
        uniformity: crate::types::Uniformity,
        inner: NodeId,
    },

    // --- values ---
    Param {
        ty: NodeId,
        name: StringId,
    },
    IntLiteral {
        width: u8,
        signed: bool,
        value: u64,
    },
    FloatLiteral {
        width: u8,
        bits: u64,
    },
    True,
    False,
    StringLiteral {
        value: StringId,
    },
    NullPtr {
        ty: NodeId,
    },
    Composite {
        ty: Option<NodeId>,
        contents: NodeIdVec,
    },
    Fill {
        ty: NodeId,
        value: NodeId,
    },
    Undef {
        ty: NodeId,
    },
    FnAddr {
        function: NodeId,
    },
    RefDecl {
        decl: NodeId,
    },
    Tuple {
        contents: NodeIdVec,
    },
    Unbound {
        name: StringId,
    },
    UntypedNumber {
        literal: StringId,
    },

    // --- instructions ---
    PrimOp {
        op: PrimOpKind,
        type_args: NodeIdVec,
        operands: NodeIdVec,
    },
    Call {
        callee: NodeId,
        args: NodeIdVec,
    },
    StackAlloc {
        ty: NodeId,
    },
    LocalAlloc {
        ty: NodeId,
    },
    Load {
        ptr: NodeId,
    },
    Store {
        ptr: NodeId,
        value: NodeId,
    },
    PtrArrayElementOffset {
        ptr: NodeId,
        offset: NodeId,
    },
    PtrCompositeElement {
        ptr: NodeId,
        index: NodeId,
    },
    CopyBytes {
        dst: NodeId,
        src: NodeId,
        count: NodeId,
    },
    FillBytes {
        dst: NodeId,
        value: NodeId,
        count: NodeId,
    },
    DebugPrintf {
        format: StringId,
        args: NodeIdVec,
    },
    Comment {
        text: StringId,
    },
    PushStack {
        value: NodeId,
    },
    PopStack {
        ty: NodeId,
    },
    GetStackBasePointer,
    SetStackBasePointer {
        value: NodeId,
    },
    If {
        yield_types: NodeIdVec,
        cond: NodeId,
        true_case: NodeId,
        false_case: Option<NodeId>,
        tail: NodeId,
    },
    Match {
        yield_types: NodeIdVec,
        inspect: NodeId,
        literals: NodeIdVec,
        cases: NodeIdVec,
        default: NodeId,
        tail: NodeId,
    },
    Loop {
        yield_types: NodeIdVec,
        params: NodeIdVec,
        body: NodeId,
        initial_args: NodeIdVec,
        tail: NodeId,
    },
    Control {
        yield_types: NodeIdVec,
        inside: NodeId,
        tail: NodeId,
    },
    BindIdentifiers {
        names: Vec<StringId>,
        values: NodeIdVec,
    },

    // --- terminators ---
    Jump {
        target: NodeId,
        args: NodeIdVec,
        mem: Option<NodeId>,
    },
    Branch {
        cond: NodeId,
        true_jump: NodeId,
        false_jump: NodeId,
    },
    Switch {
        value: NodeId,
        case_values: NodeIdVec,
        case_jumps: NodeIdVec,
        default_jump: NodeId,
    },
    Join {
        join_point: NodeId,
        args: NodeIdVec,
    },
    TailCall {
        callee: NodeId,
        args: NodeIdVec,
    },
    Return {
        args: NodeIdVec,
    },
    MergeSelection {
        args: NodeIdVec,
    },
    MergeContinue {
        args: NodeIdVec,
    },
    MergeBreak {
        args: NodeIdVec,
    },
    Unreachable,

    // --- declarations (nominal; never structurally interned) ---
    Function {
        annotations: Vec<Annotation>,
        name: StringId,
        params: NodeIdVec,
        return_types: NodeIdVec,
        body: Option<NodeId>,
    },
    BasicBlock {
        params: NodeIdVec,
        body: Option<NodeId>,
        name: StringId,
    },
    Constant {
        annotations: Vec<Annotation>,
        name: StringId,
        type_hint: Option<NodeId>,
        value: Option<NodeId>,
    },
    GlobalVariable {
        annotations: Vec<Annotation>,
        name: StringId,
        ty: NodeId,
        address_space: AddressSpace,
        init: Option<NodeId>,
    },
    NominalType {
        name: StringId,
        body: Option<NodeId>,
    },
}

impl Payload {
    pub fn kind(&self) -> NodeKind {
        macro_rules! payload_kind {
            ($($tag:ident: $class:ident),* $(,)?) => {
                match self {
                    $(Payload::$tag { .. } => NodeKind::$tag,)*
                }
            };
        }
        for_each_node_tag!(payload_kind)
    }
}

/// The data an [`crate::entities::NodeId`] maps to inside an arena: the
/// tag-specific payload plus the lazily-filled type cache.
///
/// The `type` cache is the one place a node's fields are written after
/// creation (spec.md §3 "Lifecycle"); it is filled once, by
/// [`crate::check::type_of`], and never overwritten afterward.
pub struct NodeData {
    pub payload: Payload,
    pub ty: std::cell::Cell<Option<NodeId>>,
}

impl NodeData {
    pub fn new(payload: Payload) -> Self {
        NodeData {
            payload,
            ty: std::cell::Cell::new(None),
        }
    }

    pub fn kind(&self) -> NodeKind {
        self.payload.kind()
    }

    pub fn class(&self) -> NodeClass {
        self.kind().class()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_spec_taxonomy() {
        assert_eq!(NodeKind::Int.class(), NodeClass::Type);
    }

    #[test]
    fn payload_kind_roundtrips() {
        let p = Payload::True;
        assert_eq!(p.kind(), NodeKind::True);
        assert_eq!(p.kind().class(), NodeClass::Value);
    }

    #[test]
    fn declarations_are_nominal() {
        assert!(!NodeKind::Function.class().is_structural());
        assert!(NodeKind::PrimOp.class().is_structural());
    }
}
