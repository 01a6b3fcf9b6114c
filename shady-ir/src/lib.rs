//! The hash-consed IR substrate: arena, node model, typing, and the
//! module root they all anchor to. See `SPEC_FULL.md` §[A]/§[B].

pub mod address_space;
pub mod arena;
pub mod check;
pub mod entities;
mod interner;
pub mod module;
pub mod node;
pub mod types;

pub use address_space::{AddressSpace, AddressSpaceFlags, AddressSpaceTable};
pub use arena::{Arena, ArenaConfig, ArenaError};
pub use check::{is_subtype, type_of, CheckError};
pub use entities::{Node, NodeId, NodeListId, StringId};
pub use module::Module;
pub use node::{Annotation, AnnotationPayload, NodeClass, NodeData, NodeIdVec, NodeKind, Payload, PrimOpKind, RecordSpecial};
pub use types::{QualifiedType, Uniformity};
