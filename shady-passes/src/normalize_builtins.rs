//! Builtin canonicalization: every declaration carrying a `Builtin`
//! annotation with a given name is deduplicated down to one, and every
//! `RefDecl` pointing at one of the discarded duplicates is redirected
//! to the canonical declaration instead (spec.md §4.5 item 3).
//!
//! `bind` (item 1) already resolved every `Unbound` reference before
//! this runs, so "replace references to builtin names with their
//! canonical declarations" can't mean resolving names anymore — by the
//! time this pass sees the module, a reference to a builtin is already
//! a `RefDecl` pointing at *some* declaration that happens to carry a
//! `Builtin` annotation. What's left to normalize is duplicates: a front
//! end may have emitted more than one declaration for the same builtin
//! (one per translation unit that mentioned it), and this pass picks the
//! first one seen as canonical and rewires the rest onto it. There is no
//! `original_source/` file for this step; it's grounded on spec.md's own
//! wording plus the declaration-annotation shape `bind.c`/this crate's
//! `Annotation` type already establishes.
//!
//! Unreferenced duplicate declarations are left in the output module
//! rather than dropped — this pipeline has no dead-declaration-removal
//! pass, so pruning them here would be inventing cleanup the spec
//! doesn't ask for; every use site is still redirected correctly.

use crate::{fresh_arena, PassConfig, PassError};
use shady_ir::{Annotation, AnnotationPayload, Arena, Module, Node, NodeId, Payload};
use shady_rewrite::{RewriteFn, Rewriter};
use std::collections::HashMap;

const BUILTIN_ANNOTATION: &str = "Builtin";

fn decl_annotations(payload: &Payload) -> Option<&[Annotation]> {
    match payload {
        Payload::Function { annotations, .. }
        | Payload::Constant { annotations, .. }
        | Payload::GlobalVariable { annotations, .. } => Some(annotations),
        _ => None,
    }
}

/// The builtin name a declaration's `@Builtin("name")`-shaped annotation
/// carries, if it has one: the annotation's payload is a single
/// `StringLiteral` value node.
fn builtin_name(arena: &Arena, payload: &Payload) -> Option<String> {
    let annotations = decl_annotations(payload)?;
    annotations.iter().find_map(|ann| {
        if &*arena.get_string(ann.name) != BUILTIN_ANNOTATION {
            return None;
        }
        let AnnotationPayload::Value(id) = &ann.payload else { return None };
        match &*arena.payload_of(*id) {
            Payload::StringLiteral { value } => Some(arena.get_string(*value).to_string()),
            _ => None,
        }
    })
}

pub fn run(src_arena: &Arena, src: &Module, _cfg: &PassConfig) -> Result<(Arena, Module), PassError> {
    let dst_arena = fresh_arena(src_arena, false);

    let mut canonical: HashMap<String, Node> = HashMap::new();
    for &decl in src.declarations() {
        if let Some(name) = builtin_name(src_arena, &src_arena.payload(decl)) {
            canonical.entry(name).or_insert(decl);
        }
    }
    let mut redirect: HashMap<NodeId, Node> = HashMap::new();
    for &decl in src.declarations() {
        if let Some(name) = builtin_name(src_arena, &src_arena.payload(decl)) {
            let canon = canonical[&name];
            if canon.id() != decl.id() {
                redirect.insert(decl.id(), canon);
            }
        }
    }

    let process: &RewriteFn<'_> = &|r, node| normalize_builtins_node(r, node, &redirect);
    let rewriter = Rewriter::new(src_arena, &dst_arena, src, process);
    rewriter.rewrite_module();
    let module = rewriter.into_module();
    Ok((dst_arena, module))
}

fn normalize_builtins_node(r: &Rewriter<'_>, node: Node, redirect: &HashMap<NodeId, Node>) -> Node {
    if let Payload::RefDecl { decl } = &*r.src_arena.payload(node) {
        if let Some(&canonical) = redirect.get(decl) {
            let dst_decl = r.rewrite_node(canonical);
            return r
                .dst_arena
                .intern_node(Payload::RefDecl { decl: dst_decl.id() })
                .expect("RefDecl of an already-rewritten declaration always type-checks in an unchecked arena");
        }
    }
    r.recreate_node_identity(node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::{ArenaConfig, NodeIdVec};

    fn unchecked() -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() })
    }

    fn builtin_annotation(arena: &Arena, name: &str) -> Annotation {
        let literal = arena.intern_string(name);
        let value = arena.intern_node(Payload::StringLiteral { value: literal }).unwrap();
        Annotation {
            name: arena.intern_string(BUILTIN_ANNOTATION),
            payload: AnnotationPayload::Value(value.id()),
        }
    }

    #[test]
    fn duplicate_builtin_declarations_collapse_to_one() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let ann = builtin_annotation(&src, "global_invocation_id");

        let name_a = src.intern_string("gid_a");
        let decl_a = src.declare(Payload::Constant {
            annotations: vec![ann.clone()],
            name: name_a,
            type_hint: Some(i32_ty.id()),
            value: None,
        });
        let name_b = src.intern_string("gid_b");
        let decl_b = src.declare(Payload::Constant {
            annotations: vec![ann],
            name: name_b,
            type_hint: Some(i32_ty.id()),
            value: None,
        });

        let ref_a = src.intern_node(Payload::RefDecl { decl: decl_a.id() }).unwrap();
        let ref_b = src.intern_node(Payload::RefDecl { decl: decl_b.id() }).unwrap();
        let ret = src
            .intern_node(Payload::Return { args: [ref_a.id(), ref_b.id()].into_iter().collect() })
            .unwrap();
        let block_name = src.intern_string("entry");
        let entry = src.declare(Payload::BasicBlock {
            params: NodeIdVec::new(),
            body: Some(ret.id()),
            name: block_name,
        });
        let fn_name = src.intern_string("f");
        let function = src.declare(Payload::Function {
            annotations: vec![],
            name: fn_name,
            params: NodeIdVec::new(),
            return_types: NodeIdVec::new(),
            body: Some(entry.id()),
        });

        let mut module = Module::new();
        module.add_declaration(decl_a);
        module.add_declaration(decl_b);
        module.add_declaration(function);

        let (dst_arena, dst_module) = run(&src, &module, &PassConfig::default()).unwrap();
        let dst_function = dst_module.declarations()[2];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a function body");
        };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else {
            panic!("expected a return terminator");
        };
        let Payload::RefDecl { decl: decl_of_a } = &*dst_arena.payload_of(args[0]) else {
            panic!("expected a RefDecl");
        };
        let Payload::RefDecl { decl: decl_of_b } = &*dst_arena.payload_of(args[1]) else {
            panic!("expected a RefDecl");
        };
        assert_eq!(decl_of_a, decl_of_b, "both references should land on the same canonical declaration");
    }
}
