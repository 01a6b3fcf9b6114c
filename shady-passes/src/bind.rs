//! Name resolution: every `Unbound{name}` node is replaced by a direct
//! reference to whatever it names, and `BindIdentifiers` is desugared
//! into the lexical scope it introduces.
//!
//! Grounded on `examples/original_source/src/shady/passes/bind.c`:
//! `resolve_using_name`'s search order (innermost local scope first,
//! then declarations, resolved on demand if not yet rewritten) and
//! `rewrite_decl`'s two-phase block handling (every basic block in a
//! function is declared, by name, before any of their bodies are
//! rebuilt, so sibling blocks can jump both forward and backward to each
//! other). The C `Context`'s linked-list `local_variables` becomes a
//! stack of scopes here, pushed on function/block entry and popped on
//! exit rather than restored by saving/restoring a pointer.

use crate::{fresh_arena, PassConfig, PassError};
use shady_ir::{Annotation, AnnotationPayload, Arena, Module, Node, NodeId, NodeIdVec, Payload, StringId};
use shady_rewrite::{RewriteFn, Rewriter};
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Default)]
struct Scopes(RefCell<Vec<HashMap<StringId, NodeId>>>);

impl Scopes {
    fn push(&self) {
        self.0.borrow_mut().push(HashMap::new());
    }

    fn pop(&self) {
        self.0.borrow_mut().pop();
    }

    fn bind(&self, name: StringId, value: NodeId) {
        self.0
            .borrow_mut()
            .last_mut()
            .expect("a scope is always pushed before a binding is made inside it")
            .insert(name, value);
    }

    fn lookup(&self, name: StringId) -> Option<NodeId> {
        self.0.borrow().iter().rev().find_map(|scope| scope.get(&name).copied())
    }
}

/// The name carried by any declaration tag, for the by-name lookup
/// `resolve_using_name` falls back to once every local scope has missed.
fn decl_name(payload: &Payload) -> Option<StringId> {
    match payload {
        Payload::Function { name, .. }
        | Payload::BasicBlock { name, .. }
        | Payload::Constant { name, .. }
        | Payload::GlobalVariable { name, .. }
        | Payload::NominalType { name, .. } => Some(*name),
        _ => None,
    }
}

fn rw_annotations(r: &Rewriter<'_>, anns: &[Annotation]) -> Vec<Annotation> {
    anns.iter()
        .map(|a| Annotation {
            name: r.rewrite_string(a.name),
            payload: match &a.payload {
                AnnotationPayload::None => AnnotationPayload::None,
                AnnotationPayload::Value(id) => AnnotationPayload::Value(r.rewrite_operand(*id)),
                AnnotationPayload::Values(ids) => {
                    AnnotationPayload::Values(ids.iter().map(|&id| r.rewrite_operand(id)).collect())
                }
                AnnotationPayload::Map(pairs) => AnnotationPayload::Map(
                    pairs
                        .iter()
                        .map(|(k, v)| (r.rewrite_string(*k), r.rewrite_operand(*v)))
                        .collect(),
                ),
            },
        })
        .collect()
}

pub fn run(src_arena: &Arena, src: &Module, _cfg: &PassConfig) -> Result<(Arena, Module), PassError> {
    let dst_arena = fresh_arena(src_arena, false);
    let scopes = Scopes::default();
    let error: RefCell<Option<PassError>> = RefCell::new(None);

    let by_name: HashMap<String, Node> = src
        .declarations()
        .iter()
        .filter_map(|&decl| {
            let name = decl_name(&src_arena.payload(decl))?;
            Some((src_arena.get_string(name).to_string(), decl))
        })
        .collect();

    let process: &RewriteFn<'_> = &|r, node| bind_node(r, node, &scopes, &by_name, &error);
    let rewriter = Rewriter::new(src_arena, &dst_arena, src, process);
    rewriter.rewrite_module();

    if let Some(err) = error.borrow_mut().take() {
        return Err(err);
    }
    let module = rewriter.into_module();
    Ok((dst_arena, module))
}

fn bind_node(
    r: &Rewriter<'_>,
    node: Node,
    scopes: &Scopes,
    by_name: &HashMap<String, Node>,
    error: &RefCell<Option<PassError>>,
) -> Node {
    let payload = r.src_arena.payload(node).clone();
    match &payload {
        Payload::Unbound { name } => resolve_unbound(r, *name, scopes, by_name, error),
        Payload::BindIdentifiers { names, values } => bind_identifiers(r, names, values, scopes),
        Payload::Function { .. } => bind_function(r, node, scopes),
        Payload::BasicBlock { .. } => bind_basic_block(r, node, scopes),
        _ => r.recreate_node_identity(node),
    }
}

/// `resolve_using_name` (bind.c): locals shadow everything, then fall
/// back to the module's declarations, rewriting the target on demand if
/// it hasn't been visited yet — `Rewriter::rewrite_node`'s own
/// memoization makes that on-demand rewrite a no-op for anything already
/// produced.
fn resolve_unbound(
    r: &Rewriter<'_>,
    name: StringId,
    scopes: &Scopes,
    by_name: &HashMap<String, Node>,
    error: &RefCell<Option<PassError>>,
) -> Node {
    if let Some(bound) = scopes.lookup(name) {
        return r.dst_arena.node_handle(bound);
    }
    let src_name = r.src_arena.get_string(name).to_string();
    if let Some(&decl) = by_name.get(&src_name) {
        let dst_decl = r.rewrite_node(decl);
        return r
            .dst_arena
            .intern_node(Payload::RefDecl { decl: dst_decl.id() })
            .expect("RefDecl of a freshly rewritten declaration always type-checks in an unchecked arena");
    }
    error.borrow_mut().get_or_insert(PassError::UnresolvedName { name: src_name });
    // A harmless placeholder: `error` makes `run` fail regardless of what
    // this becomes, but the rewrite must still finish without panicking
    // so every other name in the module gets a chance to report too.
    r.dst_arena
        .intern_node(Payload::Unreachable)
        .expect("Unreachable always type-checks")
}

/// `BindIdentifiers{names, values}` has no tail of its own (spec.md §4.6:
/// sequencing belongs to the emitter, not the IR) — its entire job is to
/// make `names[i]` resolve to `values[i]` for whatever structurally
/// shares this node's scope. It's replaced by a `Tuple` of the rewritten
/// values so any operand slot that referenced it keeps resolving to
/// *something* of the right shape, while the name bindings themselves
/// live only in `scopes`.
fn bind_identifiers(r: &Rewriter<'_>, names: &[StringId], values: &NodeIdVec, scopes: &Scopes) -> Node {
    let new_values: NodeIdVec = values.iter().map(|&v| r.rewrite_operand(v)).collect();
    for (&name, &value) in names.iter().zip(new_values.iter()) {
        scopes.bind(r.rewrite_string(name), value);
    }
    r.dst_arena
        .intern_node(Payload::Tuple { contents: new_values })
        .expect("a tuple of already-rewritten values always type-checks in an unchecked arena")
}

fn bind_function(r: &Rewriter<'_>, node: Node, scopes: &Scopes) -> Node {
    r.rewrite_declaration(
        node,
        |r, src| {
            let Payload::Function { name, return_types, .. } = &*r.src_arena.payload(src) else {
                unreachable!()
            };
            r.dst_arena.declare(Payload::Function {
                annotations: vec![],
                name: r.rewrite_string(*name),
                params: NodeIdVec::new(),
                return_types: return_types.iter().map(|&t| r.rewrite_operand(t)).collect(),
                body: None,
            })
        },
        |r, src, header| {
            let (annotations, name, params, return_types, body) = {
                let Payload::Function { annotations, name, params, return_types, body } =
                    &*r.src_arena.payload(src)
                else {
                    unreachable!()
                };
                (annotations.clone(), *name, params.clone(), return_types.clone(), *body)
            };
            scopes.push();
            let new_params = r.recreate_params(
                &params.iter().map(|&p| r.src_arena.node_handle(p)).collect::<Vec<_>>(),
            );
            bind_params(r, &params, &new_params, scopes);
            let new_body = body.map(|b| r.rewrite_operand(b));
            let new_annotations = rw_annotations(r, &annotations);
            scopes.pop();
            r.dst_arena.fill_declaration(
                header,
                Payload::Function {
                    annotations: new_annotations,
                    name: r.rewrite_string(name),
                    params: new_params.iter().map(|n| n.id()).collect(),
                    return_types: return_types.iter().map(|&t| r.rewrite_operand(t)).collect(),
                    body: new_body,
                },
            );
        },
    )
}

fn bind_basic_block(r: &Rewriter<'_>, node: Node, scopes: &Scopes) -> Node {
    r.rewrite_declaration(
        node,
        |r, src| {
            let Payload::BasicBlock { name, .. } = &*r.src_arena.payload(src) else { unreachable!() };
            r.dst_arena.declare(Payload::BasicBlock {
                params: NodeIdVec::new(),
                body: None,
                name: r.rewrite_string(*name),
            })
        },
        |r, src, header| {
            let (params, body, name) = {
                let Payload::BasicBlock { params, body, name } = &*r.src_arena.payload(src) else {
                    unreachable!()
                };
                (params.clone(), *body, *name)
            };
            scopes.push();
            let new_params = r.recreate_params(
                &params.iter().map(|&p| r.src_arena.node_handle(p)).collect::<Vec<_>>(),
            );
            bind_params(r, &params, &new_params, scopes);
            let new_body = body.map(|b| r.rewrite_operand(b));
            scopes.pop();
            r.dst_arena.fill_declaration(
                header,
                Payload::BasicBlock {
                    params: new_params.iter().map(|n| n.id()).collect(),
                    body: new_body,
                    name: r.rewrite_string(name),
                },
            );
        },
    )
}

/// Bind each rewritten param into the just-pushed scope under its source
/// name, so `Unbound` references inside the body resolve to it.
fn bind_params(r: &Rewriter<'_>, src_params: &NodeIdVec, dst_params: &[Node], scopes: &Scopes) {
    for (&src_param, dst_param) in src_params.iter().zip(dst_params.iter()) {
        let Payload::Param { name, .. } = &*r.src_arena.payload_of(src_param) else {
            unreachable!("a declaration's params are always Param nodes")
        };
        scopes.bind(r.rewrite_string(*name), dst_param.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::ArenaConfig;

    fn unchecked() -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() })
    }

    #[test]
    fn unbound_reference_to_a_global_resolves_to_ref_decl() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let zero = src.intern_node(Payload::IntLiteral { width: 32, signed: true, value: 0 }).unwrap();
        let c_name = src.intern_string("the_answer");
        let constant = src.declare(Payload::Constant {
            annotations: vec![],
            name: c_name,
            type_hint: Some(i32_ty),
            value: Some(zero.id()),
        });

        let use_name = src.intern_string("the_answer");
        let unbound = src.intern_node(Payload::Unbound { name: use_name }).unwrap();
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(unbound.id(), 1) }).unwrap();
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
            return_types: NodeIdVec::from_elem(i32_ty, 1),
            body: Some(entry.id()),
        });

        let mut module = Module::new();
        module.add_declaration(constant);
        module.add_declaration(function);

        let (dst_arena, dst_module) = run(&src, &module, &PassConfig::default()).unwrap();
        assert_eq!(dst_module.declarations().len(), 2);
        let dst_function = dst_module.declarations()[1];
        let Payload::Function { body: Some(body), .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a function body");
        };
        let Payload::Return { args } = &*dst_arena.payload_of(*body) else {
            panic!("expected a return terminator");
        };
        assert!(matches!(&*dst_arena.payload_of(args[0]), Payload::RefDecl { .. }));
    }

    #[test]
    fn unresolved_name_is_reported() {
        let src = unchecked();
        let name = src.intern_string("nowhere");
        let unbound = src.intern_node(Payload::Unbound { name }).unwrap();
        let ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(unbound.id(), 1) }).unwrap();
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
        module.add_declaration(function);

        let err = run(&src, &module, &PassConfig::default()).unwrap_err();
        assert!(matches!(err, PassError::UnresolvedName { name } if name == "nowhere"));
    }

    #[test]
    fn bind_identifiers_binds_names_visible_to_sibling_references() {
        let src = unchecked();
        let zero = src.intern_node(Payload::IntLiteral { width: 32, signed: true, value: 0 }).unwrap();
        let x_name = src.intern_string("x");
        let let_node = src
            .intern_node(Payload::BindIdentifiers {
                names: vec![x_name],
                values: NodeIdVec::from_elem(zero.id(), 1),
            })
            .unwrap();
        let use_x = src.intern_node(Payload::Unbound { name: src.intern_string("x") }).unwrap();

        let scopes = Scopes::default();
        scopes.push();
        let by_name = HashMap::new();
        let error = RefCell::new(None);
        let dst = unchecked();
        let module = Module::new();
        let process: &RewriteFn<'_> = &|r, node| bind_node(r, node, &scopes, &by_name, &error);
        let rewriter = Rewriter::new(&src, &dst, &module, process);

        let dst_bind = rewriter.rewrite_node(let_node);
        assert!(matches!(&*dst.payload(dst_bind), Payload::Tuple { .. }));
        let dst_use = rewriter.rewrite_node(use_x);
        assert!(error.borrow().is_none());
        let Payload::Tuple { contents } = &*dst.payload(dst_bind) else { unreachable!() };
        assert_eq!(dst_use.id(), contents[0]);
        scopes.pop();
    }
}
