//! Lifting free variables into explicit parameters (spec.md §4.5 item 7):
//! every `BasicBlock` that isn't purely the inline body of a structured
//! construct gets its free frontier appended to its own parameter list,
//! and every `Jump` that targets it gets the corresponding values
//! appended as extra arguments — so each such block can, in principle,
//! be emitted on its own without closing over anything from an
//! enclosing scope.
//!
//! Grounded on `examples/original_source/src/shady/passes/lift_everything.c`:
//! same `Function`/`BasicBlock`/`Jump` dispatch, the same per-function
//! `CFG`/`Scheduler` pair built once and reused for every block inside
//! it, and the same `is_cfnode_structural_target` skip (a block reached
//! only by entering an `If`/`Match`/`Loop`'s body, never by a plain
//! `Jump`, is emitted inline where it's used and never needs lifting).
//!
//! The C source wraps this in a `while (todo)` loop but never sets
//! `todo` back to `true` anywhere in its body, so as written it only
//! ever runs once. spec.md §4.5 item 7 and its free-frontier-monotonicity
//! invariant (§7: "after the lift pass, every basic block's free
//! frontier is empty") both require an actual fixpoint — lifting a
//! deeply nested block's frontier can expose a fresh frontier violation
//! at its call site, once that call site itself has to thread the newly
//! added arguments through. [`run`] restores the fixpoint the scaffold's
//! `todo` flag was clearly meant to drive: each iteration is a single
//! rewrite ([`run_once`]), and iteration continues until one makes no
//! change.
//!
//! `shady-rewrite`'s `Rewriter` has no way to pre-seed a single source
//! node's mapping the way the C source's `register_processed` can —
//! `rewrite_node` always consults the *entire* parent chain before
//! calling back into `process`, so a value already rewritten once (a
//! function's own param, say) can never be shadowed for one descendant
//! scope by inserting into that scope's own map. This pass works around
//! the gap with two structures of its own, kept entirely outside any
//! `Rewriter`'s private memoization:
//! - `canonical`, a single source-node -> destination-node map shared by
//!   every `Rewriter` instance this pass creates, consulted first in
//!   [`process_node`] so a `Function`/`BasicBlock`/`Param` reached twice
//!   (once normally, once from inside some other block's overridden
//!   scope) always resolves to the one destination node already built
//!   for it, never a duplicate.
//! - `overrides`, a stack of `old value -> new Param` frames, pushed
//!   right before a lifted block's body is rewritten and popped right
//!   after, checked ahead of `canonical` so a frontier value's local
//!   substitute wins over its ordinary destination while that block's
//!   body (and anything reached from it) is being processed.
//! Each lifted block's body is rewritten through a brand new, parentless
//! `Rewriter` rather than whatever reached the block, specifically so it
//! carries none of an ancestor's memoization forward — without that, a
//! value already rewritten once up the call chain would resolve through
//! the ancestor's map before `overrides` ever got a chance to run.
//! `canonical` is what keeps that otherwise-unmemoized traversal from
//! rebuilding a block or param it has already built elsewhere.

use crate::{fresh_arena, PassConfig, PassError};
use shady_analysis::free_frontier::free_frontier;
use shady_analysis::{CfgBuildConfig, ControlFlowGraph, DominatorTree, EdgeKind, Scheduler};
use shady_ir::{Annotation, AnnotationPayload, Arena, Module, Node, NodeClass, NodeId, NodeIdVec, Payload};
use shady_rewrite::{RewriteFn, Rewriter};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

struct FnAnalyses {
    cfg: ControlFlowGraph,
    doms: DominatorTree,
    scheduler: Scheduler,
}

#[derive(Default)]
struct Overrides {
    frames: RefCell<Vec<HashMap<NodeId, NodeId>>>,
}

impl Overrides {
    fn lookup(&self, id: NodeId) -> Option<NodeId> {
        self.frames.borrow().iter().rev().find_map(|frame| frame.get(&id).copied())
    }

    fn push(&self, frame: HashMap<NodeId, NodeId>) {
        self.frames.borrow_mut().push(frame);
    }

    fn pop(&self) {
        self.frames.borrow_mut().pop();
    }
}

#[derive(Default)]
struct Ctx {
    fn_analyses: RefCell<Option<FnAnalyses>>,
    canonical: RefCell<HashMap<NodeId, NodeId>>,
    lift_table: RefCell<HashMap<NodeId, Vec<NodeId>>>,
    overrides: Overrides,
    lifted_anything: Cell<bool>,
}

pub fn run(src_arena: &Arena, src: &Module, cfg: &PassConfig) -> Result<(Arena, Module), PassError> {
    let (mut arena, mut module, mut lifted_anything) = run_once(src_arena, src, cfg)?;
    while lifted_anything {
        let (next_arena, next_module, next_lifted) = run_once(&arena, &module, cfg)?;
        arena = next_arena;
        module = next_module;
        lifted_anything = next_lifted;
    }
    Ok((arena, module))
}

fn run_once(src_arena: &Arena, src: &Module, _cfg: &PassConfig) -> Result<(Arena, Module, bool), PassError> {
    let dst_arena = fresh_arena(src_arena, false);
    let ctx = Ctx::default();

    let process: &RewriteFn<'_> = &|r, node| process_node(r, node, &ctx);
    let rewriter = Rewriter::new(src_arena, &dst_arena, src, process);
    rewriter.rewrite_module();

    let lifted_anything = ctx.lifted_anything.get();
    let module = rewriter.into_module();
    Ok((dst_arena, module, lifted_anything))
}

fn process_node(r: &Rewriter<'_>, node: Node, ctx: &Ctx) -> Node {
    if let Some(mapped) = ctx.overrides.lookup(node.id()) {
        return r.dst_arena.node_handle(mapped);
    }
    if let Some(existing) = ctx.canonical.borrow().get(&node.id()).copied() {
        return r.dst_arena.node_handle(existing);
    }
    let payload = r.src_arena.payload(node).clone();
    match &payload {
        Payload::Function { body: Some(_), .. } => process_function(r, node, &payload, ctx),
        Payload::BasicBlock { .. } => process_basic_block(r, node, &payload, ctx),
        Payload::Param { .. } => process_param(r, node, &payload, ctx),
        Payload::Jump { target, args, mem } => process_jump(r, *target, args, *mem, ctx),
        _ => r.recreate_node_identity(node),
    }
}

/// A `Param` reached as a bare operand before its owning `Function`/
/// `BasicBlock` recreated it (shouldn't happen for any well-formed
/// module, since every `Param` belongs to exactly one params list that
/// is always recreated before that scope's body is touched) still gets
/// a single canonical destination rather than a silently-duplicated one.
fn process_param(r: &Rewriter<'_>, node: Node, payload: &Payload, ctx: &Ctx) -> Node {
    let Payload::Param { ty, name } = payload else {
        unreachable!("dispatch only routes Param payloads here")
    };
    let fresh = r.dst_arena.declare(Payload::Param { ty: r.rewrite_operand(*ty), name: r.rewrite_string(*name) });
    ctx.canonical.borrow_mut().insert(node.id(), fresh.id());
    fresh
}

fn process_function(r: &Rewriter<'_>, node: Node, payload: &Payload, ctx: &Ctx) -> Node {
    let Payload::Function { annotations, name, params, return_types, body } = payload else {
        unreachable!("dispatch only routes Function payloads here")
    };
    let body_id = body.expect("dispatch only routes functions with a body here");

    let cfg = ControlFlowGraph::build(r.src_arena, body_id, CfgBuildConfig::default());
    let doms = DominatorTree::compute(&cfg);
    let scheduler = Scheduler::new(r.src_arena, &cfg);
    let previous = ctx.fn_analyses.replace(Some(FnAnalyses { cfg, doms, scheduler }));

    let rewritten = r.rewrite_declaration(
        node,
        |r, src| {
            let header = r.dst_arena.declare(Payload::Function {
                annotations: vec![],
                name: r.rewrite_string(*name),
                params: NodeIdVec::new(),
                return_types: rewrite_each(r, return_types),
                body: None,
            });
            ctx.canonical.borrow_mut().insert(src.id(), header.id());
            header
        },
        |r, _src, header| {
            let param_nodes: Vec<Node> = params.iter().map(|&p| r.src_arena.node_handle(p)).collect();
            let new_params = r.recreate_params(&param_nodes);
            for (src_param, dst_param) in param_nodes.iter().zip(new_params.iter()) {
                ctx.canonical.borrow_mut().insert(src_param.id(), dst_param.id());
            }
            let new_annotations = rewrite_annotations(r, annotations);
            let new_body = Some(r.rewrite_operand(body_id));
            r.dst_arena.fill_declaration(
                header,
                Payload::Function {
                    annotations: new_annotations,
                    name: r.rewrite_string(*name),
                    params: new_params.iter().map(|n| n.id()).collect(),
                    return_types: rewrite_each(r, return_types),
                    body: new_body,
                },
            );
        },
    );

    *ctx.fn_analyses.borrow_mut() = previous;
    rewritten
}

/// A block reached only by entering an `If`/`Match`/`Loop` body (never
/// by a plain `Jump`) is emitted inline where it's used and never needs
/// its own lifted parameter list.
fn is_structural_target(cfg: &ControlFlowGraph, block: NodeId) -> bool {
    let mut preds = cfg.predecessors(block).peekable();
    if preds.peek().is_none() {
        return false;
    }
    preds.all(|e| e.kind != EdgeKind::Jump)
}

fn process_basic_block(r: &Rewriter<'_>, node: Node, payload: &Payload, ctx: &Ctx) -> Node {
    let Payload::BasicBlock { params, body, name } = payload else {
        unreachable!("dispatch only routes BasicBlock payloads here")
    };

    let skip = ctx
        .fn_analyses
        .borrow()
        .as_ref()
        .map(|fa| is_structural_target(&fa.cfg, node.id()))
        .unwrap_or(false);
    if skip {
        return r.recreate_node_identity(node);
    }

    let frontier = {
        let fa = ctx.fn_analyses.borrow();
        let fa = fa.as_ref().expect("a BasicBlock is only visited while its owning function's analyses are active");
        free_frontier(r.src_arena, &fa.doms, &fa.scheduler, node.id())
    };

    r.rewrite_declaration(
        node,
        |r, src| {
            let header =
                r.dst_arena.declare(Payload::BasicBlock { params: NodeIdVec::new(), body: None, name: r.rewrite_string(*name) });
            ctx.canonical.borrow_mut().insert(src.id(), header.id());
            header
        },
        |r, _src, header| {
            let param_nodes: Vec<Node> = params.iter().map(|&p| r.src_arena.node_handle(p)).collect();
            let new_params = r.recreate_params(&param_nodes);
            for (src_param, dst_param) in param_nodes.iter().zip(new_params.iter()) {
                ctx.canonical.borrow_mut().insert(src_param.id(), dst_param.id());
            }
            let mut all_params: NodeIdVec = new_params.iter().map(|n| n.id()).collect();

            let mut frame = HashMap::new();
            let mut additional_args = Vec::new();
            for &value in &frontier {
                if r.src_arena.payload_of(value).kind().class() != NodeClass::Value {
                    continue;
                }
                let ty = frontier_value_type(r, value);
                let fresh = r.dst_arena.declare(Payload::Param { ty, name: r.dst_arena.intern_string("lifted") });
                all_params.push(fresh.id());
                frame.insert(value, fresh.id());
                additional_args.push(value);
            }
            if !additional_args.is_empty() {
                ctx.lifted_anything.set(true);
            }
            ctx.lift_table.borrow_mut().insert(node.id(), additional_args);

            // A fresh, parentless rewriter for the body: it must not see
            // any ancestor's memoization of a value this block's own
            // override frame needs to shadow (see the module doc comment).
            let body_process: &RewriteFn<'_> = &|r, n| process_node(r, n, ctx);
            let body_rewriter = Rewriter::new(r.src_arena, r.dst_arena, r.src_module, body_process);

            ctx.overrides.push(frame);
            let new_body = body.map(|b| body_rewriter.rewrite_operand(b));
            ctx.overrides.pop();

            r.dst_arena.fill_declaration(
                header,
                Payload::BasicBlock { params: all_params, body: new_body, name: r.rewrite_string(*name) },
            );
        },
    )
}

fn process_jump(r: &Rewriter<'_>, target: NodeId, args: &NodeIdVec, mem: Option<NodeId>, ctx: &Ctx) -> Node {
    let new_target = r.rewrite_operand(target);
    let extra = ctx.lift_table.borrow().get(&target).cloned().unwrap_or_default();
    let mut new_args: NodeIdVec = args.iter().map(|&a| r.rewrite_operand(a)).collect();
    for v in extra {
        new_args.push(r.rewrite_operand(v));
    }
    r.dst_arena
        .intern_node(Payload::Jump { target: new_target, args: new_args, mem: mem.map(|m| r.rewrite_operand(m)) })
        .expect("a jump rewritten operand-for-operand from a valid source must still type-check")
}

fn rewrite_each(r: &Rewriter<'_>, ids: &NodeIdVec) -> NodeIdVec {
    ids.iter().map(|&id| r.rewrite_operand(id)).collect()
}

fn rewrite_annotations(r: &Rewriter<'_>, anns: &[Annotation]) -> Vec<Annotation> {
    anns.iter()
        .map(|a| Annotation {
            name: r.rewrite_string(a.name),
            payload: match &a.payload {
                AnnotationPayload::None => AnnotationPayload::None,
                AnnotationPayload::Value(id) => AnnotationPayload::Value(r.rewrite_operand(*id)),
                AnnotationPayload::Values(ids) => AnnotationPayload::Values(rewrite_each(r, ids)),
                AnnotationPayload::Map(pairs) => {
                    AnnotationPayload::Map(pairs.iter().map(|(k, v)| (r.rewrite_string(*k), r.rewrite_operand(*v))).collect())
                }
            },
        })
        .collect()
}

/// Best-effort type for a lifted parameter: `check::type_of` is a total
/// map over every value-class payload bar a handful of still-unbound
/// shapes (`Unbound`, `UntypedNumber`, an untyped `Composite`/`Tuple`)
/// that shouldn't survive this far down the pipeline. There's no cached
/// type to fall back on here — `infer`'s cache lives in its own arena,
/// and nothing downstream of it threads that cache into its own fresh
/// one (see `lower_int64`'s module doc comment for the same gap) — so
/// this recomputes structurally, same as `lower_int64` does for the
/// narrower case of "is this operand 64 bits wide".
fn frontier_value_type(r: &Rewriter<'_>, value: NodeId) -> NodeId {
    let payload = r.src_arena.payload_of(value).clone();
    match shady_ir::type_of(r.src_arena, &payload) {
        Ok(Some(ty)) => r.rewrite_operand(ty),
        _ => {
            let unit = r.dst_arena.intern_node(Payload::Unit).unwrap().id();
            r.dst_arena
                .intern_node(Payload::QualifiedType { uniformity: shady_ir::Uniformity::Unknown, inner: unit })
                .unwrap()
                .id()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shady_ir::ArenaConfig;

    fn unchecked() -> Arena {
        Arena::new(ArenaConfig { check_types: false, ..ArenaConfig::default() })
    }

    /// `entry` declares `x` as a param and jumps to `child`, which reads
    /// `x` without having it in its own params: after lifting, `child`
    /// gains an extra param for `x`, its own body resolves to that local
    /// param rather than `x` directly, and `entry`'s jump gains the
    /// matching extra argument (still `x`, since `x` is `entry`'s own
    /// param and never needed lifting there).
    #[test]
    fn a_free_variable_becomes_an_extra_param_and_jump_argument() {
        let src = unchecked();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let x_name = src.intern_string("x");
        let x = src.declare(Payload::Param { ty: i32_ty.id(), name: x_name });

        let child_name = src.intern_string("child");
        let child_ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(x.id(), 1) }).unwrap();
        let child = src.declare(Payload::BasicBlock { params: NodeIdVec::new(), body: Some(child_ret.id()), name: child_name });

        let jump = src.intern_node(Payload::Jump { target: child.id(), args: NodeIdVec::new(), mem: None }).unwrap();
        let entry_name = src.intern_string("entry");
        let entry = src.declare(Payload::BasicBlock { params: NodeIdVec::from_elem(x.id(), 1), body: Some(jump.id()), name: entry_name });

        let fn_name = src.intern_string("f");
        let function = src.declare(Payload::Function {
            annotations: vec![],
            name: fn_name,
            params: NodeIdVec::from_elem(x.id(), 1),
            return_types: NodeIdVec::new(),
            body: Some(entry.id()),
        });
        let mut module = Module::new();
        module.add_declaration(function);

        let (dst_arena, dst_module) = run(&src, &module, &PassConfig::default()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(entry_body), .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a function body");
        };
        let Payload::Jump { target, args, .. } = &*dst_arena.payload_of(*entry_body) else {
            panic!("expected the entry block's body to still be a jump");
        };
        assert_eq!(args.len(), 1, "entry's jump should carry x as an extra argument");

        let Payload::BasicBlock { params: child_params, body: Some(child_body), .. } = &*dst_arena.payload_of(*target) else {
            panic!("expected the jump target to be a basic block");
        };
        assert_eq!(child_params.len(), 1, "child should have gained one lifted param");

        let Payload::Return { args: ret_args } = &*dst_arena.payload_of(*child_body) else {
            panic!("expected child's body to still be a return");
        };
        assert_eq!(ret_args[0], child_params[0], "child's body should use its own lifted param, not the outer x");
    }

    #[test]
    fn a_structural_target_block_is_never_lifted() {
        let src = unchecked();
        let bool_ty = src.intern_node(Payload::Bool).unwrap();
        let cond = src.intern_node(Payload::True).unwrap();
        let i32_ty = src.intern_node(Payload::Int { width: 32, signed: true }).unwrap();
        let outer_name = src.intern_string("outer");
        let outer_x = src.declare(Payload::Param { ty: i32_ty.id(), name: outer_name });

        let true_name = src.intern_string("true_case");
        let true_ret = src.intern_node(Payload::Return { args: NodeIdVec::from_elem(outer_x.id(), 1) }).unwrap();
        let true_case = src.declare(Payload::BasicBlock { params: NodeIdVec::new(), body: Some(true_ret.id()), name: true_name });

        let merge_args = NodeIdVec::new();
        let tail_body = src.intern_node(Payload::MergeSelection { args: merge_args }).unwrap();
        let tail_name = src.intern_string("tail");
        let tail = src.declare(Payload::BasicBlock { params: NodeIdVec::new(), body: Some(tail_body.id()), name: tail_name });

        let if_node = src
            .intern_node(Payload::If {
                yield_types: NodeIdVec::new(),
                cond: cond.id(),
                true_case: true_case.id(),
                false_case: None,
                tail: tail.id(),
            })
            .unwrap();
        let _ = bool_ty;

        let entry_name = src.intern_string("entry");
        let entry = src.declare(Payload::BasicBlock { params: NodeIdVec::from_elem(outer_x.id(), 1), body: Some(if_node.id()), name: entry_name });

        let fn_name = src.intern_string("f");
        let function = src.declare(Payload::Function {
            annotations: vec![],
            name: fn_name,
            params: NodeIdVec::from_elem(outer_x.id(), 1),
            return_types: NodeIdVec::new(),
            body: Some(entry.id()),
        });
        let mut module = Module::new();
        module.add_declaration(function);

        let (dst_arena, dst_module) = run(&src, &module, &PassConfig::default()).unwrap();
        let dst_function = dst_module.declarations()[0];
        let Payload::Function { body: Some(entry_body), .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a function body");
        };
        let Payload::If { true_case, .. } = &*dst_arena.payload_of(*entry_body) else {
            panic!("expected the entry block's body to still be an If");
        };
        let Payload::BasicBlock { params, body: Some(body), .. } = &*dst_arena.payload_of(*true_case) else {
            panic!("expected the true case to be a basic block");
        };
        assert!(params.is_empty(), "the true case is a structural target and must not gain a lifted param");

        let Payload::Return { args } = &*dst_arena.payload_of(*body) else {
            panic!("expected the true case's body to still be a return");
        };
        let Payload::Function { params: fn_params, .. } = &*dst_arena.payload(dst_function) else {
            panic!("expected a function");
        };
        assert_eq!(args[0], fn_params[0], "the structural target still resolves outer_x to the function's own param");
    }
}
