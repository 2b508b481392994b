//! Inlining pass.
//!
//! Expands call sites whose callee is marked `AGGRESSIVE_INLINING` or
//! falls under the size threshold, respecting `NO_INLINING` and external
//! declarations. Expansion splits the call block, clones the callee's
//! reachable blocks and values into the caller, branches through the
//! clone, and rewires returns into a φ at the continuation.

use std::collections::HashMap;

use kjit_analysis::Scope;
use kjit_ir::{
    BasicBlock, Handle, IrContext, Method, MethodFlags, Terminator, Value, ValueKind,
};

use crate::Pass;

/// Default size bound (linked values) for non-aggressive candidates.
pub const DEFAULT_INLINE_THRESHOLD: usize = 32;

/// Upper bound on expansions per pass invocation.
const EXPANSION_LIMIT: usize = 64;

/// Expands inlinable call sites.
#[derive(Debug)]
pub struct Inliner {
    threshold: usize,
}

impl Default for Inliner {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_INLINE_THRESHOLD,
        }
    }
}

impl Inliner {
    /// Creates an inliner with a custom size threshold.
    pub fn with_threshold(threshold: usize) -> Self {
        Self { threshold }
    }

    fn find_site(
        &self,
        ctx: &IrContext,
        method: Handle<Method>,
    ) -> Option<(Handle<Value>, Handle<Method>)> {
        let m = ctx.method(method);
        for (_, block) in m.blocks.iter() {
            for &v in &block.values {
                let ValueKind::Call { callee } = m.values[v].kind else {
                    continue;
                };
                if callee == method {
                    continue;
                }
                let cm = ctx.method(callee);
                let flags = cm.decl.flags;
                if flags.contains(MethodFlags::NO_INLINING)
                    || flags.contains(MethodFlags::EXTERNAL)
                    || flags.contains(MethodFlags::EXTERNAL_DECLARATION)
                {
                    continue;
                }
                // A callee without a terminated entry has no body to splice.
                if cm.blocks[cm.entry].terminator.is_none() {
                    continue;
                }
                if flags.contains(MethodFlags::AGGRESSIVE_INLINING)
                    || cm.linked_value_count() <= self.threshold
                {
                    return Some((v, callee));
                }
            }
        }
        None
    }
}

impl Pass for Inliner {
    fn name(&self) -> &str {
        "inline"
    }

    fn run(&self, ctx: &mut IrContext, method: Handle<Method>) -> bool {
        let mut changed = false;
        for _ in 0..EXPANSION_LIMIT {
            let Some((call, callee)) = self.find_site(ctx, method) else {
                break;
            };
            expand(ctx, method, call, callee);
            changed = true;
        }
        changed
    }
}

fn expand(
    ctx: &mut IrContext,
    method: Handle<Method>,
    call: Handle<Value>,
    callee: Handle<Method>,
) {
    // Snapshot the callee so the caller can be mutated freely. Types are
    // context-level handles and stay valid across methods.
    let callee_m: Method = ctx.method(callee).clone();
    let callee_scope = Scope::compute(&callee_m);
    let ret_is_void = ctx.types[callee_m.decl.return_type].is_void();

    let mut b = ctx.builder(method).expect("no live builder during passes");
    let call_block = b.value(call).block;
    let args = b.value(call).operands.clone();
    let continuation = b.split_block(call_block, call);

    // Fresh caller blocks for every reachable callee block.
    let mut block_map: HashMap<Handle<BasicBlock>, Handle<BasicBlock>> = HashMap::new();
    for &cb in callee_scope.blocks() {
        block_map.insert(cb, b.create_block());
    }

    // Clone values in RPO; operands of non-φ values are always mapped
    // already (definitions dominate uses). φ-operands may be forward
    // references and are wired afterwards.
    let mut value_map: HashMap<Handle<Value>, Handle<Value>> = HashMap::new();
    for (i, &p) in callee_m.params.iter().enumerate() {
        value_map.insert(p, args[i]);
    }
    let mut pending_phis: Vec<Handle<Value>> = Vec::new();
    for &cb in callee_scope.blocks() {
        let target = block_map[&cb];
        for &cv in &callee_m.blocks[cb].values {
            let value = &callee_m.values[cv];
            if value.kind.is_phi() {
                let phi = b.phi_in(target, value.ty);
                value_map.insert(cv, phi);
                pending_phis.push(cv);
            } else {
                let operands: Vec<_> = value.operands.iter().map(|op| value_map[op]).collect();
                let cloned = b.append_raw(target, value.kind.clone(), value.ty, operands);
                value_map.insert(cv, cloned);
            }
        }
    }

    // Terminators: returns branch to the continuation; everything else is
    // remapped edge for edge.
    let mut returns: Vec<(Handle<BasicBlock>, Option<Handle<Value>>)> = Vec::new();
    for &cb in callee_scope.blocks() {
        let target = block_map[&cb];
        let term = callee_m.blocks[cb]
            .terminator
            .as_ref()
            .expect("reachable callee blocks are terminated");
        let mapped = match term {
            Terminator::Branch { target: t } => Terminator::Branch {
                target: block_map[t],
            },
            Terminator::CondBranch {
                condition,
                on_true,
                on_false,
            } => Terminator::CondBranch {
                condition: value_map[condition],
                on_true: block_map[on_true],
                on_false: block_map[on_false],
            },
            Terminator::Switch {
                value,
                cases,
                default,
            } => Terminator::Switch {
                value: value_map[value],
                cases: cases.iter().map(|(k, t)| (*k, block_map[t])).collect(),
                default: block_map[default],
            },
            Terminator::Return { value } => {
                returns.push((target, value.map(|v| value_map[&v])));
                Terminator::Branch {
                    target: continuation,
                }
            }
        };
        b.replace_terminator(target, mapped);
    }

    // Wire cloned φ-edges now that every value exists.
    for cv in pending_phis {
        let ValueKind::Phi { incoming } = &callee_m.values[cv].kind else {
            unreachable!("pending phi is a phi");
        };
        let phi = value_map[&cv];
        for (pred, &op) in incoming.iter().zip(&callee_m.values[cv].operands) {
            b.add_phi_incoming(phi, block_map[pred], value_map[&op])
                .expect("cloned phi edges type-check");
        }
    }

    // The call result becomes the merged return value.
    if !ret_is_void {
        match returns.as_slice() {
            [] => {}
            [(_, Some(single))] => b.replace_all_uses(call, *single),
            _ => {
                let ret_ty = callee_m.decl.return_type;
                let phi = b.phi_in(continuation, ret_ty);
                for (from, value) in &returns {
                    let value = value.expect("non-void return carries a value");
                    b.add_phi_incoming(phi, *from, value)
                        .expect("return values type-check");
                }
                b.replace_all_uses(call, phi);
            }
        }
    }

    // Branch through the clone and retire the call node.
    b.replace_terminator(
        call_block,
        Terminator::Branch {
            target: block_map[&callee_m.entry],
        },
    );
    b.remove_value(call);
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_ir::{
        ArithFlags, BinaryOp, CompareFlags, CompareOp, MethodDecl, MethodHandle, PrimitiveKind,
        PrimitiveValue,
    };

    fn make_callee(
        ctx: &mut IrContext,
        name: &str,
        flags: MethodFlags,
        diamond: bool,
    ) -> Handle<Method> {
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(100, name),
            return_type: i32t,
            source: None,
            flags,
        };
        let callee = ctx.create_method(decl, &[i32t]).unwrap();
        let mut b = ctx.builder(callee).unwrap();
        let p0 = b.method().params[0];
        if diamond {
            let pos = b.create_block();
            let neg = b.create_block();
            let zero = b.int32(0);
            let cond = b.compare(CompareOp::Ge, CompareFlags::NONE, p0, zero).unwrap();
            b.cond_branch(cond, pos, neg).unwrap();
            b.select_block(pos);
            b.ret(Some(p0)).unwrap();
            b.select_block(neg);
            let negated = b.unary(kjit_ir::UnaryOp::Neg, ArithFlags::NONE, p0).unwrap();
            b.ret(Some(negated)).unwrap();
        } else {
            let one = b.int32(1);
            let sum = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, one).unwrap();
            b.ret(Some(sum)).unwrap();
        }
        drop(b);
        callee
    }

    fn make_caller(ctx: &mut IrContext, callee: Handle<Method>) -> Handle<Method> {
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "caller"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t]).unwrap();
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let result = b.call(callee, &[p0]).unwrap();
        b.ret(Some(result)).unwrap();
        drop(b);
        m
    }

    fn call_count(ctx: &IrContext, m: Handle<Method>) -> usize {
        let method = ctx.method(m);
        method
            .blocks
            .iter()
            .flat_map(|(_, b)| b.values.iter())
            .filter(|&&v| matches!(method.values[v].kind, ValueKind::Call { .. }))
            .count()
    }

    #[test]
    fn small_callee_is_inlined() {
        let mut ctx = IrContext::new();
        let callee = make_callee(&mut ctx, "inc", MethodFlags::NONE, false);
        let m = make_caller(&mut ctx, callee);
        assert!(Inliner::default().run(&mut ctx, m));
        assert_eq!(call_count(&ctx, m), 0);
    }

    #[test]
    fn no_inlining_flag_is_respected() {
        let mut ctx = IrContext::new();
        let callee = make_callee(&mut ctx, "inc", MethodFlags::NO_INLINING, false);
        let m = make_caller(&mut ctx, callee);
        assert!(!Inliner::default().run(&mut ctx, m));
        assert_eq!(call_count(&ctx, m), 1);
    }

    #[test]
    fn aggressive_flag_overrides_size_threshold() {
        let mut ctx = IrContext::new();
        let callee = make_callee(
            &mut ctx,
            "abs",
            MethodFlags::AGGRESSIVE_INLINING,
            true,
        );
        let m = make_caller(&mut ctx, callee);
        assert!(Inliner::with_threshold(0).run(&mut ctx, m));
        assert_eq!(call_count(&ctx, m), 0);
    }

    #[test]
    fn multi_return_callee_merges_through_phi() {
        let mut ctx = IrContext::new();
        let callee = make_callee(&mut ctx, "abs", MethodFlags::NONE, true);
        let m = make_caller(&mut ctx, callee);
        assert!(Inliner::default().run(&mut ctx, m));
        assert_eq!(call_count(&ctx, m), 0);
        let method = ctx.method(m);
        let phi_count = method
            .blocks
            .iter()
            .flat_map(|(_, b)| b.values.iter())
            .filter(|&&v| method.values[v].kind.is_phi())
            .count();
        assert_eq!(phi_count, 1);
    }

    #[test]
    fn inlined_constant_argument_folds_after_pipeline() {
        use kjit_backend_core::KernelSpecialization;

        let mut ctx = IrContext::new();
        let callee = make_callee(&mut ctx, "inc", MethodFlags::NONE, false);
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "caller"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[]).unwrap();
        {
            let mut b = ctx.builder(m).unwrap();
            let seven = b.int32(7);
            let result = b.call(callee, &[seven]).unwrap();
            b.ret(Some(result)).unwrap();
        }
        let pm = crate::PassManager::standard(&KernelSpecialization::default());
        pm.run(&mut ctx, m);
        let method = ctx.method(m);
        assert!(matches!(
            method.blocks[method.entry].terminator,
            Some(Terminator::Return { value: Some(v) })
                if method.values[v].as_constant() == Some(PrimitiveValue::Int32(8))
        ));
    }
}
