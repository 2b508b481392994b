//! Backward liveness over basic blocks.
//!
//! φ-operands are live at the end of the corresponding predecessor, not
//! at the head of the φ's block, so they seed the predecessor's live-out
//! set instead of the block's upward-exposed uses.

use std::collections::HashSet;

use kjit_ir::{BasicBlock, Handle, Method, Value, ValueKind};

use crate::scope::Scope;

/// Live-in/live-out value sets per block.
#[derive(Debug)]
pub struct Liveness {
    live_in: Vec<HashSet<Handle<Value>>>,
    live_out: Vec<HashSet<Handle<Value>>>,
}

impl Liveness {
    /// Computes liveness for the scope of a method.
    pub fn compute(method: &Method, scope: &Scope) -> Self {
        let block_count = method.blocks.len();
        let mut upward = vec![HashSet::new(); block_count];
        let mut def = vec![HashSet::new(); block_count];

        for &block in scope.blocks() {
            let b = &method.blocks[block];
            let upward = &mut upward[block.index()];
            let def = &mut def[block.index()];
            for &v in &b.values {
                let value = &method.values[v];
                // φ-operands are handled on the predecessor side.
                if !value.kind.is_phi() {
                    for &op in &value.operands {
                        if !def.contains(&op) {
                            upward.insert(op);
                        }
                    }
                }
                def.insert(v);
            }
            if let Some(term) = &b.terminator {
                for v in term.used_values() {
                    if !def.contains(&v) {
                        upward.insert(v);
                    }
                }
            }
        }
        // Parameters are defined at the entry.
        for &p in &method.params {
            def[method.entry.index()].insert(p);
        }

        // φ-inputs per predecessor edge.
        let mut phi_inputs: Vec<HashSet<Handle<Value>>> = vec![HashSet::new(); block_count];
        for &block in scope.blocks() {
            for &v in &method.blocks[block].values {
                let value = &method.values[v];
                if let ValueKind::Phi { incoming } = &value.kind {
                    for (&pred, &input) in incoming.iter().zip(&value.operands) {
                        phi_inputs[pred.index()].insert(input);
                    }
                }
            }
        }

        let mut live_in = vec![HashSet::new(); block_count];
        let mut live_out: Vec<HashSet<Handle<Value>>> = vec![HashSet::new(); block_count];
        let mut changed = true;
        while changed {
            changed = false;
            // Postorder converges fastest for a backward problem.
            for &block in scope.blocks().iter().rev() {
                let i = block.index();
                let mut out: HashSet<Handle<Value>> = phi_inputs[i].iter().copied().collect();
                for succ in method.blocks[block].successors() {
                    out.extend(live_in[succ.index()].iter().copied());
                }
                let mut inset = upward[i].clone();
                inset.extend(out.difference(&def[i]).copied());
                if out != live_out[i] || inset != live_in[i] {
                    live_out[i] = out;
                    live_in[i] = inset;
                    changed = true;
                }
            }
        }

        Self { live_in, live_out }
    }

    /// Values live at the head of a block.
    pub fn live_in(&self, block: Handle<BasicBlock>) -> &HashSet<Handle<Value>> {
        &self.live_in[block.index()]
    }

    /// Values live past the end of a block.
    pub fn live_out(&self, block: Handle<BasicBlock>) -> &HashSet<Handle<Value>> {
        &self.live_out[block.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_ir::{
        ArithFlags, BinaryOp, CompareFlags, CompareOp, IrContext, MethodDecl, MethodFlags,
        MethodHandle, PrimitiveKind,
    };

    #[test]
    fn straight_line_liveness_is_local() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "line"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t]).unwrap();
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let sum = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, p0).unwrap();
        b.ret(Some(sum)).unwrap();
        drop(b);

        let method = ctx.method(m);
        let scope = Scope::compute(method);
        let live = Liveness::compute(method, &scope);
        assert!(live.live_in(method.entry).is_empty());
        assert!(live.live_out(method.entry).is_empty());
    }

    #[test]
    fn value_used_across_blocks_is_live_out() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "cross"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t]).unwrap();
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let entry = b.current_block();
        let next = b.create_block();
        let one = b.int32(1);
        let sum = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, one).unwrap();
        b.branch(next);
        b.select_block(next);
        b.ret(Some(sum)).unwrap();
        drop(b);

        let method = ctx.method(m);
        let scope = Scope::compute(method);
        let live = Liveness::compute(method, &scope);
        assert!(live.live_out(entry).contains(&sum));
        assert!(live.live_in(next).contains(&sum));
    }

    #[test]
    fn phi_operand_is_live_out_of_predecessor_only() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "phi"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t, i32t]).unwrap();
        let mut b = ctx.builder(m).unwrap();
        let p0 = b.method().params[0];
        let p1 = b.method().params[1];
        let entry = b.current_block();
        let left = b.create_block();
        let right = b.create_block();
        let join = b.create_block();
        let zero = b.int32(0);
        let cond = b.compare(CompareOp::Lt, CompareFlags::NONE, p0, zero).unwrap();
        b.cond_branch(cond, left, right).unwrap();
        b.select_block(left);
        let a = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, p1).unwrap();
        b.branch(join);
        b.select_block(right);
        let s = b.binary(BinaryOp::Sub, ArithFlags::NONE, p0, p1).unwrap();
        b.branch(join);
        b.select_block(join);
        let phi = b.phi(i32t);
        b.add_phi_incoming(phi, left, a).unwrap();
        b.add_phi_incoming(phi, right, s).unwrap();
        b.ret(Some(phi)).unwrap();
        drop(b);

        let method = ctx.method(m);
        let scope = Scope::compute(method);
        let live = Liveness::compute(method, &scope);
        assert!(live.live_out(left).contains(&a));
        assert!(live.live_out(right).contains(&s));
        // The φ-input is not upward-exposed in the join block.
        assert!(!live.live_in(join).contains(&a));
        let _ = entry;
    }
}
