//! Dead code elimination pass.
//!
//! A value is dead when it has no remaining uses, is not referenced by a
//! terminator, and has no side effects. Stores, atomics, barriers and
//! calls are never dead; removal cascades through operand chains.

use std::collections::HashSet;

use kjit_ir::{Handle, IrContext, Method, Value};

use crate::Pass;

/// Removes values with zero uses and no side effects.
#[derive(Debug)]
pub struct Dce;

impl Pass for Dce {
    fn name(&self) -> &str {
        "dce"
    }

    fn run(&self, ctx: &mut IrContext, method: Handle<Method>) -> bool {
        // Terminator-referenced values are roots that use lists miss.
        let terminator_roots: HashSet<Handle<Value>> = {
            let m = ctx.method(method);
            m.blocks
                .iter()
                .filter_map(|(_, b)| b.terminator.as_ref())
                .flat_map(|t| t.used_values())
                .collect()
        };

        let mut builder = ctx.builder(method).expect("no live builder during passes");
        let mut changed = false;
        loop {
            let dead: Vec<Handle<Value>> = {
                let m = builder.method();
                m.blocks
                    .iter()
                    .flat_map(|(_, b)| b.values.iter().copied())
                    .filter(|&v| {
                        let value = &m.values[v];
                        value.uses.is_empty()
                            && !value.kind.has_side_effects()
                            && !terminator_roots.contains(&v)
                    })
                    .collect()
            };
            if dead.is_empty() {
                break;
            }
            for v in dead {
                builder.remove_value(v);
            }
            changed = true;
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_ir::{
        AddressSpace, ArithFlags, BinaryOp, MethodDecl, MethodFlags, MethodHandle, PrimitiveKind,
        UnaryOp, ValueKind,
    };

    fn method_returning_param(
        ctx: &mut IrContext,
        name: &str,
    ) -> (Handle<Method>, Handle<Value>) {
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, name),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t]).unwrap();
        let p0 = ctx.method(m).params[0];
        (m, p0)
    }

    #[test]
    fn removes_dead_chain_transitively() {
        let mut ctx = IrContext::new();
        let (m, p0) = method_returning_param(&mut ctx, "chain");
        {
            let mut b = ctx.builder(m).unwrap();
            let neg = b.unary(UnaryOp::Neg, ArithFlags::NONE, p0).unwrap();
            let _dead = b.binary(BinaryOp::Add, ArithFlags::NONE, neg, neg).unwrap();
            b.ret(Some(p0)).unwrap();
        }
        assert!(Dce.run(&mut ctx, m));
        let method = ctx.method(m);
        assert!(method.blocks[method.entry].values.is_empty());
    }

    #[test]
    fn keeps_stores_and_their_operands() {
        let mut ctx = IrContext::new();
        let (m, p0) = method_returning_param(&mut ctx, "store");
        {
            let mut b = ctx.builder(m).unwrap();
            let i32t = b.primitive_type(PrimitiveKind::Int32);
            let slot = b.alloca(i32t, AddressSpace::Local);
            b.store(slot, p0).unwrap();
            b.ret(Some(p0)).unwrap();
        }
        assert!(!Dce.run(&mut ctx, m));
        let method = ctx.method(m);
        let kinds: Vec<_> = method.blocks[method.entry]
            .values
            .iter()
            .map(|&v| &method.values[v].kind)
            .collect();
        assert!(kinds.iter().any(|k| matches!(k, ValueKind::Store)));
        assert!(kinds.iter().any(|k| matches!(k, ValueKind::Alloca { .. })));
    }

    #[test]
    fn keeps_terminator_referenced_values() {
        let mut ctx = IrContext::new();
        let (m, p0) = method_returning_param(&mut ctx, "retval");
        {
            let mut b = ctx.builder(m).unwrap();
            let one = b.int32(1);
            let sum = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, one).unwrap();
            b.ret(Some(sum)).unwrap();
        }
        assert!(!Dce.run(&mut ctx, m));
        let method = ctx.method(m);
        assert_eq!(method.blocks[method.entry].values.len(), 2);
    }
}
