//! Constant folding pass.
//!
//! The builder already folds operations created with constant operands;
//! this pass re-folds values whose operands *became* constant through
//! other passes (inlining, specialization, φ-simplification).

use kjit_ir::fold::{self, Folded};
use kjit_ir::{Handle, IrContext, Method, PrimitiveValue, Value, ValueKind};

use crate::Pass;

/// Re-folds values whose operands are now all constant.
#[derive(Debug)]
pub struct ConstantFolder;

impl Pass for ConstantFolder {
    fn name(&self) -> &str {
        "const-fold"
    }

    fn run(&self, ctx: &mut IrContext, method: Handle<Method>) -> bool {
        // Collect replacements first to avoid mutating while iterating.
        let mut worklist: Vec<(Handle<Value>, Folded)> = Vec::new();
        {
            let m = ctx.method(method);
            for (_, block) in m.blocks.iter() {
                for &v in &block.values {
                    if let Some(folded) = try_fold(ctx, m, v) {
                        worklist.push((v, folded));
                    }
                }
            }
        }
        if worklist.is_empty() {
            return false;
        }

        let mut builder = ctx.builder(method).expect("no live builder during passes");
        for (v, folded) in worklist {
            match folded {
                Folded::Value(c) => builder.replace_with_constant(v, c),
                Folded::Poison => builder.replace_with_poison(v),
            }
        }
        true
    }
}

fn constant_operand(m: &Method, v: Handle<Value>, index: usize) -> Option<PrimitiveValue> {
    m.values[m.values[v].operands[index]].as_constant()
}

fn try_fold(ctx: &IrContext, m: &Method, v: Handle<Value>) -> Option<Folded> {
    let value = &m.values[v];
    let pure_arith = matches!(
        value.kind,
        ValueKind::Unary { .. }
            | ValueKind::Binary { .. }
            | ValueKind::Ternary { .. }
            | ValueKind::Compare { .. }
            | ValueKind::Convert { .. }
            | ValueKind::BitCast
    );
    if !pure_arith {
        return None;
    }
    let any_poison = value
        .operands
        .iter()
        .any(|&op| matches!(m.values[op].kind, ValueKind::Poison));
    if any_poison {
        return Some(Folded::Poison);
    }
    match value.kind {
        ValueKind::Unary { op, flags } => {
            let x = constant_operand(m, v, 0)?;
            fold::unary(op, flags, x)
        }
        ValueKind::Binary { op, flags } => {
            let l = constant_operand(m, v, 0)?;
            let r = constant_operand(m, v, 1)?;
            fold::binary(op, flags, l, r)
        }
        ValueKind::Ternary { op, flags } => {
            let a = constant_operand(m, v, 0)?;
            let b = constant_operand(m, v, 1)?;
            let c = constant_operand(m, v, 2)?;
            fold::ternary(op, flags, a, b, c)
        }
        ValueKind::Compare { op, flags } => {
            let l = constant_operand(m, v, 0)?;
            let r = constant_operand(m, v, 1)?;
            fold::compare(op, flags, l, r).map(Folded::Value)
        }
        ValueKind::Convert { flags } => {
            let x = constant_operand(m, v, 0)?;
            let to = ctx.types[value.ty].as_primitive()?;
            Some(Folded::Value(fold::convert(x, to, flags)))
        }
        ValueKind::BitCast => {
            let x = constant_operand(m, v, 0)?;
            let to = ctx.types[value.ty].as_primitive()?;
            fold::bit_cast(x, to).map(Folded::Value)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_ir::{
        ArithFlags, BinaryOp, MethodDecl, MethodFlags, MethodHandle, PrimitiveKind,
    };

    #[test]
    fn refolds_after_operand_becomes_constant() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "refold"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[]).unwrap();
        let (dim, sum) = {
            let mut b = ctx.builder(m).unwrap();
            // group_dim is opaque at build time, so the add does not fold.
            let dim = b.group_dim(kjit_ir::Dim3::X);
            let one = b.int32(1);
            let sum = b.binary(BinaryOp::Add, ArithFlags::NONE, dim, one).unwrap();
            b.ret(Some(sum)).unwrap();
            (dim, sum)
        };
        assert!(matches!(
            ctx.method(m).values[sum].kind,
            ValueKind::Binary { .. }
        ));

        // Specialize the intrinsic by hand, then re-fold.
        {
            let mut b = ctx.builder(m).unwrap();
            b.replace_with_constant(dim, PrimitiveValue::Int32(255));
        }
        assert!(ConstantFolder.run(&mut ctx, m));
        assert_eq!(
            ctx.method(m).values[sum].as_constant(),
            Some(PrimitiveValue::Int32(256))
        );
    }

    #[test]
    fn no_change_without_constant_operands() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "opaque"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t, i32t]).unwrap();
        {
            let mut b = ctx.builder(m).unwrap();
            let p0 = b.method().params[0];
            let p1 = b.method().params[1];
            let sum = b.binary(BinaryOp::Add, ArithFlags::NONE, p0, p1).unwrap();
            b.ret(Some(sum)).unwrap();
        }
        assert!(!ConstantFolder.run(&mut ctx, m));
    }
}
