//! Canonical type names and the IR text dump.
//!
//! The dump format is stable enough to test against:
//!
//! ```text
//! Kernel(%0 : i32, %1 : view<global, i32>) -> void
//! BB0:
//!   %3 : i32 = add %0, %2
//!   br BB1
//! BB1:
//!   ret
//! ```
//!
//! Constant, null, poison and string values render inline at their use
//! sites (`const(7:i32)`, `null`, `poison`, `str("…")`) and get no
//! definition lines of their own.

use std::fmt::Write as _;

use crate::arena::{Handle, UniqueArena};
use crate::block::Terminator;
use crate::context::IrContext;
use crate::method::Method;
use crate::types::{AddressSpace, PrimitiveKind, Type, TypeInner};
use crate::value::{
    ArithFlags, AtomicOp, BarrierKind, BinaryOp, CompareFlags, CompareOp, Dim3, IntrinsicKind,
    PrimitiveValue, ShuffleMode, TernaryOp, UnaryOp, Value, ValueKind,
};

/// Lowercase canonical name of an address space.
pub fn address_space_name(space: AddressSpace) -> &'static str {
    match space {
        AddressSpace::Generic => "generic",
        AddressSpace::Global => "global",
        AddressSpace::Shared => "shared",
        AddressSpace::Local => "local",
        AddressSpace::Constant => "constant",
    }
}

/// Lowercase canonical name of a primitive kind.
pub fn primitive_name(kind: PrimitiveKind) -> &'static str {
    match kind {
        PrimitiveKind::Int1 => "i1",
        PrimitiveKind::Int8 => "i8",
        PrimitiveKind::Int16 => "i16",
        PrimitiveKind::Int32 => "i32",
        PrimitiveKind::Int64 => "i64",
        PrimitiveKind::Float32 => "f32",
        PrimitiveKind::Float64 => "f64",
    }
}

/// Canonical textual form of a type (`i32`, `ptr<global, i8>`, …).
pub fn type_string(types: &UniqueArena<Type>, ty: Handle<Type>) -> String {
    match &types[ty].inner {
        TypeInner::Void => "void".into(),
        TypeInner::Primitive(kind) => primitive_name(*kind).into(),
        TypeInner::Pointer { elem, space } => format!(
            "ptr<{}, {}>",
            address_space_name(*space),
            type_string(types, *elem)
        ),
        TypeInner::View { elem, space } => format!(
            "view<{}, {}>",
            address_space_name(*space),
            type_string(types, *elem)
        ),
        TypeInner::Array { elem, size } => {
            format!("array<{}, {size}>", type_string(types, *elem))
        }
        TypeInner::Struct { fields } => {
            let inner: Vec<_> = fields.iter().map(|&f| type_string(types, f)).collect();
            format!("struct{{{}}}", inner.join(","))
        }
        TypeInner::String => "string".into(),
    }
}

fn literal_string(v: PrimitiveValue) -> String {
    match v {
        PrimitiveValue::Int1(x) => format!("{x}:i1"),
        PrimitiveValue::Int8(x) => format!("{x}:i8"),
        PrimitiveValue::Int16(x) => format!("{x}:i16"),
        PrimitiveValue::Int32(x) => format!("{x}:i32"),
        PrimitiveValue::Int64(x) => format!("{x}:i64"),
        PrimitiveValue::Float32(x) => format!("{x}:f32"),
        PrimitiveValue::Float64(x) => format!("{x}:f64"),
    }
}

/// Renders an operand reference: inline for constants, `%id` otherwise.
fn operand_string(method: &Method, v: Handle<Value>) -> String {
    let value = &method.values[v];
    match &value.kind {
        ValueKind::Constant(c) => format!("const({})", literal_string(*c)),
        ValueKind::Null => "null".into(),
        ValueKind::Poison => "poison".into(),
        ValueKind::StringConstant(s) => format!("str({s:?})"),
        _ => format!("%{}", value.id),
    }
}

fn unary_name(op: UnaryOp) -> &'static str {
    match op {
        UnaryOp::Neg => "neg",
        UnaryOp::Not => "not",
        UnaryOp::Abs => "abs",
        UnaryOp::Ceiling => "ceil",
        UnaryOp::Floor => "floor",
        UnaryOp::Sin => "sin",
        UnaryOp::Cos => "cos",
        UnaryOp::Tanh => "tanh",
        UnaryOp::Exp => "exp",
        UnaryOp::Exp2 => "exp2",
        UnaryOp::Log => "log",
        UnaryOp::Log2 => "log2",
        UnaryOp::Sqrt => "sqrt",
        UnaryOp::Rsqrt => "rsqrt",
    }
}

fn binary_name(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "add",
        BinaryOp::Sub => "sub",
        BinaryOp::Mul => "mul",
        BinaryOp::Div => "div",
        BinaryOp::Rem => "rem",
        BinaryOp::And => "and",
        BinaryOp::Or => "or",
        BinaryOp::Xor => "xor",
        BinaryOp::Shl => "shl",
        BinaryOp::Shr => "shr",
        BinaryOp::Min => "min",
        BinaryOp::Max => "max",
        BinaryOp::Pow => "pow",
        BinaryOp::Atan2 => "atan2",
    }
}

fn compare_name(op: CompareOp) -> &'static str {
    match op {
        CompareOp::Eq => "cmp.eq",
        CompareOp::Ne => "cmp.ne",
        CompareOp::Lt => "cmp.lt",
        CompareOp::Le => "cmp.le",
        CompareOp::Gt => "cmp.gt",
        CompareOp::Ge => "cmp.ge",
    }
}

fn atomic_name(op: AtomicOp) -> &'static str {
    match op {
        AtomicOp::Add => "atomic.add",
        AtomicOp::And => "atomic.and",
        AtomicOp::Or => "atomic.or",
        AtomicOp::Xor => "atomic.xor",
        AtomicOp::Min => "atomic.min",
        AtomicOp::Max => "atomic.max",
        AtomicOp::Exchange => "atomic.xchg",
    }
}

fn dim_name(dim: Dim3) -> &'static str {
    match dim {
        Dim3::X => "x",
        Dim3::Y => "y",
        Dim3::Z => "z",
    }
}

fn intrinsic_string(kind: &IntrinsicKind) -> String {
    match kind {
        IntrinsicKind::GridIndex(d) => format!("gridindex.{}", dim_name(*d)),
        IntrinsicKind::GridDim(d) => format!("griddim.{}", dim_name(*d)),
        IntrinsicKind::GroupIndex(d) => format!("groupindex.{}", dim_name(*d)),
        IntrinsicKind::GroupDim(d) => format!("groupdim.{}", dim_name(*d)),
        IntrinsicKind::LaneIndex => "laneindex".into(),
        IntrinsicKind::WarpSize => "warpsize".into(),
        IntrinsicKind::Shuffle { mode, width } => {
            let mode = match mode {
                ShuffleMode::Idx => "idx",
                ShuffleMode::Up => "up",
                ShuffleMode::Down => "down",
                ShuffleMode::Xor => "xor",
            };
            format!("shuffle.{mode}.{width}")
        }
        IntrinsicKind::GroupBarrier => "groupbarrier".into(),
    }
}

fn value_line(ctx: &IrContext, method: &Method, v: Handle<Value>) -> Option<String> {
    let value = &method.values[v];
    let ops = |range: std::ops::Range<usize>| -> String {
        value.operands[range]
            .iter()
            .map(|&op| operand_string(method, op))
            .collect::<Vec<_>>()
            .join(", ")
    };
    let all_ops = || ops(0..value.operands.len());
    let un = |flags: ArithFlags| {
        if flags.contains(ArithFlags::UNSIGNED) {
            ".un"
        } else {
            ""
        }
    };
    let rhs = match &value.kind {
        // Inline-rendered values get no definition lines.
        ValueKind::Constant(_)
        | ValueKind::Null
        | ValueKind::Poison
        | ValueKind::StringConstant(_)
        | ValueKind::Parameter { .. } => return None,
        ValueKind::Unary { op, flags } => format!("{}{} {}", unary_name(*op), un(*flags), all_ops()),
        ValueKind::Binary { op, flags } => {
            format!("{}{} {}", binary_name(*op), un(*flags), all_ops())
        }
        ValueKind::Ternary { op, flags } => {
            let name = match op {
                TernaryOp::MultiplyAdd => "fma",
            };
            format!("{}{} {}", name, un(*flags), all_ops())
        }
        ValueKind::Compare { op, flags } => {
            let mut name = compare_name(*op).to_string();
            if flags.contains(CompareFlags::UNSIGNED) {
                name.push_str(".un");
            }
            if flags.contains(CompareFlags::UNORDERED) {
                name.push_str(".unord");
            }
            format!("{name} {}", all_ops())
        }
        ValueKind::Convert { .. } => format!("conv {}", all_ops()),
        ValueKind::BitCast => format!("bitcast {}", all_ops()),
        ValueKind::PointerCast => format!("ptrcast {}", all_ops()),
        ValueKind::Load => format!("load {}", all_ops()),
        ValueKind::Store => format!("store {}", all_ops()),
        ValueKind::Alloca { space } => format!("alloca {}", address_space_name(*space)),
        ValueKind::MemoryBarrier { kind } => match kind {
            BarrierKind::Group => "membar.group".into(),
            BarrierKind::Device => "membar.device".into(),
            BarrierKind::System => "membar.system".into(),
        },
        ValueKind::GetField { field } => format!("getfield {}, {field}", all_ops()),
        ValueKind::SetField { field } => {
            format!("setfield {}, {field}, {}", ops(0..1), ops(1..2))
        }
        ValueKind::LoadFieldAddress { field } => format!("fieldaddr {}, {field}", all_ops()),
        ValueKind::ElementAddress => format!("elemaddr {}", all_ops()),
        ValueKind::ViewLength => format!("viewlen {}", all_ops()),
        ValueKind::AtomicRmw { op, flags } => {
            format!("{}{} {}", atomic_name(*op), un(*flags), all_ops())
        }
        ValueKind::AtomicCas => format!("atomic.cas {}", all_ops()),
        ValueKind::Phi { incoming } => {
            let edges: Vec<_> = incoming
                .iter()
                .zip(&value.operands)
                .map(|(b, &v)| format!("BB{}: {}", b.index(), operand_string(method, v)))
                .collect();
            format!("phi [{}]", edges.join(", "))
        }
        ValueKind::Call { callee } => {
            format!("call {}({})", ctx.method(*callee).decl.handle, all_ops())
        }
        ValueKind::Intrinsic(kind) => {
            let name = intrinsic_string(kind);
            if value.operands.is_empty() {
                name
            } else {
                format!("{name} {}", all_ops())
            }
        }
    };
    Some(format!(
        "  %{} : {} = {}",
        value.id,
        type_string(&ctx.types, value.ty),
        rhs
    ))
}

fn terminator_line(method: &Method, term: &Terminator) -> String {
    match term {
        Terminator::Branch { target } => format!("  br BB{}", target.index()),
        Terminator::CondBranch {
            condition,
            on_true,
            on_false,
        } => format!(
            "  condbr {}, BB{}, BB{}",
            operand_string(method, *condition),
            on_true.index(),
            on_false.index()
        ),
        Terminator::Switch {
            value,
            cases,
            default,
        } => {
            let arms: Vec<_> = cases
                .iter()
                .map(|(k, b)| format!("{k}: BB{}", b.index()))
                .collect();
            format!(
                "  switch {}, [{}], BB{}",
                operand_string(method, *value),
                arms.join(", "),
                default.index()
            )
        }
        Terminator::Return { value } => match value {
            Some(v) => format!("  ret {}", operand_string(method, *v)),
            None => "  ret".into(),
        },
    }
}

/// Produces the textual dump of a method.
pub fn dump_method(ctx: &IrContext, method: Handle<Method>) -> String {
    let m = ctx.method(method);
    let mut out = String::new();

    let params: Vec<_> = m
        .params
        .iter()
        .map(|&p| {
            let v = &m.values[p];
            format!("%{} : {}", v.id, type_string(&ctx.types, v.ty))
        })
        .collect();
    let _ = writeln!(
        out,
        "{}({}) -> {}",
        m.decl.handle,
        params.join(", "),
        type_string(&ctx.types, m.decl.return_type)
    );

    for (handle, block) in m.blocks.iter() {
        if block.values.is_empty() && block.terminator.is_none() {
            continue;
        }
        let _ = writeln!(out, "BB{}:", handle.index());
        for &v in &block.values {
            if let Some(line) = value_line(ctx, m, v) {
                let _ = writeln!(out, "{line}");
            }
        }
        if let Some(term) = &block.terminator {
            let _ = writeln!(out, "{}", terminator_line(m, term));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{MethodDecl, MethodFlags, MethodHandle};
    use crate::value::{ArithFlags, BinaryOp};

    #[test]
    fn canonical_type_names() {
        let mut ctx = IrContext::new();
        let i8t = ctx.primitive(PrimitiveKind::Int8);
        let f32t = ctx.primitive(PrimitiveKind::Float32);
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let i64t = ctx.primitive(PrimitiveKind::Int64);
        let ptr = ctx.pointer_to(i8t, AddressSpace::Global);
        let view = ctx.view_of(f32t, AddressSpace::Global);
        let st = ctx.structure(vec![i32t, i64t]);
        assert_eq!(type_string(&ctx.types, ptr), "ptr<global, i8>");
        assert_eq!(type_string(&ctx.types, view), "view<global, f32>");
        assert_eq!(type_string(&ctx.types, st), "struct{i32,i64}");
    }

    #[test]
    fn dump_renders_constants_inline() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "Mul7"),
            return_type: i32t,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t]).unwrap();
        {
            let mut b = ctx.builder(m).unwrap();
            let p0 = b.method().params[0];
            let seven = b.int32(7);
            let mul = b.binary(BinaryOp::Mul, ArithFlags::NONE, p0, seven).unwrap();
            b.ret(Some(mul)).unwrap();
        }
        let dump = dump_method(&ctx, m);
        assert!(dump.contains("Mul7(%0 : i32) -> i32"), "{dump}");
        assert!(dump.contains("= mul %0, const(7:i32)"), "{dump}");
        assert!(dump.contains("BB0:"), "{dump}");
        assert!(!dump.contains("= const"), "{dump}");
    }

    #[test]
    fn dump_renders_phi_edges() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let void = ctx.void_type();
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "Phi"),
            return_type: void,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[i32t, i32t]).unwrap();
        {
            let mut b = ctx.builder(m).unwrap();
            let p0 = b.method().params[0];
            let p1 = b.method().params[1];
            let entry = b.current_block();
            let join = b.create_block();
            b.branch(join);
            b.select_block(join);
            let phi = b.phi(i32t);
            b.add_phi_incoming(phi, entry, p0).unwrap();
            b.add_phi_incoming(phi, entry, p1).unwrap();
            b.ret(None).unwrap();
        }
        let dump = dump_method(&ctx, m);
        assert!(dump.contains("phi [BB0: %0, BB0: %1]"), "{dump}");
    }
}
