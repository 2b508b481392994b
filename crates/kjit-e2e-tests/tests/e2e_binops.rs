//! Exhaustive binary-operation folding grid.
//!
//! For each operation × integer width × signedness, feed the boundary
//! operand pairs through the builder's fold tables and check the results
//! against host two's-complement semantics. Division by zero never
//! occurs in the grid (the right-hand operands are all non-zero), so
//! every fold must produce a literal.

use kjit_ir::fold::{self, Folded};
use kjit_ir::{ArithFlags, BinaryOp, PrimitiveValue};

const OPS: [BinaryOp; 12] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::Div,
    BinaryOp::Rem,
    BinaryOp::And,
    BinaryOp::Or,
    BinaryOp::Xor,
    BinaryOp::Shl,
    BinaryOp::Shr,
    BinaryOp::Min,
    BinaryOp::Max,
];

macro_rules! signed_grid {
    ($ty:ty, $ctor:path) => {{
        let pairs: [($ty, $ty); 8] = [
            (<$ty>::MAX, 1),
            (<$ty>::MIN, <$ty>::MAX),
            (<$ty>::MIN + 1, <$ty>::MAX),
            (0, <$ty>::MAX),
            (0, <$ty>::MAX - 1),
            (1, 1),
            (6, 2),
            (5, 19),
        ];
        for (l, r) in pairs {
            for op in OPS {
                let expected: $ty = match op {
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::Div => l.wrapping_div(r),
                    BinaryOp::Rem => l.wrapping_rem(r),
                    BinaryOp::And => l & r,
                    BinaryOp::Or => l | r,
                    BinaryOp::Xor => l ^ r,
                    BinaryOp::Shl => l.wrapping_shl(r as u32),
                    BinaryOp::Shr => l.wrapping_shr(r as u32),
                    BinaryOp::Min => l.min(r),
                    BinaryOp::Max => l.max(r),
                    _ => unreachable!(),
                };
                let folded = fold::binary(op, ArithFlags::NONE, $ctor(l), $ctor(r))
                    .unwrap_or_else(|| panic!("{op:?} must fold for ({l}, {r})"));
                assert_eq!(
                    folded,
                    Folded::Value($ctor(expected)),
                    "{op:?} ({l}, {r})"
                );
            }
        }
    }};
}

macro_rules! unsigned_grid {
    ($uty:ty, $sty:ty, $ctor:path) => {{
        let pairs: [($uty, $uty); 8] = [
            (<$uty>::MAX, 1),
            (<$uty>::MIN, <$uty>::MAX),
            (<$uty>::MIN + 1, <$uty>::MAX),
            (0, <$uty>::MAX),
            (0, <$uty>::MAX - 1),
            (1, 1),
            (6, 2),
            (5, 19),
        ];
        for (l, r) in pairs {
            for op in OPS {
                let expected: $uty = match op {
                    BinaryOp::Add => l.wrapping_add(r),
                    BinaryOp::Sub => l.wrapping_sub(r),
                    BinaryOp::Mul => l.wrapping_mul(r),
                    BinaryOp::Div => l.wrapping_div(r),
                    BinaryOp::Rem => l.wrapping_rem(r),
                    BinaryOp::And => l & r,
                    BinaryOp::Or => l | r,
                    BinaryOp::Xor => l ^ r,
                    BinaryOp::Shl => l.wrapping_shl(r as u32),
                    BinaryOp::Shr => l.wrapping_shr(r as u32),
                    BinaryOp::Min => l.min(r),
                    BinaryOp::Max => l.max(r),
                    _ => unreachable!(),
                };
                let folded = fold::binary(
                    op,
                    ArithFlags::UNSIGNED,
                    $ctor(l as $sty),
                    $ctor(r as $sty),
                )
                .unwrap_or_else(|| panic!("{op:?} must fold for ({l}, {r})"));
                assert_eq!(
                    folded,
                    Folded::Value($ctor(expected as $sty)),
                    "unsigned {op:?} ({l}, {r})"
                );
            }
        }
    }};
}

#[test]
fn signed_i8_grid() {
    signed_grid!(i8, PrimitiveValue::Int8);
}

#[test]
fn signed_i16_grid() {
    signed_grid!(i16, PrimitiveValue::Int16);
}

#[test]
fn signed_i32_grid() {
    signed_grid!(i32, PrimitiveValue::Int32);
}

#[test]
fn signed_i64_grid() {
    signed_grid!(i64, PrimitiveValue::Int64);
}

#[test]
fn unsigned_u8_grid() {
    unsigned_grid!(u8, i8, PrimitiveValue::Int8);
}

#[test]
fn unsigned_u16_grid() {
    unsigned_grid!(u16, i16, PrimitiveValue::Int16);
}

#[test]
fn unsigned_u32_grid() {
    unsigned_grid!(u32, i32, PrimitiveValue::Int32);
}

#[test]
fn unsigned_u64_grid() {
    unsigned_grid!(u64, i64, PrimitiveValue::Int64);
}

#[test]
fn min_value_divided_by_minus_one_saturates_on_every_width() {
    for (l, r, expected) in [
        (
            PrimitiveValue::Int8(i8::MIN),
            PrimitiveValue::Int8(-1),
            PrimitiveValue::Int8(i8::MIN),
        ),
        (
            PrimitiveValue::Int16(i16::MIN),
            PrimitiveValue::Int16(-1),
            PrimitiveValue::Int16(i16::MIN),
        ),
        (
            PrimitiveValue::Int32(i32::MIN),
            PrimitiveValue::Int32(-1),
            PrimitiveValue::Int32(i32::MIN),
        ),
        (
            PrimitiveValue::Int64(i64::MIN),
            PrimitiveValue::Int64(-1),
            PrimitiveValue::Int64(i64::MIN),
        ),
    ] {
        let folded = fold::binary(BinaryOp::Div, ArithFlags::NONE, l, r).unwrap();
        assert_eq!(folded, Folded::Value(expected));
    }
}

#[test]
fn division_by_zero_folds_to_poison() {
    for flags in [ArithFlags::NONE, ArithFlags::UNSIGNED] {
        for op in [BinaryOp::Div, BinaryOp::Rem] {
            let folded = fold::binary(
                op,
                flags,
                PrimitiveValue::Int32(42),
                PrimitiveValue::Int32(0),
            )
            .unwrap();
            assert_eq!(folded, Folded::Poison, "{op:?} {flags:?}");
        }
    }
}

#[test]
fn nan_survives_bit_preserving_abs_and_neg() {
    use kjit_ir::{PrimitiveKind, UnaryOp};

    let nan = f32::from_bits(0x7fc1_2345);
    // abs/neg touch only the sign bit; the payload survives a cast
    // round trip.
    let Folded::Value(abs) =
        fold::unary(UnaryOp::Abs, ArithFlags::NONE, PrimitiveValue::Float32(nan)).unwrap()
    else {
        panic!("abs folds to a value");
    };
    let bits = fold::bit_cast(abs, PrimitiveKind::Int32).unwrap();
    assert_eq!(bits, PrimitiveValue::Int32(0x7fc1_2345));

    let Folded::Value(neg) =
        fold::unary(UnaryOp::Neg, ArithFlags::NONE, PrimitiveValue::Float32(nan)).unwrap()
    else {
        panic!("neg folds to a value");
    };
    let bits = fold::bit_cast(neg, PrimitiveKind::Int32).unwrap();
    assert_eq!(bits, PrimitiveValue::Int32(0x7fc1_2345u32 as i32 | i32::MIN));
}
