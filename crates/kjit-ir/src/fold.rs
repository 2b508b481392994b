//! Constant-fold tables.
//!
//! The builder consults these whenever an operation is created with
//! all-constant operands; the transformation pipeline reuses them when
//! operands become constant later. Semantics match device arithmetic:
//! integers wrap (two's complement), `MinValue / -1` saturates to
//! `MinValue`, shift amounts are masked by `bits - 1`, and integer
//! division by zero yields [`Folded::Poison`]. Floats follow IEEE-754;
//! `min`/`max` ignore a single NaN operand.

use crate::types::PrimitiveKind;
use crate::value::{
    ArithFlags, BinaryOp, CompareFlags, CompareOp, ConvertFlags, PrimitiveValue, TernaryOp, UnaryOp,
};

/// The result of a successful fold.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Folded {
    /// A concrete literal.
    Value(PrimitiveValue),
    /// The operation has no defined result (integer `/ 0`, `% 0`).
    Poison,
}

macro_rules! int_binary {
    ($op:expr, $unsigned:expr, $l:expr, $r:expr, $signed:ty, $uty:ty, $ctor:path) => {{
        let (l, r) = ($l, $r);
        let folded = if $unsigned {
            let (l, r) = (l as $uty, r as $uty);
            match $op {
                BinaryOp::Add => l.wrapping_add(r) as $signed,
                BinaryOp::Sub => l.wrapping_sub(r) as $signed,
                BinaryOp::Mul => l.wrapping_mul(r) as $signed,
                BinaryOp::Div => {
                    if r == 0 {
                        return Some(Folded::Poison);
                    }
                    (l / r) as $signed
                }
                BinaryOp::Rem => {
                    if r == 0 {
                        return Some(Folded::Poison);
                    }
                    (l % r) as $signed
                }
                BinaryOp::And => (l & r) as $signed,
                BinaryOp::Or => (l | r) as $signed,
                BinaryOp::Xor => (l ^ r) as $signed,
                BinaryOp::Shl => l.wrapping_shl(r as u32) as $signed,
                BinaryOp::Shr => l.wrapping_shr(r as u32) as $signed,
                BinaryOp::Min => l.min(r) as $signed,
                BinaryOp::Max => l.max(r) as $signed,
                BinaryOp::Pow | BinaryOp::Atan2 => return None,
            }
        } else {
            match $op {
                BinaryOp::Add => l.wrapping_add(r),
                BinaryOp::Sub => l.wrapping_sub(r),
                BinaryOp::Mul => l.wrapping_mul(r),
                // wrapping_div maps MinValue / -1 to MinValue.
                BinaryOp::Div => {
                    if r == 0 {
                        return Some(Folded::Poison);
                    }
                    l.wrapping_div(r)
                }
                BinaryOp::Rem => {
                    if r == 0 {
                        return Some(Folded::Poison);
                    }
                    l.wrapping_rem(r)
                }
                BinaryOp::And => l & r,
                BinaryOp::Or => l | r,
                BinaryOp::Xor => l ^ r,
                BinaryOp::Shl => l.wrapping_shl(r as u32),
                BinaryOp::Shr => l.wrapping_shr(r as u32),
                BinaryOp::Min => l.min(r),
                BinaryOp::Max => l.max(r),
                BinaryOp::Pow | BinaryOp::Atan2 => return None,
            }
        };
        Some(Folded::Value($ctor(folded)))
    }};
}

macro_rules! float_binary {
    ($op:expr, $l:expr, $r:expr, $ctor:path) => {{
        let (l, r) = ($l, $r);
        let folded = match $op {
            BinaryOp::Add => l + r,
            BinaryOp::Sub => l - r,
            BinaryOp::Mul => l * r,
            BinaryOp::Div => l / r,
            BinaryOp::Rem => l % r,
            // One NaN operand is ignored; NaN only if both are NaN.
            BinaryOp::Min => {
                if l.is_nan() {
                    r
                } else if r.is_nan() {
                    l
                } else {
                    l.min(r)
                }
            }
            BinaryOp::Max => {
                if l.is_nan() {
                    r
                } else if r.is_nan() {
                    l
                } else {
                    l.max(r)
                }
            }
            BinaryOp::Pow => l.powf(r),
            BinaryOp::Atan2 => l.atan2(r),
            BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Shl | BinaryOp::Shr => {
                return None;
            }
        };
        Some(Folded::Value($ctor(folded)))
    }};
}

/// Folds a binary operation over two literals of the same kind.
pub fn binary(
    op: BinaryOp,
    flags: ArithFlags,
    lhs: PrimitiveValue,
    rhs: PrimitiveValue,
) -> Option<Folded> {
    let unsigned = flags.contains(ArithFlags::UNSIGNED);
    match (lhs, rhs) {
        (PrimitiveValue::Int1(l), PrimitiveValue::Int1(r)) => {
            let folded = match op {
                BinaryOp::And => l & r,
                BinaryOp::Or => l | r,
                BinaryOp::Xor => l ^ r,
                _ => return None,
            };
            Some(Folded::Value(PrimitiveValue::Int1(folded)))
        }
        (PrimitiveValue::Int8(l), PrimitiveValue::Int8(r)) => {
            int_binary!(op, unsigned, l, r, i8, u8, PrimitiveValue::Int8)
        }
        (PrimitiveValue::Int16(l), PrimitiveValue::Int16(r)) => {
            int_binary!(op, unsigned, l, r, i16, u16, PrimitiveValue::Int16)
        }
        (PrimitiveValue::Int32(l), PrimitiveValue::Int32(r)) => {
            int_binary!(op, unsigned, l, r, i32, u32, PrimitiveValue::Int32)
        }
        (PrimitiveValue::Int64(l), PrimitiveValue::Int64(r)) => {
            int_binary!(op, unsigned, l, r, i64, u64, PrimitiveValue::Int64)
        }
        (PrimitiveValue::Float32(l), PrimitiveValue::Float32(r)) => {
            float_binary!(op, l, r, PrimitiveValue::Float32)
        }
        (PrimitiveValue::Float64(l), PrimitiveValue::Float64(r)) => {
            float_binary!(op, l, r, PrimitiveValue::Float64)
        }
        _ => None,
    }
}

macro_rules! float_unary {
    ($op:expr, $x:expr, $ctor:path) => {{
        let x = $x;
        let folded = match $op {
            UnaryOp::Neg => -x,
            UnaryOp::Abs => x.abs(),
            UnaryOp::Ceiling => x.ceil(),
            UnaryOp::Floor => x.floor(),
            UnaryOp::Sin => x.sin(),
            UnaryOp::Cos => x.cos(),
            UnaryOp::Tanh => x.tanh(),
            UnaryOp::Exp => x.exp(),
            UnaryOp::Exp2 => x.exp2(),
            UnaryOp::Log => x.ln(),
            UnaryOp::Log2 => x.log2(),
            UnaryOp::Sqrt => x.sqrt(),
            UnaryOp::Rsqrt => x.sqrt().recip(),
            UnaryOp::Not => return None,
        };
        Some(Folded::Value($ctor(folded)))
    }};
}

/// Folds a unary operation over a literal.
pub fn unary(op: UnaryOp, _flags: ArithFlags, x: PrimitiveValue) -> Option<Folded> {
    match x {
        PrimitiveValue::Int1(v) => match op {
            UnaryOp::Not => Some(Folded::Value(PrimitiveValue::Int1(!v))),
            _ => None,
        },
        PrimitiveValue::Int8(v) => match op {
            UnaryOp::Neg => Some(Folded::Value(PrimitiveValue::Int8(v.wrapping_neg()))),
            UnaryOp::Not => Some(Folded::Value(PrimitiveValue::Int8(!v))),
            UnaryOp::Abs => Some(Folded::Value(PrimitiveValue::Int8(v.wrapping_abs()))),
            _ => None,
        },
        PrimitiveValue::Int16(v) => match op {
            UnaryOp::Neg => Some(Folded::Value(PrimitiveValue::Int16(v.wrapping_neg()))),
            UnaryOp::Not => Some(Folded::Value(PrimitiveValue::Int16(!v))),
            UnaryOp::Abs => Some(Folded::Value(PrimitiveValue::Int16(v.wrapping_abs()))),
            _ => None,
        },
        PrimitiveValue::Int32(v) => match op {
            UnaryOp::Neg => Some(Folded::Value(PrimitiveValue::Int32(v.wrapping_neg()))),
            UnaryOp::Not => Some(Folded::Value(PrimitiveValue::Int32(!v))),
            UnaryOp::Abs => Some(Folded::Value(PrimitiveValue::Int32(v.wrapping_abs()))),
            _ => None,
        },
        PrimitiveValue::Int64(v) => match op {
            UnaryOp::Neg => Some(Folded::Value(PrimitiveValue::Int64(v.wrapping_neg()))),
            UnaryOp::Not => Some(Folded::Value(PrimitiveValue::Int64(!v))),
            UnaryOp::Abs => Some(Folded::Value(PrimitiveValue::Int64(v.wrapping_abs()))),
            _ => None,
        },
        PrimitiveValue::Float32(v) => float_unary!(op, v, PrimitiveValue::Float32),
        PrimitiveValue::Float64(v) => float_unary!(op, v, PrimitiveValue::Float64),
    }
}

/// Folds a ternary operation over three literals of the same kind.
pub fn ternary(
    op: TernaryOp,
    flags: ArithFlags,
    a: PrimitiveValue,
    b: PrimitiveValue,
    c: PrimitiveValue,
) -> Option<Folded> {
    match op {
        TernaryOp::MultiplyAdd => match binary(BinaryOp::Mul, flags, a, b)? {
            Folded::Value(product) => binary(BinaryOp::Add, flags, product, c),
            Folded::Poison => Some(Folded::Poison),
        },
    }
}

fn compare_ints(op: CompareOp, unsigned: bool, l: i64, r: i64, bits: u32) -> bool {
    if unsigned {
        let mask = if bits >= 64 { u64::MAX } else { (1 << bits) - 1 };
        let (l, r) = (l as u64 & mask, r as u64 & mask);
        match op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Lt => l < r,
            CompareOp::Le => l <= r,
            CompareOp::Gt => l > r,
            CompareOp::Ge => l >= r,
        }
    } else {
        match op {
            CompareOp::Eq => l == r,
            CompareOp::Ne => l != r,
            CompareOp::Lt => l < r,
            CompareOp::Le => l <= r,
            CompareOp::Gt => l > r,
            CompareOp::Ge => l >= r,
        }
    }
}

fn compare_floats(op: CompareOp, unordered: bool, l: f64, r: f64) -> bool {
    if l.is_nan() || r.is_nan() {
        return unordered;
    }
    match op {
        CompareOp::Eq => l == r,
        CompareOp::Ne => l != r,
        CompareOp::Lt => l < r,
        CompareOp::Le => l <= r,
        CompareOp::Gt => l > r,
        CompareOp::Ge => l >= r,
    }
}

/// Folds a comparison over two literals of the same kind, producing Int1.
pub fn compare(
    op: CompareOp,
    flags: CompareFlags,
    lhs: PrimitiveValue,
    rhs: PrimitiveValue,
) -> Option<PrimitiveValue> {
    if lhs.kind() != rhs.kind() {
        return None;
    }
    let result = match (lhs, rhs) {
        (PrimitiveValue::Float32(l), PrimitiveValue::Float32(r)) => compare_floats(
            op,
            flags.contains(CompareFlags::UNORDERED),
            f64::from(l),
            f64::from(r),
        ),
        (PrimitiveValue::Float64(l), PrimitiveValue::Float64(r)) => {
            compare_floats(op, flags.contains(CompareFlags::UNORDERED), l, r)
        }
        _ => compare_ints(
            op,
            flags.contains(CompareFlags::UNSIGNED),
            lhs.as_i64(),
            rhs.as_i64(),
            lhs.kind().bits(),
        ),
    };
    Some(PrimitiveValue::Int1(result))
}

/// Converts a literal to a target kind.
///
/// Narrowing truncates, widening sign- or zero-extends per the
/// source-unsigned flag, and float→int saturates (`as` semantics).
pub fn convert(x: PrimitiveValue, to: PrimitiveKind, flags: ConvertFlags) -> PrimitiveValue {
    let source_unsigned = flags.contains(ConvertFlags::SOURCE_UNSIGNED);
    // Normalize the source to i64/f64, then narrow.
    enum Wide {
        Int(i64),
        Float(f64),
    }
    let wide = match x {
        PrimitiveValue::Int1(v) => Wide::Int(i64::from(v)),
        PrimitiveValue::Int8(v) => Wide::Int(if source_unsigned {
            i64::from(v as u8)
        } else {
            i64::from(v)
        }),
        PrimitiveValue::Int16(v) => Wide::Int(if source_unsigned {
            i64::from(v as u16)
        } else {
            i64::from(v)
        }),
        PrimitiveValue::Int32(v) => Wide::Int(if source_unsigned {
            i64::from(v as u32)
        } else {
            i64::from(v)
        }),
        PrimitiveValue::Int64(v) => Wide::Int(v),
        PrimitiveValue::Float32(v) => Wide::Float(f64::from(v)),
        PrimitiveValue::Float64(v) => Wide::Float(v),
    };
    match (wide, to) {
        (Wide::Int(v), PrimitiveKind::Int1) => PrimitiveValue::Int1(v != 0),
        (Wide::Int(v), PrimitiveKind::Int8) => PrimitiveValue::Int8(v as i8),
        (Wide::Int(v), PrimitiveKind::Int16) => PrimitiveValue::Int16(v as i16),
        (Wide::Int(v), PrimitiveKind::Int32) => PrimitiveValue::Int32(v as i32),
        (Wide::Int(v), PrimitiveKind::Int64) => PrimitiveValue::Int64(v),
        (Wide::Int(v), PrimitiveKind::Float32) => PrimitiveValue::Float32(if source_unsigned {
            (v as u64) as f32
        } else {
            v as f32
        }),
        (Wide::Int(v), PrimitiveKind::Float64) => PrimitiveValue::Float64(if source_unsigned {
            (v as u64) as f64
        } else {
            v as f64
        }),
        (Wide::Float(v), PrimitiveKind::Int1) => PrimitiveValue::Int1(v != 0.0),
        (Wide::Float(v), PrimitiveKind::Int8) => PrimitiveValue::Int8(v as i8),
        (Wide::Float(v), PrimitiveKind::Int16) => PrimitiveValue::Int16(v as i16),
        (Wide::Float(v), PrimitiveKind::Int32) => PrimitiveValue::Int32(v as i32),
        (Wide::Float(v), PrimitiveKind::Int64) => PrimitiveValue::Int64(v as i64),
        (Wide::Float(v), PrimitiveKind::Float32) => PrimitiveValue::Float32(v as f32),
        (Wide::Float(v), PrimitiveKind::Float64) => PrimitiveValue::Float64(v),
    }
}

/// Reinterprets the bits of a literal as another same-width kind.
pub fn bit_cast(x: PrimitiveValue, to: PrimitiveKind) -> Option<PrimitiveValue> {
    if x.kind().size() != to.size() {
        return None;
    }
    let bits = x.bits();
    Some(match to {
        PrimitiveKind::Int1 => PrimitiveValue::Int1(bits & 1 != 0),
        PrimitiveKind::Int8 => PrimitiveValue::Int8(bits as i8),
        PrimitiveKind::Int16 => PrimitiveValue::Int16(bits as i16),
        PrimitiveKind::Int32 => PrimitiveValue::Int32(bits as i32),
        PrimitiveKind::Int64 => PrimitiveValue::Int64(bits as i64),
        PrimitiveKind::Float32 => PrimitiveValue::Float32(f32::from_bits(bits as u32)),
        PrimitiveKind::Float64 => PrimitiveValue::Float64(f64::from_bits(bits)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fold_i32(op: BinaryOp, l: i32, r: i32) -> Folded {
        binary(
            op,
            ArithFlags::NONE,
            PrimitiveValue::Int32(l),
            PrimitiveValue::Int32(r),
        )
        .unwrap()
    }

    #[test]
    fn integer_add_wraps() {
        assert_eq!(
            fold_i32(BinaryOp::Add, i32::MAX, 1),
            Folded::Value(PrimitiveValue::Int32(i32::MIN))
        );
    }

    #[test]
    fn signed_div_min_by_minus_one_saturates() {
        for (value, expected) in [
            (
                fold_i32(BinaryOp::Div, i32::MIN, -1),
                PrimitiveValue::Int32(i32::MIN),
            ),
            (
                binary(
                    BinaryOp::Div,
                    ArithFlags::NONE,
                    PrimitiveValue::Int8(i8::MIN),
                    PrimitiveValue::Int8(-1),
                )
                .unwrap(),
                PrimitiveValue::Int8(i8::MIN),
            ),
            (
                binary(
                    BinaryOp::Div,
                    ArithFlags::NONE,
                    PrimitiveValue::Int16(i16::MIN),
                    PrimitiveValue::Int16(-1),
                )
                .unwrap(),
                PrimitiveValue::Int16(i16::MIN),
            ),
            (
                binary(
                    BinaryOp::Div,
                    ArithFlags::NONE,
                    PrimitiveValue::Int64(i64::MIN),
                    PrimitiveValue::Int64(-1),
                )
                .unwrap(),
                PrimitiveValue::Int64(i64::MIN),
            ),
        ] {
            assert_eq!(value, Folded::Value(expected));
        }
    }

    #[test]
    fn integer_division_by_zero_is_poison() {
        assert_eq!(fold_i32(BinaryOp::Div, 7, 0), Folded::Poison);
        assert_eq!(fold_i32(BinaryOp::Rem, 7, 0), Folded::Poison);
        let unsigned = binary(
            BinaryOp::Div,
            ArithFlags::UNSIGNED,
            PrimitiveValue::Int32(7),
            PrimitiveValue::Int32(0),
        );
        assert_eq!(unsigned, Some(Folded::Poison));
    }

    #[test]
    fn float_division_by_zero_is_ieee() {
        let inf = binary(
            BinaryOp::Div,
            ArithFlags::NONE,
            PrimitiveValue::Float32(1.0),
            PrimitiveValue::Float32(0.0),
        )
        .unwrap();
        assert_eq!(inf, Folded::Value(PrimitiveValue::Float32(f32::INFINITY)));

        let Folded::Value(PrimitiveValue::Float64(nan)) = binary(
            BinaryOp::Div,
            ArithFlags::NONE,
            PrimitiveValue::Float64(0.0),
            PrimitiveValue::Float64(0.0),
        )
        .unwrap() else {
            panic!("expected a float value");
        };
        assert!(nan.is_nan());
    }

    #[test]
    fn unsigned_flag_selects_unsigned_semantics() {
        assert_eq!(
            binary(
                BinaryOp::Div,
                ArithFlags::UNSIGNED,
                PrimitiveValue::Int32(-2),
                PrimitiveValue::Int32(2),
            )
            .unwrap(),
            Folded::Value(PrimitiveValue::Int32(0x7fff_ffff))
        );
        assert_eq!(
            binary(
                BinaryOp::Shr,
                ArithFlags::UNSIGNED,
                PrimitiveValue::Int8(-128),
                PrimitiveValue::Int8(1),
            )
            .unwrap(),
            Folded::Value(PrimitiveValue::Int8(0x40))
        );
    }

    #[test]
    fn shift_amount_is_masked() {
        assert_eq!(
            fold_i32(BinaryOp::Shl, 1, 33),
            Folded::Value(PrimitiveValue::Int32(2))
        );
    }

    #[test]
    fn float_min_max_ignore_nan() {
        let min = binary(
            BinaryOp::Min,
            ArithFlags::NONE,
            PrimitiveValue::Float32(f32::NAN),
            PrimitiveValue::Float32(3.0),
        )
        .unwrap();
        assert_eq!(min, Folded::Value(PrimitiveValue::Float32(3.0)));

        let max = binary(
            BinaryOp::Max,
            ArithFlags::NONE,
            PrimitiveValue::Float64(-1.0),
            PrimitiveValue::Float64(f64::NAN),
        )
        .unwrap();
        assert_eq!(max, Folded::Value(PrimitiveValue::Float64(-1.0)));
    }

    #[test]
    fn compare_ordered_vs_unordered() {
        let nan = PrimitiveValue::Float32(f32::NAN);
        let one = PrimitiveValue::Float32(1.0);
        assert_eq!(
            compare(CompareOp::Lt, CompareFlags::NONE, nan, one),
            Some(PrimitiveValue::Int1(false))
        );
        assert_eq!(
            compare(CompareOp::Lt, CompareFlags::UNORDERED, nan, one),
            Some(PrimitiveValue::Int1(true))
        );
        assert_eq!(
            compare(CompareOp::Ge, CompareFlags::NONE, one, one),
            Some(PrimitiveValue::Int1(true))
        );
    }

    #[test]
    fn compare_unsigned_integers() {
        assert_eq!(
            compare(
                CompareOp::Lt,
                CompareFlags::UNSIGNED,
                PrimitiveValue::Int32(-1),
                PrimitiveValue::Int32(1),
            ),
            Some(PrimitiveValue::Int1(false))
        );
        assert_eq!(
            compare(
                CompareOp::Lt,
                CompareFlags::NONE,
                PrimitiveValue::Int32(-1),
                PrimitiveValue::Int32(1),
            ),
            Some(PrimitiveValue::Int1(true))
        );
    }

    #[test]
    fn convert_narrows_and_extends() {
        assert_eq!(
            convert(
                PrimitiveValue::Int32(0x1_2345),
                PrimitiveKind::Int16,
                ConvertFlags::NONE
            ),
            PrimitiveValue::Int16(0x2345)
        );
        assert_eq!(
            convert(
                PrimitiveValue::Int8(-1),
                PrimitiveKind::Int32,
                ConvertFlags::NONE
            ),
            PrimitiveValue::Int32(-1)
        );
        assert_eq!(
            convert(
                PrimitiveValue::Int8(-1),
                PrimitiveKind::Int32,
                ConvertFlags::SOURCE_UNSIGNED
            ),
            PrimitiveValue::Int32(255)
        );
    }

    #[test]
    fn convert_float_to_int_saturates() {
        assert_eq!(
            convert(
                PrimitiveValue::Float32(1e10),
                PrimitiveKind::Int32,
                ConvertFlags::NONE
            ),
            PrimitiveValue::Int32(i32::MAX)
        );
    }

    #[test]
    fn bitcast_preserves_nan_payload() {
        let nan = f32::from_bits(0x7fc0_1234);
        let as_int = bit_cast(PrimitiveValue::Float32(nan), PrimitiveKind::Int32).unwrap();
        assert_eq!(as_int, PrimitiveValue::Int32(0x7fc0_1234));
        let back = bit_cast(as_int, PrimitiveKind::Float32).unwrap();
        assert_eq!(back.bits(), u64::from(0x7fc0_1234u32));
    }

    #[test]
    fn bitcast_requires_same_width() {
        assert_eq!(
            bit_cast(PrimitiveValue::Float64(1.0), PrimitiveKind::Int32),
            None
        );
    }

    #[test]
    fn unary_neg_wraps() {
        assert_eq!(
            unary(UnaryOp::Neg, ArithFlags::NONE, PrimitiveValue::Int32(i32::MIN)),
            Some(Folded::Value(PrimitiveValue::Int32(i32::MIN)))
        );
    }

    #[test]
    fn multiply_add_folds_through() {
        assert_eq!(
            ternary(
                TernaryOp::MultiplyAdd,
                ArithFlags::NONE,
                PrimitiveValue::Int32(3),
                PrimitiveValue::Int32(4),
                PrimitiveValue::Int32(5),
            ),
            Some(Folded::Value(PrimitiveValue::Int32(17)))
        );
    }
}
