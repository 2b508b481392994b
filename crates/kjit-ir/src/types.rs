//! Type system for the kjit IR.
//!
//! Types form an interned DAG: equal shapes intern to the same handle
//! within a context, so handle equality is type identity. Signedness is
//! not a property of integer types; operations carry an `UNSIGNED` flag.

use crate::arena::Handle;

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// A primitive scalar kind.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum PrimitiveKind {
    /// 1-bit integer (predicate / boolean).
    Int1,
    /// 8-bit integer.
    Int8,
    /// 16-bit integer.
    Int16,
    /// 32-bit integer.
    Int32,
    /// 64-bit integer.
    Int64,
    /// 32-bit IEEE-754 float.
    Float32,
    /// 64-bit IEEE-754 float.
    Float64,
}

impl PrimitiveKind {
    /// Storage size in bytes (Int1 occupies one byte).
    pub fn size(self) -> Bytes {
        match self {
            Self::Int1 | Self::Int8 => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float32 => 4,
            Self::Int64 | Self::Float64 => 8,
        }
    }

    /// Width in bits (Int1 is a single bit).
    pub fn bits(self) -> u32 {
        match self {
            Self::Int1 => 1,
            Self::Int8 => 8,
            Self::Int16 => 16,
            Self::Int32 => 32,
            Self::Int64 => 64,
            Self::Float32 => 32,
            Self::Float64 => 64,
        }
    }

    /// Returns `true` for the integer kinds, including Int1.
    pub fn is_int(self) -> bool {
        !self.is_float()
    }

    /// Returns `true` for Float32/Float64.
    pub fn is_float(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

/// Memory region class for pointers, views and allocas.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum AddressSpace {
    /// Unqualified; resolvable to any concrete space.
    Generic,
    /// Device-global memory.
    Global,
    /// Group-shared memory.
    Shared,
    /// Thread-local memory.
    Local,
    /// Read-only constant memory.
    Constant,
}

/// A type shape. Interned in a [`UniqueArena`](crate::arena::UniqueArena)
/// owned by the IR context.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum TypeInner {
    /// The absent value type of side-effect-only operations.
    Void,
    /// A primitive scalar.
    Primitive(PrimitiveKind),
    /// A pointer to an element in a given address space.
    Pointer {
        elem: Handle<Type>,
        space: AddressSpace,
    },
    /// A pointer + 32-bit length pair describing a contiguous region.
    View {
        elem: Handle<Type>,
        space: AddressSpace,
    },
    /// A fixed-size array.
    Array { elem: Handle<Type>, size: u32 },
    /// A composite with ordered field types.
    Struct { fields: Vec<Handle<Type>> },
    /// The type of string-literal values.
    String,
}

/// An interned type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Type {
    /// Optional debug name (struct types lifted from the host may carry one).
    pub name: Option<String>,
    /// The concrete shape.
    pub inner: TypeInner,
}

impl Type {
    /// An unnamed type with the given shape.
    pub fn unnamed(inner: TypeInner) -> Self {
        Self { name: None, inner }
    }

    /// Returns the primitive kind if this is a primitive type.
    pub fn as_primitive(&self) -> Option<PrimitiveKind> {
        match self.inner {
            TypeInner::Primitive(kind) => Some(kind),
            _ => None,
        }
    }

    /// Returns `true` for the void type.
    pub fn is_void(&self) -> bool {
        matches!(self.inner, TypeInner::Void)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::UniqueArena;

    #[test]
    fn primitive_sizes() {
        assert_eq!(PrimitiveKind::Int1.size(), 1);
        assert_eq!(PrimitiveKind::Int8.size(), 1);
        assert_eq!(PrimitiveKind::Int16.size(), 2);
        assert_eq!(PrimitiveKind::Int32.size(), 4);
        assert_eq!(PrimitiveKind::Int64.size(), 8);
        assert_eq!(PrimitiveKind::Float32.size(), 4);
        assert_eq!(PrimitiveKind::Float64.size(), 8);
    }

    #[test]
    fn primitive_classes() {
        assert!(PrimitiveKind::Int1.is_int());
        assert!(PrimitiveKind::Int64.is_int());
        assert!(PrimitiveKind::Float32.is_float());
        assert!(!PrimitiveKind::Float64.is_int());
    }

    #[test]
    fn type_dedup() {
        let mut types = UniqueArena::new();
        let t0 = types.insert(Type::unnamed(TypeInner::Primitive(PrimitiveKind::Int32)));
        let t1 = types.insert(Type::unnamed(TypeInner::Primitive(PrimitiveKind::Int32)));
        assert_eq!(t0, t1);
        assert_eq!(types.len(), 1);
    }

    #[test]
    fn pointer_types_distinguish_address_space() {
        let mut types = UniqueArena::new();
        let i8t = types.insert(Type::unnamed(TypeInner::Primitive(PrimitiveKind::Int8)));
        let global = types.insert(Type::unnamed(TypeInner::Pointer {
            elem: i8t,
            space: AddressSpace::Global,
        }));
        let shared = types.insert(Type::unnamed(TypeInner::Pointer {
            elem: i8t,
            space: AddressSpace::Shared,
        }));
        assert_ne!(global, shared);
    }

    #[test]
    fn struct_field_order_matters() {
        let mut types = UniqueArena::new();
        let i32t = types.insert(Type::unnamed(TypeInner::Primitive(PrimitiveKind::Int32)));
        let i64t = types.insert(Type::unnamed(TypeInner::Primitive(PrimitiveKind::Int64)));
        let a = types.insert(Type::unnamed(TypeInner::Struct {
            fields: vec![i32t, i64t],
        }));
        let b = types.insert(Type::unnamed(TypeInner::Struct {
            fields: vec![i64t, i32t],
        }));
        assert_ne!(a, b);
    }
}
