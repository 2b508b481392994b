//! Linear register allocation for PTX.
//!
//! Every non-structure value binds a fresh register of its kind on first
//! definition; structures and views bind a recursive tuple of registers.
//! Registers are recycled when a value's whole live range sits inside
//! one block and its last use has been emitted. Values that cross block
//! boundaries keep their registers for the function's lifetime.

use std::collections::HashMap;
use std::fmt;

use kjit_backend_core::BackendError;
use kjit_ir::{Handle, PrimitiveKind, Type, TypeInner, UniqueArena, Value};

/// The kind of a PTX register.
///
/// The first five are allocatable; the rest are read-only special
/// registers that emission references by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegisterKind {
    /// `.pred` registers (`%p`).
    Pred,
    /// 32-bit integer/bit registers (`%r`).
    Int32,
    /// 64-bit integer/bit registers (`%rd`).
    Int64,
    /// 32-bit float registers (`%f`).
    Float32,
    /// 64-bit float registers (`%fd`).
    Float64,
    /// `%laneid`.
    LaneId,
    /// `%ctaid.*`.
    CtaId,
    /// `%nctaid.*`.
    NctaId,
    /// `%tid.*`.
    Tid,
    /// `%ntid.*`.
    NtId,
}

impl RegisterKind {
    const ALLOCATABLE: usize = 5;

    fn slot(self) -> Option<usize> {
        match self {
            Self::Pred => Some(0),
            Self::Int32 => Some(1),
            Self::Int64 => Some(2),
            Self::Float32 => Some(3),
            Self::Float64 => Some(4),
            _ => None,
        }
    }

    /// Register name prefix (allocatable kinds only).
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Pred => "%p",
            Self::Int32 => "%r",
            Self::Int64 => "%rd",
            Self::Float32 => "%f",
            Self::Float64 => "%fd",
            _ => unreachable!("special registers have no allocation prefix"),
        }
    }

    /// `.reg` declaration type (allocatable kinds only).
    pub fn decl(self) -> &'static str {
        match self {
            Self::Pred => ".pred",
            Self::Int32 => ".b32",
            Self::Int64 => ".b64",
            Self::Float32 => ".f32",
            Self::Float64 => ".f64",
            _ => unreachable!("special registers are not declared"),
        }
    }

    /// The register kind backing a primitive value.
    pub fn of_primitive(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Int1 => Self::Pred,
            PrimitiveKind::Int8 | PrimitiveKind::Int16 | PrimitiveKind::Int32 => Self::Int32,
            PrimitiveKind::Int64 => Self::Int64,
            PrimitiveKind::Float32 => Self::Float32,
            PrimitiveKind::Float64 => Self::Float64,
        }
    }
}

/// One allocated PTX register.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PtxRegister {
    pub kind: RegisterKind,
    pub index: u32,
}

impl fmt::Display for PtxRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.prefix(), self.index)
    }
}

/// A value's register binding: one register, or a tuple for structures
/// and views.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mapping {
    Single(PtxRegister),
    Composite(Vec<Mapping>),
}

impl Mapping {
    /// The single register of a scalar mapping.
    pub fn reg(&self) -> Result<PtxRegister, BackendError> {
        match self {
            Self::Single(r) => Ok(*r),
            Self::Composite(_) => Err(BackendError::InvalidCodeGeneration(
                "expected a scalar register, found a composite".into(),
            )),
        }
    }

    /// Child mapping of a composite.
    pub fn child(&self, index: usize) -> Result<&Mapping, BackendError> {
        match self {
            Self::Composite(children) => children.get(index).ok_or_else(|| {
                BackendError::InvalidCodeGeneration(format!(
                    "composite register tuple has no child {index}"
                ))
            }),
            Self::Single(_) => Err(BackendError::InvalidCodeGeneration(
                "expected a composite register tuple".into(),
            )),
        }
    }

    /// Leaf registers in field order.
    pub fn leaves(&self) -> Vec<PtxRegister> {
        match self {
            Self::Single(r) => vec![*r],
            Self::Composite(children) => children.iter().flat_map(Mapping::leaves).collect(),
        }
    }
}

/// Linear allocator with per-kind free lists.
pub struct RegisterAllocator {
    next: [u32; RegisterKind::ALLOCATABLE],
    free: [Vec<u32>; RegisterKind::ALLOCATABLE],
    map: HashMap<Handle<Value>, Mapping>,
}

impl RegisterAllocator {
    pub fn new() -> Self {
        Self {
            next: [0; RegisterKind::ALLOCATABLE],
            free: Default::default(),
            map: HashMap::new(),
        }
    }

    /// Allocates a register of a kind, reusing freed ones first.
    pub fn alloc(&mut self, kind: RegisterKind) -> PtxRegister {
        let slot = kind.slot().expect("allocating a special register");
        let index = self.free[slot].pop().unwrap_or_else(|| {
            let i = self.next[slot];
            self.next[slot] += 1;
            i
        });
        PtxRegister { kind, index }
    }

    /// Returns a register to its free list.
    pub fn release_reg(&mut self, reg: PtxRegister) {
        let slot = reg.kind.slot().expect("releasing a special register");
        self.free[slot].push(reg.index);
    }

    /// Binds a fresh mapping shaped like `ty` to a value.
    pub fn bind(
        &mut self,
        types: &UniqueArena<Type>,
        value: Handle<Value>,
        ty: Handle<Type>,
    ) -> Result<Mapping, BackendError> {
        let mapping = self.fresh(types, ty)?;
        self.map.insert(value, mapping.clone());
        Ok(mapping)
    }

    /// Binds a value to an existing mapping (aliasing; e.g. a zero-offset
    /// field address aliases its source).
    pub fn bind_alias(&mut self, value: Handle<Value>, mapping: Mapping) {
        self.map.insert(value, mapping);
    }

    /// The mapping of a bound value.
    pub fn get(&self, value: Handle<Value>) -> Result<&Mapping, BackendError> {
        self.map.get(&value).ok_or_else(|| {
            BackendError::InvalidCodeGeneration(format!("value {value:?} has no register binding"))
        })
    }

    /// Returns `true` if the value is bound.
    pub fn is_bound(&self, value: Handle<Value>) -> bool {
        self.map.contains_key(&value)
    }

    /// Releases every register of a value's mapping.
    pub fn release(&mut self, value: Handle<Value>) {
        if let Some(mapping) = self.map.remove(&value) {
            for reg in mapping.leaves() {
                self.release_reg(reg);
            }
        }
    }

    /// High-water register counts per allocatable kind, for `.reg`
    /// declarations.
    pub fn declarations(&self) -> Vec<(RegisterKind, u32)> {
        [
            RegisterKind::Pred,
            RegisterKind::Int32,
            RegisterKind::Int64,
            RegisterKind::Float32,
            RegisterKind::Float64,
        ]
        .into_iter()
        .filter_map(|k| {
            let n = self.next[k.slot().expect("allocatable kind")];
            (n > 0).then_some((k, n))
        })
        .collect()
    }

    fn fresh(
        &mut self,
        types: &UniqueArena<Type>,
        ty: Handle<Type>,
    ) -> Result<Mapping, BackendError> {
        match &types[ty].inner {
            TypeInner::Primitive(kind) => Ok(Mapping::Single(
                self.alloc(RegisterKind::of_primitive(*kind)),
            )),
            TypeInner::Pointer { .. } | TypeInner::String => {
                Ok(Mapping::Single(self.alloc(RegisterKind::Int64)))
            }
            TypeInner::View { .. } => Ok(Mapping::Composite(vec![
                Mapping::Single(self.alloc(RegisterKind::Int64)),
                Mapping::Single(self.alloc(RegisterKind::Int32)),
            ])),
            TypeInner::Struct { fields } => {
                let fields = fields.clone();
                let children = fields
                    .iter()
                    .map(|&f| self.fresh(types, f))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Mapping::Composite(children))
            }
            TypeInner::Void | TypeInner::Array { .. } => Err(BackendError::NotSupported(
                "values of this type have no register representation".into(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_ir::IrContext;

    #[test]
    fn fresh_registers_count_up_per_kind() {
        let mut alloc = RegisterAllocator::new();
        let r0 = alloc.alloc(RegisterKind::Int32);
        let r1 = alloc.alloc(RegisterKind::Int32);
        let f0 = alloc.alloc(RegisterKind::Float32);
        assert_eq!(format!("{r0}"), "%r0");
        assert_eq!(format!("{r1}"), "%r1");
        assert_eq!(format!("{f0}"), "%f0");
    }

    #[test]
    fn released_registers_are_reused() {
        let mut alloc = RegisterAllocator::new();
        let r0 = alloc.alloc(RegisterKind::Int64);
        alloc.release_reg(r0);
        let r1 = alloc.alloc(RegisterKind::Int64);
        assert_eq!(r0, r1);
        assert_eq!(alloc.declarations(), vec![(RegisterKind::Int64, 1)]);
    }

    #[test]
    fn view_maps_to_pointer_plus_length() {
        let mut ctx = IrContext::new();
        let f32t = ctx.primitive(PrimitiveKind::Float32);
        let view = ctx.view_of(f32t, kjit_ir::AddressSpace::Global);
        let mut alloc = RegisterAllocator::new();
        let mapping = alloc.fresh(&ctx.types, view).unwrap();
        let leaves = mapping.leaves();
        assert_eq!(leaves.len(), 2);
        assert_eq!(leaves[0].kind, RegisterKind::Int64);
        assert_eq!(leaves[1].kind, RegisterKind::Int32);
    }

    #[test]
    fn struct_maps_recursively() {
        let mut ctx = IrContext::new();
        let i32t = ctx.primitive(PrimitiveKind::Int32);
        let f64t = ctx.primitive(PrimitiveKind::Float64);
        let inner = ctx.structure(vec![i32t, f64t]);
        let outer = ctx.structure(vec![inner, i32t]);
        let mut alloc = RegisterAllocator::new();
        let mapping = alloc.fresh(&ctx.types, outer).unwrap();
        let leaves = mapping.leaves();
        assert_eq!(leaves.len(), 3);
        assert_eq!(leaves[1].kind, RegisterKind::Float64);
    }

    #[test]
    fn int1_binds_a_predicate() {
        assert_eq!(
            RegisterKind::of_primitive(PrimitiveKind::Int1),
            RegisterKind::Pred
        );
        assert_eq!(
            RegisterKind::of_primitive(PrimitiveKind::Int16),
            RegisterKind::Int32
        );
    }
}
