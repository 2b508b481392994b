//! kjit intermediate representation.
//!
//! An arena-based SSA IR for GPU kernel compilation: typed values with
//! symmetric operand/use edges, basic blocks with single terminators,
//! φ-nodes, and a builder that owns all mutation and folds constants on
//! the way in.

pub mod arena;
mod abi;
mod block;
mod builder;
mod context;
mod display;
mod error;
pub mod fold;
mod method;
mod types;
mod value;

pub use abi::{TargetAbi, TypeLayout};
pub use arena::{Arena, Handle, UniqueArena};
pub use block::{BasicBlock, Terminator};
pub use builder::Builder;
pub use context::IrContext;
pub use display::{address_space_name, dump_method, primitive_name, type_string};
pub use error::IrError;
pub use method::{Method, MethodDecl, MethodFlags, MethodHandle, TransformFlags};
pub use types::{AddressSpace, Bytes, PrimitiveKind, Type, TypeInner};
pub use value::{
    ArithFlags, AtomicOp, BarrierKind, BinaryOp, CompareFlags, CompareOp, ConvertFlags, Dim3,
    IntrinsicKind, PrimitiveValue, ShuffleMode, TernaryOp, UnaryOp, Value, ValueKind,
};
