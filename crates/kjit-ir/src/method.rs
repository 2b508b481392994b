//! Methods: declarations, flags and the per-method IR arenas.

use std::fmt;

use crate::arena::{Arena, Handle};
use crate::block::BasicBlock;
use crate::types::Type;
use crate::value::Value;

/// An opaque identifier for a host-language method, stable across
/// compilations. Token and name together key the method registry and the
/// kernel cache.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct MethodHandle {
    /// Host-side metadata token.
    pub token: u32,
    /// Human-readable name, used in symbols and dumps.
    pub name: String,
}

impl MethodHandle {
    /// Creates a handle from a token and a name.
    pub fn new(token: u32, name: impl Into<String>) -> Self {
        Self {
            token,
            name: name.into(),
        }
    }
}

impl fmt::Display for MethodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Declaration-time method flags.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct MethodFlags(u32);

impl MethodFlags {
    pub const NONE: Self = Self(0);
    /// The inliner must never expand this method.
    pub const NO_INLINING: Self = Self(1);
    /// The inliner expands this method regardless of size.
    pub const AGGRESSIVE_INLINING: Self = Self(2);
    /// Declared but not defined in this context.
    pub const EXTERNAL_DECLARATION: Self = Self(4);
    /// Resolved by the runtime environment.
    pub const EXTERNAL: Self = Self(8);

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MethodFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Mutable transformation state.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct TransformFlags(u32);

impl TransformFlags {
    pub const NONE: Self = Self(0);
    /// IR changed since the last pipeline run.
    pub const DIRTY: Self = Self(1);
    /// The pass pipeline ran to completion on the current IR.
    pub const TRANSFORMED: Self = Self(2);

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Adds the given flags.
    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    /// Removes the given flags.
    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

/// A method declaration.
#[derive(Clone, Debug)]
pub struct MethodDecl {
    /// Stable host-side identity.
    pub handle: MethodHandle,
    /// Return type (void for kernels).
    pub return_type: Handle<Type>,
    /// Optional source reference for diagnostics.
    pub source: Option<String>,
    /// Declaration flags.
    pub flags: MethodFlags,
}

/// An IR method: declaration, parameters, and the value/block arenas.
///
/// A method has at most one live builder at a time; all mutation flows
/// through it.
#[derive(Clone, Debug)]
pub struct Method {
    /// The declaration.
    pub decl: MethodDecl,
    /// Parameter values, in declaration order. These live in the value
    /// arena but not in any block's instruction list.
    pub params: Vec<Handle<Value>>,
    /// The entry block.
    pub entry: Handle<BasicBlock>,
    /// All blocks ever created; unreachable ones are ignored by scope.
    pub blocks: Arena<BasicBlock>,
    /// All values ever created; unlinked ones are ignored by block order.
    pub values: Arena<Value>,
    /// Transformation state.
    pub transform: TransformFlags,
    pub(crate) builder_active: bool,
}

impl Method {
    /// Number of values currently linked into blocks (a size measure for
    /// inlining heuristics).
    pub fn linked_value_count(&self) -> usize {
        self.blocks.iter().map(|(_, b)| b.values.len()).sum()
    }

    /// Clears every block's dirty bit (the method-local GC point).
    pub fn clear_dirty_blocks(&mut self) {
        for (_, block) in self.blocks.iter_mut() {
            block.dirty = false;
        }
    }
}
