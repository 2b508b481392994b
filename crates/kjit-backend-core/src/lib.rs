#![warn(missing_docs)]
//! Backend trait and plugin architecture for kjit.
//!
//! Defines the [`Backend`] trait that all code generators implement,
//! along with supporting types ([`BackendOptions`], [`BackendOutput`],
//! [`BackendError`], [`KernelSpecialization`]) and a [`BackendRegistry`]
//! for target dispatch.

use std::fmt::{self, Debug};

use kjit_ir::{Handle, IrContext, Method, TargetAbi};

/// Compile-time-known launch parameters that affect code generation.
///
/// Two specializations compare equal iff all fields match; together with
/// a method handle they key the kernel cache.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq)]
pub struct KernelSpecialization {
    /// Upper bound on the group size, if pinned.
    pub max_group_size: Option<u32>,
    /// Lower bound on the group size, if pinned.
    pub min_group_size: Option<u32>,
    /// Optional-feature bitmap.
    pub flags: SpecializationFlags,
}

impl KernelSpecialization {
    /// Returns `true` when fast-math code generation is requested.
    pub fn fast_math(&self) -> bool {
        self.flags.contains(SpecializationFlags::FAST_MATH)
    }

    /// The exact group size, when the bounds pin one.
    pub fn pinned_group_size(&self) -> Option<u32> {
        match (self.min_group_size, self.max_group_size) {
            (Some(min), Some(max)) if min == max => Some(min),
            _ => None,
        }
    }

    /// Serializes the record for cross-process cache keys.
    pub fn to_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.max_group_size.unwrap_or(u32::MAX).to_le_bytes());
        out[4..8].copy_from_slice(&self.min_group_size.unwrap_or(u32::MAX).to_le_bytes());
        out[8..12].copy_from_slice(&self.flags.0.to_le_bytes());
        out
    }
}

/// Optional-feature bits of a [`KernelSpecialization`].
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct SpecializationFlags(u32);

impl SpecializationFlags {
    /// No optional features.
    pub const NONE: Self = Self(0);
    /// Fast-math code generation.
    pub const FAST_MATH: Self = Self(1);
    /// Shared-memory size override is in effect.
    pub const SHARED_MEM_OVERRIDE: Self = Self(2);

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for SpecializationFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A backend that compiles an IR kernel to target-specific text.
pub trait Backend: Debug + Send + Sync {
    /// Human-readable name (e.g. "PTX").
    fn name(&self) -> &str;

    /// Target identifiers this backend handles (for `--target` dispatch).
    fn targets(&self) -> &[&str];

    /// The ABI descriptor layouts are computed against.
    fn abi(&self) -> TargetAbi {
        TargetAbi::lp64()
    }

    /// Compile a fully-simplified kernel method to target text.
    fn compile(
        &self,
        ctx: &IrContext,
        kernel: Handle<Method>,
        opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError>;
}

/// Options passed to a backend during compilation.
#[derive(Clone, Debug, Default)]
pub struct BackendOptions {
    /// The kernel specialization in effect.
    pub specialization: KernelSpecialization,
}

/// The output produced by a backend: the entry symbol and the target text.
#[derive(Clone, Debug)]
pub struct BackendOutput {
    /// Entry-point symbol name in `source`.
    pub symbol: String,
    /// Target source/assembly text, ready for the driver.
    pub source: String,
    /// Non-fatal diagnostics.
    pub diagnostics: Vec<Diagnostic>,
}

impl fmt::Display for BackendOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} bytes, {} diagnostic(s))",
            self.symbol,
            self.source.len(),
            self.diagnostics.len()
        )
    }
}

/// A non-fatal diagnostic message from a backend.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Severity level for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// A warning that does not prevent compilation.
    Warning,
    /// An informational note.
    Info,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "Warning",
            Self::Info => "Info",
        })
    }
}

/// Errors that can occur during backend compilation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The kernel uses a construct with no lowering on this target.
    /// Fatal for the compilation unit; the source must change.
    #[error("not supported: {0}")]
    NotSupported(String),
    /// An internal consistency violation reached the backend.
    /// Fatal; an implementation bug upstream.
    #[error("invalid code generation: {0}")]
    InvalidCodeGeneration(String),
}

/// Registry of available backends, used for `--target` dispatch.
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Creates a registry pre-populated with built-in backends.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(IrDumpBackend));
        reg
    }

    /// Registers a backend.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    /// Finds a backend that handles the given target identifier.
    pub fn find(&self, target: &str) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.targets().contains(&target))
            .map(|b| &**b)
    }

    /// Lists all supported target identifiers.
    pub fn list_targets(&self) -> Vec<&str> {
        self.backends
            .iter()
            .flat_map(|b| b.targets().iter().copied())
            .collect()
    }
}

/// Built-in backend that dumps the IR as text via [`kjit_ir::dump_method`].
#[derive(Debug)]
pub struct IrDumpBackend;

impl Backend for IrDumpBackend {
    fn name(&self) -> &str {
        "IR Dump"
    }

    fn targets(&self) -> &[&str] {
        &["ir-dump", "ir"]
    }

    fn compile(
        &self,
        ctx: &IrContext,
        kernel: Handle<Method>,
        _opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        let symbol = ctx.method(kernel).decl.handle.name.clone();
        Ok(BackendOutput {
            symbol,
            source: kjit_ir::dump_method(ctx, kernel),
            diagnostics: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_ir::{MethodDecl, MethodFlags, MethodHandle};

    fn empty_kernel(ctx: &mut IrContext) -> Handle<Method> {
        let void = ctx.void_type();
        let decl = MethodDecl {
            handle: MethodHandle::new(1, "Kernel"),
            return_type: void,
            source: None,
            flags: MethodFlags::NONE,
        };
        let m = ctx.create_method(decl, &[]).unwrap();
        let mut b = ctx.builder(m).unwrap();
        b.ret(None).unwrap();
        drop(b);
        m
    }

    #[test]
    fn ir_dump_backend_compiles() {
        let mut ctx = IrContext::new();
        let m = empty_kernel(&mut ctx);
        let out = IrDumpBackend
            .compile(&ctx, m, &BackendOptions::default())
            .unwrap();
        assert_eq!(out.symbol, "Kernel");
        assert!(out.source.contains("BB0:"));
        assert!(out.source.contains("ret"));
    }

    #[test]
    fn registry_finds_builtin_targets() {
        let reg = BackendRegistry::with_builtins();
        assert!(reg.find("ir-dump").is_some());
        assert!(reg.find("ir").is_some());
        assert!(reg.find("nonexistent").is_none());
        let targets = reg.list_targets();
        assert!(targets.contains(&"ir-dump"));
    }

    #[test]
    fn specialization_equality_covers_all_fields() {
        let a = KernelSpecialization {
            max_group_size: Some(256),
            min_group_size: None,
            flags: SpecializationFlags::FAST_MATH,
        };
        let mut b = a.clone();
        assert_eq!(a, b);
        b.flags = SpecializationFlags::NONE;
        assert_ne!(a, b);
        let mut c = a.clone();
        c.min_group_size = Some(32);
        assert_ne!(a, c);
    }

    #[test]
    fn specialization_serializes_to_bytes() {
        let s = KernelSpecialization {
            max_group_size: Some(128),
            min_group_size: None,
            flags: SpecializationFlags::FAST_MATH,
        };
        let bytes = s.to_bytes();
        assert_eq!(&bytes[0..4], &128u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &u32::MAX.to_le_bytes());
        assert_eq!(&bytes[8..12], &1u32.to_le_bytes());
    }

    #[test]
    fn pinned_group_size_requires_matching_bounds() {
        let mut s = KernelSpecialization::default();
        assert_eq!(s.pinned_group_size(), None);
        s.min_group_size = Some(64);
        s.max_group_size = Some(64);
        assert_eq!(s.pinned_group_size(), Some(64));
        s.max_group_size = Some(128);
        assert_eq!(s.pinned_group_size(), None);
    }

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic {
            level: DiagnosticLevel::Warning,
            message: "sub-warp width clamped".into(),
        };
        assert_eq!(format!("{d}"), "[Warning] sub-warp width clamped");
    }
}
