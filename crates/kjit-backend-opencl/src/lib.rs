//! OpenCL C backend for kjit.
//!
//! Compiles a fully-simplified kernel method into OpenCL C 1.2 source
//! text. The entry function is always named `ILGPUKernel`; views arrive
//! as pointer + length parameter pairs and control flow renders as
//! labels + `goto`.

mod emit;
mod vars;

pub use vars::{scalar_name, space_qualifier, unsigned_scalar_name, TypeGenerator};

use kjit_backend_core::{Backend, BackendError, BackendOptions, BackendOutput};
use kjit_ir::{Handle, IrContext, Method, TargetAbi};

/// The OpenCL C code generator.
#[derive(Debug)]
pub struct OpenClBackend;

impl Backend for OpenClBackend {
    fn name(&self) -> &str {
        "OpenCL"
    }

    fn targets(&self) -> &[&str] {
        &["opencl", "cl"]
    }

    fn abi(&self) -> TargetAbi {
        TargetAbi::lp64()
    }

    fn compile(
        &self,
        ctx: &IrContext,
        kernel: Handle<Method>,
        opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        let (symbol, source, diagnostics) = emit::emit_module(ctx, kernel, opts)?;
        Ok(BackendOutput {
            symbol,
            source,
            diagnostics,
        })
    }
}
