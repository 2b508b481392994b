//! Bytecode frontend for kjit.
//!
//! Parses textual kernel assembly ([`assemble`]) and lifts bytecode into
//! SSA IR ([`compile`]). Callees are compiled before their callers; the
//! inliner pass performs all splicing afterwards.

mod asm;
pub mod bytecode;
mod lower;

pub use asm::{assemble, AsmError};

use kjit_ir::{Handle, IrContext, IrError, Method};

use bytecode::Program;

/// Errors produced while lifting bytecode.
#[derive(Debug, thiserror::Error)]
pub enum FrontendError {
    /// An opcode has no device lowering.
    #[error("unsupported instruction: {0}")]
    UnsupportedInstruction(String),

    /// The simulated evaluation stack is empty or carries the wrong type.
    #[error("invalid stack state: {detail}")]
    InvalidStackState {
        /// What went wrong.
        detail: String,
    },

    /// The callee uses features disallowed on device (e.g. recursion).
    #[error("unsupported call target: {0}")]
    UnsupportedCallTarget(String),

    /// A call references a token missing from the program.
    #[error("unknown method token {0}")]
    UnknownMethod(u32),

    /// IR construction rejected an operand.
    #[error(transparent)]
    Ir(#[from] IrError),
}

/// Compiles the method with the given token (and, recursively, every
/// method it calls) into the context. Returns the entry method.
///
/// Already-registered methods are reused, so shared callees lift once.
pub fn compile(
    ctx: &mut IrContext,
    program: &Program,
    entry_token: u32,
) -> Result<Handle<Method>, FrontendError> {
    compile_inner(ctx, program, entry_token, &mut Vec::new())
}

/// Compiles an entry point by name.
pub fn compile_by_name(
    ctx: &mut IrContext,
    program: &Program,
    name: &str,
) -> Result<Handle<Method>, FrontendError> {
    let mb = program
        .find_by_name(name)
        .ok_or_else(|| FrontendError::UnsupportedCallTarget(format!("unknown method '{name}'")))?;
    compile(ctx, program, mb.handle.token)
}

fn compile_inner(
    ctx: &mut IrContext,
    program: &Program,
    token: u32,
    in_progress: &mut Vec<u32>,
) -> Result<Handle<Method>, FrontendError> {
    let mb = program
        .find(token)
        .ok_or(FrontendError::UnknownMethod(token))?;
    if let Some(existing) = ctx.lookup_method(&mb.handle) {
        return Ok(existing);
    }
    if in_progress.contains(&token) {
        return Err(FrontendError::UnsupportedCallTarget(format!(
            "recursive call through '{}'",
            mb.handle.name
        )));
    }
    in_progress.push(token);
    for callee in mb.call_targets() {
        compile_inner(ctx, program, callee, in_progress)?;
    }
    in_progress.pop();
    lower::lower_method(ctx, program, mb)
}
