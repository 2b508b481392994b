//! IR transformation passes for kjit.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] with fixed-point
//! iteration, and the mandatory pass pipeline: inlining, CFG
//! simplification, constant folding, dead code elimination, memory-to-
//! register promotion and kernel specialization.

mod const_fold;
mod dce;
mod inline;
mod mem2reg;
mod simplify_cfg;
mod specialize;

pub use const_fold::ConstantFolder;
pub use dce::Dce;
pub use inline::Inliner;
pub use mem2reg::Mem2Reg;
pub use simplify_cfg::SimplifyCfg;
pub use specialize::Specializer;

use std::fmt::Debug;

use kjit_backend_core::KernelSpecialization;
use kjit_ir::{Handle, IrContext, Method, TransformFlags};

/// An optimization pass that rewrites one method's IR via its builder.
pub trait Pass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Runs the pass on a method. Returns `true` if anything changed.
    fn run(&self, ctx: &mut IrContext, method: Handle<Method>) -> bool;
}

/// Optimization level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptLevel {
    /// No optimizations.
    O0,
    /// Scalar cleanups: constant folding, dead code elimination, memory
    /// promotion.
    O1,
    /// Aggressive: inlining, CFG folding and specialization on top of O1.
    O2,
}

/// Default bound on fixed-point iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 16;

/// Runs passes in sequence with bounded fixed-point iteration.
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
    max_iterations: usize,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    /// Creates the full mandatory pipeline for a kernel specialization.
    pub fn standard(specialization: &KernelSpecialization) -> Self {
        Self::for_level(OptLevel::O2, specialization)
    }

    /// Creates a pass manager with passes appropriate for the given level,
    /// keeping the mandatory pass order.
    pub fn for_level(level: OptLevel, specialization: &KernelSpecialization) -> Self {
        let mut pm = Self::new();
        match level {
            OptLevel::O0 => {}
            OptLevel::O1 => {
                pm.add_pass(Box::new(ConstantFolder));
                pm.add_pass(Box::new(Dce));
                pm.add_pass(Box::new(Mem2Reg));
            }
            OptLevel::O2 => {
                pm.add_pass(Box::new(Inliner::default()));
                pm.add_pass(Box::new(SimplifyCfg));
                pm.add_pass(Box::new(ConstantFolder));
                pm.add_pass(Box::new(Dce));
                pm.add_pass(Box::new(Mem2Reg));
                pm.add_pass(Box::new(Specializer::new(specialization.clone())));
            }
        }
        pm
    }

    /// Overrides the fixed-point iteration cap.
    pub fn with_max_iterations(mut self, cap: usize) -> Self {
        self.max_iterations = cap;
        self
    }

    /// Appends a pass.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Runs the pipeline to a fixed point (bounded by the iteration cap)
    /// and marks the method transformed. Returns `true` if any pass
    /// changed the method.
    ///
    /// Methods already carrying `TRANSFORMED` are skipped.
    pub fn run(&self, ctx: &mut IrContext, method: Handle<Method>) -> bool {
        if ctx
            .method(method)
            .transform
            .contains(TransformFlags::TRANSFORMED)
        {
            return false;
        }
        let mut any = false;
        for _ in 0..self.max_iterations {
            let mut changed = false;
            for pass in &self.passes {
                changed |= pass.run(ctx, method);
            }
            any |= changed;
            if !changed {
                break;
            }
        }
        ctx.mark_transformed(method);
        any
    }
}
