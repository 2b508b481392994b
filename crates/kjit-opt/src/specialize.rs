//! Kernel specialization pass.
//!
//! Substitutes intrinsic queries whose answers are pinned by the active
//! [`KernelSpecialization`]: a pinned group size turns `GroupDim` queries
//! into constants, which the constant folder then propagates.

use kjit_backend_core::KernelSpecialization;
use kjit_ir::{
    Dim3, Handle, IntrinsicKind, IrContext, Method, PrimitiveValue, Value, ValueKind,
};

use crate::Pass;

/// Replaces specialization-known intrinsics with constants.
#[derive(Debug)]
pub struct Specializer {
    specialization: KernelSpecialization,
}

impl Specializer {
    /// Creates a specializer for the given specialization record.
    pub fn new(specialization: KernelSpecialization) -> Self {
        Self { specialization }
    }
}

impl Pass for Specializer {
    fn name(&self) -> &str {
        "specialize"
    }

    fn run(&self, ctx: &mut IrContext, method: Handle<Method>) -> bool {
        let Some(group_size) = self.specialization.pinned_group_size() else {
            return false;
        };
        let replacements: Vec<(Handle<Value>, i32)> = {
            let m = ctx.method(method);
            m.blocks
                .iter()
                .flat_map(|(_, b)| b.values.iter().copied())
                .filter_map(|v| match m.values[v].kind {
                    // Group sizes are one-dimensional when pinned.
                    ValueKind::Intrinsic(IntrinsicKind::GroupDim(Dim3::X)) => {
                        Some((v, group_size as i32))
                    }
                    ValueKind::Intrinsic(IntrinsicKind::GroupDim(_)) => Some((v, 1)),
                    _ => None,
                })
                .collect()
        };
        if replacements.is_empty() {
            return false;
        }
        let mut b = ctx.builder(method).expect("no live builder during passes");
        for (v, value) in replacements {
            b.replace_with_constant(v, PrimitiveValue::Int32(value));
        }
        true
    }
}
