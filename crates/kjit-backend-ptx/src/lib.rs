//! PTX backend for kjit.
//!
//! Compiles a fully-simplified kernel method into PTX assembly text
//! (ISA 6.0, `sm_50`, 64-bit addressing). The entry point is named
//! `ILGPUKernel<token>`; surviving calls become `.func` definitions
//! emitted before their callers.

mod emit;
mod regalloc;

pub use regalloc::{Mapping, PtxRegister, RegisterAllocator, RegisterKind};

use kjit_backend_core::{Backend, BackendError, BackendOptions, BackendOutput};
use kjit_ir::{Handle, IrContext, Method, TargetAbi};

/// The PTX code generator.
#[derive(Debug)]
pub struct PtxBackend;

impl Backend for PtxBackend {
    fn name(&self) -> &str {
        "PTX"
    }

    fn targets(&self) -> &[&str] {
        &["ptx", "cuda"]
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
        let (symbol, source) = emit::emit_module(ctx, kernel, opts)?;
        Ok(BackendOutput {
            symbol,
            source,
            diagnostics: vec![],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kjit_backend_core::{KernelSpecialization, SpecializationFlags};
    use kjit_opt::PassManager;

    fn compile_asm(source: &str, entry: &str, spec: KernelSpecialization) -> BackendOutput {
        let program = kjit_frontend::assemble(source).expect("assembly parses");
        let mut ctx = IrContext::new();
        let kernel = kjit_frontend::compile_by_name(&mut ctx, &program, entry).expect("lowers");
        PassManager::standard(&spec).run(&mut ctx, kernel);
        PtxBackend
            .compile(
                &ctx,
                kernel,
                &BackendOptions {
                    specialization: spec,
                },
            )
            .expect("PTX compiles")
    }

    const SCALAR_ADD: &str = r#"
.method ScalarAdd 1 (i32, view<global, i32>, view<global, i32>, view<global, i32>) -> void
  ldarg 3
  ldarg 0
  ldarg 1
  ldarg 0
  ldelem
  ldarg 2
  ldarg 0
  ldelem
  add
  stelem
  ret
"#;

    #[test]
    fn scalar_add_kernel_shape() {
        let out = compile_asm(SCALAR_ADD, "ScalarAdd", KernelSpecialization::default());
        assert_eq!(out.symbol, "ILGPUKernel1");
        let ptx = &out.source;
        assert!(ptx.contains(".visible .entry ILGPUKernel1("), "{ptx}");
        assert_eq!(ptx.matches("ld.global.u32").count(), 2, "{ptx}");
        assert_eq!(ptx.matches("add.s32").count(), 1, "{ptx}");
        assert_eq!(ptx.matches("st.global.u32").count(), 1, "{ptx}");
        assert!(!ptx.contains("call"), "{ptx}");
        assert!(!ptx.contains("bra"), "{ptx}");
    }

    #[test]
    fn compilation_is_deterministic() {
        let a = compile_asm(SCALAR_ADD, "ScalarAdd", KernelSpecialization::default());
        let b = compile_asm(SCALAR_ADD, "ScalarAdd", KernelSpecialization::default());
        assert_eq!(a.source, b.source);
    }

    #[test]
    fn branches_emit_predicated_bra() {
        let source = r#"
.method Clamp 1 (i32, view<global, i32>) -> void
  ldarg 0
  ldc.i4 0
  clt
  brtrue negative
  ldarg 1
  ldarg 0
  ldarg 0
  stelem
  ret
negative:
  ldarg 1
  ldc.i4 0
  ldc.i4 0
  stelem
  ret
"#;
        let out = compile_asm(source, "Clamp", KernelSpecialization::default());
        let ptx = &out.source;
        assert!(ptx.contains("setp.lt.s32"), "{ptx}");
        assert!(ptx.contains(" bra BB"), "{ptx}");
        assert!(ptx.contains("@%p"), "{ptx}");
    }

    #[test]
    fn fast_math_selects_approximate_division() {
        let source = r#"
.method Recip 1 (i32, view<global, f32>) -> void
  ldarg 1
  ldarg 0
  ldc.r4 1
  ldarg 1
  ldarg 0
  ldelem
  div
  stelem
  ret
"#;
        let precise = compile_asm(source, "Recip", KernelSpecialization::default());
        assert!(precise.source.contains("div.rn.f32"), "{}", precise.source);
        let fast = compile_asm(
            source,
            "Recip",
            KernelSpecialization {
                flags: SpecializationFlags::FAST_MATH,
                ..Default::default()
            },
        );
        assert!(fast.source.contains("div.approx.ftz.f32"), "{}", fast.source);
    }

    #[test]
    fn pinned_group_size_emits_reqntid() {
        let out = compile_asm(
            SCALAR_ADD,
            "ScalarAdd",
            KernelSpecialization {
                min_group_size: Some(128),
                max_group_size: Some(128),
                ..Default::default()
            },
        );
        assert!(out.source.contains(".reqntid 128, 1, 1"), "{}", out.source);
    }

    #[test]
    fn intrinsics_map_to_special_registers() {
        let source = r#"
.method Index 1 (view<global, i32>) -> void
  ldarg 0
  groupindex.x
  groupdim.x
  gridindex.x
  mul
  add
  dup
  stelem
  ret
"#;
        // idx = tid.x + ntid.x * ctaid.x ; out[idx] = idx
        let program = kjit_frontend::assemble(source).unwrap();
        let mut ctx = IrContext::new();
        let kernel = kjit_frontend::compile_by_name(&mut ctx, &program, "Index").unwrap();
        PassManager::standard(&KernelSpecialization::default()).run(&mut ctx, kernel);
        let out = PtxBackend
            .compile(&ctx, kernel, &BackendOptions::default())
            .unwrap();
        assert!(out.source.contains("%tid.x"), "{}", out.source);
        assert!(out.source.contains("%ntid.x"), "{}", out.source);
        assert!(out.source.contains("%ctaid.x"), "{}", out.source);
    }

    #[test]
    fn atomics_emit_atom_ops() {
        let source = r#"
.method Count 1 (view<global, i32>) -> void
  ldarg 0
  ldc.i4 0
  ldelema
  ldc.i4 1
  atomic.add
  pop
  ret
"#;
        let out = compile_asm(source, "Count", KernelSpecialization::default());
        assert!(out.source.contains("atom.global.add.u32"), "{}", out.source);
    }

    #[test]
    fn shuffle_width_clamps_to_warp() {
        let source = r#"
.method Shfl 1 (view<global, f32>) -> void
  ldarg 0
  ldc.i4 0
  ldarg 0
  ldc.i4 0
  ldelem
  laneindex
  shuffle.down 64
  stelem
  ret
"#;
        let out = compile_asm(source, "Shfl", KernelSpecialization::default());
        // Width 64 clamps to 32: c = ((32-32)<<8)|31 = 31.
        assert!(
            out.source.contains("shfl.sync.down.b32"),
            "{}",
            out.source
        );
        assert!(out.source.contains(", 31, 0xffffffff;"), "{}", out.source);
    }

    #[test]
    fn non_void_entry_is_rejected() {
        let source = ".method NotAKernel 1 (i32) -> i32\n  ldarg 0\n  ret\n";
        let program = kjit_frontend::assemble(source).unwrap();
        let mut ctx = IrContext::new();
        let kernel = kjit_frontend::compile_by_name(&mut ctx, &program, "NotAKernel").unwrap();
        let err = PtxBackend
            .compile(&ctx, kernel, &BackendOptions::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::NotSupported(_)));
    }
}
