//! Backend scenarios: the scalar-add kernel shape on both targets and
//! cross-target consistency checks.

mod common;

use common::compile_with;
use kjit_backend_core::KernelSpecialization;
use kjit_backend_opencl::OpenClBackend;
use kjit_backend_ptx::PtxBackend;

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
fn scalar_add_ptx_contains_exactly_the_expected_memory_ops() {
    let out = compile_with(
        &PtxBackend,
        SCALAR_ADD,
        "ScalarAdd",
        &KernelSpecialization::default(),
    );
    let ptx = &out.source;
    assert_eq!(ptx.matches("ld.global.u32").count(), 2, "{ptx}");
    assert_eq!(ptx.matches("add.s32").count(), 1, "{ptx}");
    assert_eq!(ptx.matches("st.global.u32").count(), 1, "{ptx}");
    assert!(!ptx.contains("call"), "{ptx}");
    assert!(!ptx.contains("bra"), "{ptx}");
}

#[test]
fn scalar_add_opencl_is_a_single_block_kernel() {
    let out = compile_with(
        &OpenClBackend,
        SCALAR_ADD,
        "ScalarAdd",
        &KernelSpecialization::default(),
    );
    let cl = &out.source;
    assert_eq!(out.symbol, "ILGPUKernel");
    assert!(cl.contains("__kernel void ILGPUKernel("), "{cl}");
    // Views split into pointer + length scalars.
    assert!(cl.matches("_len").count() >= 3, "{cl}");
    assert!(cl.contains(" + "), "{cl}");
    assert!(cl.contains("return;"), "{cl}");
}

#[test]
fn both_backends_accept_a_loop_kernel() {
    let source = r#"
.method Sum 1 (i32, view<global, i32>, view<global, i32>) -> void
.locals (i32, i32)
top:
  ldloc 0
  ldarg 0
  clt
  brfalse done
  ldloc 1
  ldarg 1
  ldloc 0
  ldelem
  add
  stloc 1
  ldloc 0
  ldc.i4 1
  add
  stloc 0
  br top
done:
  ldarg 2
  ldc.i4 0
  ldloc 1
  stelem
  ret
"#;
    let spec = KernelSpecialization::default();
    let ptx = compile_with(&PtxBackend, source, "Sum", &spec);
    assert!(ptx.source.contains("bra BB"), "{}", ptx.source);
    assert!(ptx.source.contains("setp.lt.s32"), "{}", ptx.source);

    let cl = compile_with(&OpenClBackend, source, "Sum", &spec);
    assert!(cl.source.contains("goto BB"), "{}", cl.source);
    // The loop-carried values surface as hoisted φ variables.
    assert!(cl.source.contains("int v"), "{}", cl.source);
}

#[test]
fn group_queries_lower_per_target() {
    let source = r#"
.method Tid 1 (view<global, i32>) -> void
  ldarg 0
  groupindex.x
  groupindex.x
  stelem
  ret
"#;
    let spec = KernelSpecialization::default();
    let ptx = compile_with(&PtxBackend, source, "Tid", &spec);
    assert!(ptx.source.contains("%tid.x"), "{}", ptx.source);
    let cl = compile_with(&OpenClBackend, source, "Tid", &spec);
    assert!(cl.source.contains("get_local_id(0)"), "{}", cl.source);
}

#[test]
fn specialized_group_size_folds_group_dim_queries() {
    let source = r#"
.method Dim 1 (view<global, i32>) -> void
  ldarg 0
  ldc.i4 0
  groupdim.x
  stelem
  ret
"#;
    let spec = KernelSpecialization {
        min_group_size: Some(64),
        max_group_size: Some(64),
        ..Default::default()
    };
    let ptx = compile_with(&PtxBackend, source, "Dim", &spec);
    // The query folded to a constant; no %ntid read survives.
    assert!(!ptx.source.contains("%ntid.x"), "{}", ptx.source);
    assert!(ptx.source.contains("mov.s32"), "{}", ptx.source);
    assert!(ptx.source.contains(".reqntid 64, 1, 1"), "{}", ptx.source);
}
