//! Pipeline-level scenarios: constant folding, φ-placement, idempotence
//! and the promoted-alloca guarantee.

mod common;

use common::build;
use kjit_backend_core::KernelSpecialization;
use kjit_ir::{dump_method, Terminator, TransformFlags, ValueKind};
use kjit_opt::PassManager;

#[test]
fn constant_expression_collapses_to_a_single_return() {
    // return (5 + 3) * 2;
    let source = r#"
.method Const 1 () -> i32
  ldc.i4 5
  ldc.i4 3
  add
  ldc.i4 2
  mul
  ret
"#;
    let (ctx, kernel) = build(source, "Const", &KernelSpecialization::default());
    let m = ctx.method(kernel);
    // One reachable block whose only payload is `ret const(16:i32)`.
    let reachable: Vec<_> = m
        .blocks
        .iter()
        .filter(|(_, b)| b.terminator.is_some())
        .collect();
    assert_eq!(reachable.len(), 1);
    let (_, entry) = reachable[0];
    let Some(Terminator::Return { value: Some(v) }) = entry.terminator else {
        panic!("expected a value return");
    };
    assert_eq!(
        m.values[v].as_constant(),
        Some(kjit_ir::PrimitiveValue::Int32(16))
    );
    let dump = dump_method(&ctx, kernel);
    assert!(dump.contains("ret const(16:i32)"), "{dump}");
}

#[test]
fn diamond_join_carries_one_phi_in_the_dump() {
    let source = r#"
.method Pick 1 (i32) -> i32
.locals (i32)
  ldarg 0
  ldc.i4 0
  clt
  brtrue low
  ldc.i4 7
  stloc 0
  br out
low:
  ldc.i4 9
  stloc 0
out:
  ldloc 0
  ret
"#;
    let (ctx, kernel) = build(source, "Pick", &KernelSpecialization::default());
    let m = ctx.method(kernel);
    let phis: Vec<_> = m
        .blocks
        .iter()
        .flat_map(|(_, b)| b.values.iter())
        .filter(|&&v| m.values[v].kind.is_phi())
        .collect();
    assert_eq!(phis.len(), 1);
    let dump = dump_method(&ctx, kernel);
    assert!(dump.contains("= phi [BB"), "{dump}");
    assert!(dump.contains("const(7:i32)"), "{dump}");
    assert!(dump.contains("const(9:i32)"), "{dump}");
}

#[test]
fn pipeline_is_idempotent_on_the_ir_dump() {
    let source = r#"
.method Loop 1 (i32, view<global, i32>) -> void
.locals (i32, i32)
top:
  ldloc 0
  ldarg 0
  clt
  brfalse done
  ldloc 1
  ldloc 0
  add
  stloc 1
  ldloc 0
  ldc.i4 1
  add
  stloc 0
  br top
done:
  ldarg 1
  ldc.i4 0
  ldloc 1
  stelem
  ret
"#;
    let spec = KernelSpecialization::default();
    let (mut ctx, kernel) = build(source, "Loop", &spec);
    let first = dump_method(&ctx, kernel);

    // Force a second full pipeline run over the already-transformed IR.
    {
        let _builder = ctx.builder(kernel).unwrap();
    }
    assert!(
        !ctx.method(kernel)
            .transform
            .contains(TransformFlags::TRANSFORMED)
    );
    let changed = PassManager::standard(&spec).run(&mut ctx, kernel);
    assert!(!changed);
    let second = dump_method(&ctx, kernel);
    assert_eq!(first, second);
}

#[test]
fn no_promotable_alloca_survives_the_pipeline() {
    // Taking the local's address demotes it to an Alloca slot in the
    // frontend; once the address use is discarded, Mem2Reg promotes the
    // slot back to SSA form.
    let source = r#"
.method Slot 1 (i32) -> i32
.locals (i32)
  ldloca 0
  pop
  ldarg 0
  stloc 0
  ldloc 0
  ret
"#;
    let (ctx, kernel) = build(source, "Slot", &KernelSpecialization::default());
    let m = ctx.method(kernel);
    let allocas = m
        .blocks
        .iter()
        .flat_map(|(_, b)| b.values.iter())
        .filter(|&&v| matches!(m.values[v].kind, ValueKind::Alloca { .. }))
        .count();
    assert_eq!(allocas, 0);
}

#[test]
fn dump_is_stable_across_calls() {
    let source = r#"
.method Stable 1 (i32, view<global, f32>) -> void
  ldarg 1
  ldarg 0
  ldarg 1
  ldarg 0
  ldelem
  math.sqrt
  stelem
  ret
"#;
    let (ctx, kernel) = build(source, "Stable", &KernelSpecialization::default());
    assert_eq!(dump_method(&ctx, kernel), dump_method(&ctx, kernel));
}
