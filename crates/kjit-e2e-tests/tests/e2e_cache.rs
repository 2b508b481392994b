//! Kernel cache scenarios: reuse, expiry and incremental GC.

use std::sync::Arc;

use kjit_backend_core::KernelSpecialization;
use kjit_backend_ptx::PtxBackend;
use kjit_runtime::Accelerator;

fn vector_program(kernels: u32) -> kjit_frontend::bytecode::Program {
    let mut source = String::new();
    for i in 0..kernels {
        source.push_str(&format!(
            r#"
.method Scale{i} {token} (view<global, i32>) -> void
  ldarg 0
  ldc.i4 0
  ldarg 0
  ldc.i4 0
  ldelem
  ldc.i4 {mult}
  mul
  stelem
  ret
"#,
            token = i + 1,
            mult = i + 2,
        ));
    }
    kjit_frontend::assemble(&source).expect("program assembles")
}

#[test]
fn repeated_compilation_reuses_the_cached_kernel() {
    let acc = Accelerator::with_backend(Box::new(PtxBackend));
    let program = vector_program(1);
    let spec = KernelSpecialization::default();
    let first = acc.compile_kernel(&program, "Scale0", &spec).unwrap();
    let second = acc.compile_kernel(&program, "Scale0", &spec).unwrap();
    assert_eq!(acc.compile_count(), 1);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn expired_weak_reference_recompiles_equivalently() {
    let acc = Accelerator::with_backend(Box::new(PtxBackend));
    let program = vector_program(1);
    let spec = KernelSpecialization::default();
    let first = acc.compile_kernel(&program, "Scale0", &spec).unwrap();
    let first_text = first.source.clone();
    drop(first);
    let second = acc.compile_kernel(&program, "Scale0", &spec).unwrap();
    assert_eq!(acc.compile_count(), 2);
    assert_eq!(first_text, second.source);
}

#[test]
fn gc_leaves_one_live_entry_after_a_dead_generation() {
    let acc = Accelerator::with_backend(Box::new(PtxBackend));
    let program = vector_program(129);
    let spec = KernelSpecialization::default();
    for i in 0..128 {
        // Drop every referent as soon as it is produced.
        let _ = acc
            .compile_kernel(&program, &format!("Scale{i}"), &spec)
            .unwrap();
    }
    let last = acc.compile_kernel(&program, "Scale128", &spec).unwrap();
    let cache = acc.cache().expect("cache enabled");
    assert_eq!(cache.compiled_live_count(), 1);
    drop(last);
}

#[test]
fn same_method_compiles_byte_identical_text() {
    let acc = Accelerator::with_backend(Box::new(PtxBackend));
    let program = vector_program(1);
    let spec = KernelSpecialization {
        max_group_size: Some(256),
        ..Default::default()
    };
    let a = acc.compile_kernel(&program, "Scale0", &spec).unwrap();
    drop(a.source.clone());
    let text_a = a.source.clone();
    drop(a);
    let b = acc.compile_kernel(&program, "Scale0", &spec).unwrap();
    assert_eq!(text_a, b.source);
}
