use kjit_backend_core::{Backend, BackendOptions, BackendOutput, KernelSpecialization};
use kjit_ir::{Handle, IrContext, Method};
use kjit_opt::PassManager;

/// Assemble, lower and optimize a kernel under a specialization.
#[allow(dead_code)]
pub fn build(
    source: &str,
    entry: &str,
    specialization: &KernelSpecialization,
) -> (IrContext, Handle<Method>) {
    let program = kjit_frontend::assemble(source).expect("assembly failed");
    let mut ctx = IrContext::new();
    let kernel =
        kjit_frontend::compile_by_name(&mut ctx, &program, entry).expect("lowering failed");
    PassManager::standard(specialization).run(&mut ctx, kernel);
    (ctx, kernel)
}

/// Full pipeline through a backend.
#[allow(dead_code)]
pub fn compile_with(
    backend: &dyn Backend,
    source: &str,
    entry: &str,
    specialization: &KernelSpecialization,
) -> BackendOutput {
    let (ctx, kernel) = build(source, entry, specialization);
    backend
        .compile(
            &ctx,
            kernel,
            &BackendOptions {
                specialization: specialization.clone(),
            },
        )
        .expect("backend compilation failed")
}
