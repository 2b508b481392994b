#![no_main]

use libfuzzer_sys::fuzz_target;

use kjit_backend_core::KernelSpecialization;

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    // The full assemble + lower + optimize pipeline should never panic.
    let Ok(program) = kjit_frontend::assemble(source) else {
        return;
    };
    let Some(entry) = program.methods.first().map(|m| m.handle.token) else {
        return;
    };
    let mut ctx = kjit_ir::IrContext::new();
    if let Ok(kernel) = kjit_frontend::compile(&mut ctx, &program, entry) {
        kjit_opt::PassManager::standard(&KernelSpecialization::default()).run(&mut ctx, kernel);
    }
});
