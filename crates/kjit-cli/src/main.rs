use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{miette, Context, IntoDiagnostic};

use kjit_backend_core::{
    BackendOptions, BackendRegistry, KernelSpecialization, SpecializationFlags,
};
use kjit_ir::IrContext;
use kjit_opt::{OptLevel, PassManager};

/// kjit — kernel assembly to GPU source compiler
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input kernel assembly file (.kasm)
    input: Option<PathBuf>,

    /// Kernel entry method name (default: the first method)
    #[arg(short, long)]
    kernel: Option<String>,

    /// Target backend (default: ir-dump)
    #[arg(short, long, default_value = "ir-dump")]
    target: String,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Dump the optimized IR to stderr before backend compilation
    #[arg(long)]
    emit_ir: bool,

    /// Optimization level: 0, 1, or 2
    #[arg(long, default_value = "2", value_parser = parse_opt_level)]
    opt_level: OptLevel,

    /// Maximum group size specialization
    #[arg(long)]
    max_group_size: Option<u32>,

    /// Minimum group size specialization
    #[arg(long)]
    min_group_size: Option<u32>,

    /// Allow fast-math code generation
    #[arg(long)]
    fast_math: bool,

    /// List all available target backends and exit
    #[arg(long)]
    list_targets: bool,
}

fn parse_opt_level(s: &str) -> Result<OptLevel, String> {
    match s {
        "0" => Ok(OptLevel::O0),
        "1" => Ok(OptLevel::O1),
        "2" => Ok(OptLevel::O2),
        _ => Err(format!(
            "invalid optimization level '{s}', expected 0, 1, or 2"
        )),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn build_registry() -> BackendRegistry {
    let mut registry = BackendRegistry::with_builtins();
    registry.register(Box::new(kjit_backend_ptx::PtxBackend));
    registry.register(Box::new(kjit_backend_opencl::OpenClBackend));
    registry
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let registry = build_registry();

    if cli.list_targets {
        for target in registry.list_targets() {
            println!("{target}");
        }
        return Ok(());
    }

    let input = cli
        .input
        .as_ref()
        .ok_or_else(|| miette!("no input file (try --list-targets for available targets)"))?;
    let source = std::fs::read_to_string(input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", input.display()))?;

    let program = kjit_frontend::assemble(&source)
        .into_diagnostic()
        .wrap_err("assembly failed")?;
    let entry = match &cli.kernel {
        Some(name) => name.clone(),
        None => program
            .methods
            .first()
            .map(|m| m.handle.name.clone())
            .ok_or_else(|| miette!("the input contains no methods"))?,
    };

    let mut specialization = KernelSpecialization {
        max_group_size: cli.max_group_size,
        min_group_size: cli.min_group_size,
        ..Default::default()
    };
    if cli.fast_math {
        specialization.flags = specialization.flags | SpecializationFlags::FAST_MATH;
    }

    let mut ctx = IrContext::new();
    let kernel = kjit_frontend::compile_by_name(&mut ctx, &program, &entry)
        .into_diagnostic()
        .wrap_err_with(|| format!("lowering '{entry}' failed"))?;
    PassManager::for_level(cli.opt_level, &specialization).run(&mut ctx, kernel);
    if cli.emit_ir {
        eprintln!("{}", kjit_ir::dump_method(&ctx, kernel));
    }

    let backend = registry
        .find(&cli.target)
        .ok_or_else(|| miette!("unknown target '{}' (try --list-targets)", cli.target))?;
    let output = backend
        .compile(
            &ctx,
            kernel,
            &BackendOptions { specialization },
        )
        .into_diagnostic()
        .wrap_err_with(|| format!("{} compilation failed", backend.name()))?;

    for diagnostic in &output.diagnostics {
        eprintln!("{diagnostic}");
    }
    match &cli.output {
        Some(path) => {
            std::fs::write(path, &output.source)
                .into_diagnostic()
                .wrap_err_with(|| format!("failed to write {}", path.display()))?;
            eprintln!("{} -> {}", output.symbol, path.display());
        }
        None => print!("{}", output.source),
    }
    Ok(())
}
