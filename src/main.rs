use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;

use clap::{Parser, Subcommand};
use target_lexicon::Triple;

use seed::codegen::{self, CodegenError};
use seed::{Vm, VmConfig, loader, verify};

#[derive(Parser)]
#[command(name = "seed", version, about = "Run, check and compile seed bytecode modules")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a module's entry function
    Run {
        /// Module file (.sbc text, or .json)
        path: PathBuf,
        /// Entry function name
        #[arg(long, default_value = "main")]
        entry: String,
        /// Trace each instruction to stderr (overrides SEED_TRACE)
        #[arg(long)]
        trace: bool,
        /// Collect after every N instructions, 0 disables (overrides SEED_GC_EVERY)
        #[arg(long, value_name = "N")]
        gc_every: Option<u64>,
        /// Print step and collection counts to stderr after the run
        #[arg(long)]
        stats: bool,
    },
    /// Statically verify a module
    Check { path: PathBuf },
    /// Print a module in text form, or as JSON
    Dump {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Emit AArch64 assembly for the add program shape
    Asm {
        path: PathBuf,
        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Target triple (defaults to the host)
        #[arg(long)]
        target: Option<String>,
    },
    /// JIT-compile and run the add program shape with Cranelift
    #[cfg(feature = "cranelift")]
    Jit { path: PathBuf },
}

/// Initialize tracing when `RUST_LOG` is set, e.g. `RUST_LOG=seed=debug`.
fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(io::stderr).with_target(true).with_level(true))
            .with(EnvFilter::from_default_env())
            .init();
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command) -> seed::Result<()> {
    match command {
        Command::Run { path, entry, trace, gc_every, stats } => {
            let module = loader::load(&path)?;
            let mut config = VmConfig::from_env();
            if trace {
                config = config.with_trace(true);
            }
            if let Some(n) = gc_every {
                config = config.with_gc_every(n);
            }

            let mut vm = Vm::new(config);
            tracing::debug!(config = ?vm.config(), entry = %entry, "vm configured");
            let stdout = io::stdout();
            let mut out = stdout.lock();
            let result = vm.run(&module, &entry, &mut out);
            // Output printed before a fault still reaches the terminal.
            out.flush()?;
            let outcome = result?;
            if stats {
                eprintln!(
                    "steps={} collections={} residual_stack={} heap_objects={}",
                    outcome.steps,
                    outcome.collections,
                    outcome.residual_stack,
                    vm.heap().object_count()
                );
            }
        }
        Command::Check { path } => {
            let module = loader::load(&path)?;
            verify::verify(&module)?;
            println!("ok: {} function(s), {} constant(s)", module.funcs.len(), module.consts.len());
        }
        Command::Dump { path, json } => {
            let module = loader::load(&path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&module)?);
            } else {
                print!("{module}");
            }
        }
        Command::Asm { path, output, target } => {
            let module = loader::load(&path)?;
            let triple = match target {
                Some(t) => Triple::from_str(&t).map_err(|_| CodegenError::UnsupportedTarget(t.clone()))?,
                None => Triple::host(),
            };
            let asm = codegen::a64::emit(&module, &triple)?;
            match output {
                Some(file) => std::fs::write(file, asm)?,
                None => print!("{asm}"),
            }
        }
        #[cfg(feature = "cranelift")]
        Command::Jit { path } => {
            let module = loader::load(&path)?;
            let stdout = io::stdout();
            codegen::jit_cranelift::run(&module, &mut stdout.lock())?;
        }
    }
    Ok(())
}
