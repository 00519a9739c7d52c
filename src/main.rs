use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ls8_common::{Cpu, ProgramImage, RunMode, StdoutSink};

#[derive(Parser)]
struct Args {
    /// print a trace line before every instruction
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(short, long, global = true)]
    print_memory_access: bool,
    /// print registers, flags and memory after the run
    #[arg(short, long, global = true)]
    show_cpu_state: bool,
    /// stop after this many instructions
    #[arg(short, long, global = true)]
    max_instructions: Option<isize>,
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand)]
enum Action {
    /// run an `.ls8` listing
    Run { path: PathBuf },
    /// assemble and run an assembly file
    RunAsm { path: PathBuf },
    /// run an image produced by `ls8asm`
    RunImage { path: PathBuf },
}

struct Options {
    verbose: bool,
    print_memory_access: bool,
    show_cpu_state: bool,
    max_instructions: Option<isize>,
}

fn run(image: &ProgramImage, options: &Options) -> anyhow::Result<()> {
    let mut cpu = Cpu::new(StdoutSink);
    cpu.set_verbose(options.verbose);
    cpu.set_print_memory_access(options.print_memory_access);
    cpu.set_entrypoint(image.header.entrypoint);
    cpu.load_program(&image.data)?;

    let run_mode = match options.max_instructions {
        Some(limit) => RunMode::RunFor(limit),
        None => RunMode::Run,
    };

    let result = cpu.execute(run_mode);

    if options.show_cpu_state {
        cpu.print_state();
        println!();
        println!("========== RESULT/STATS ===========");
        println!();
        println!("{:#?}", result);
    }

    if let Err(err) = result {
        eprintln!("{}", cpu.snapshot());
        return Err(err).context("program terminated with a fatal error");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let Args {
        verbose,
        print_memory_access,
        show_cpu_state,
        max_instructions,
        action,
    } = Args::parse();

    let options = Options {
        verbose,
        print_memory_access,
        show_cpu_state,
        max_instructions,
    };

    let image = match action {
        Action::Run { path } => ProgramImage::from_listing_file(&path)
            .with_context(|| format!("failed to load '{}'", path.display()))?,
        Action::RunAsm { path } => {
            let program = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read '{}'", path.display()))?;
            let mut assembler = ls8_assembler::Assembler::new();
            assembler.assemble_program(&program)?
        }
        Action::RunImage { path } => ProgramImage::load(&path)
            .with_context(|| format!("failed to load '{}'", path.display()))?,
    };

    run(&image, &options)
}
