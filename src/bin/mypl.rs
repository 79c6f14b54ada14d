use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use log::LevelFilter;
use mypl::{compile, VirtualMachine, VmConfig};

#[derive(Parser)]
#[command(name = "mypl")]
#[command(about = "Runs MyPL programs on the MyPL virtual machine")]
struct Cli {
    file: PathBuf,

    /// Function the run starts in
    #[arg(long, default_value = "main")]
    entry: String,

    /// Print the generated frame templates instead of running them
    #[arg(long)]
    dump: bool,

    /// Trace every executed instruction
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut logger = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn"),
    );
    if cli.debug {
        logger.filter_module("mypl", LevelFilter::Trace);
    }
    logger.init();

    let source = fs::read_to_string(&cli.file)
        .with_context(|| format!("Failed to read file: {}", cli.file.display()))?;

    let templates = compile(&source)?;

    let config = VmConfig {
        entry_point: cli.entry,
    };
    let stdin = std::io::stdin();
    let mut vm = VirtualMachine::with_io(config, stdin.lock(), std::io::stdout());
    vm.load(templates);

    if cli.dump {
        print!("{}", vm);
        return Ok(());
    }

    vm.run().context("Runtime error")?;

    Ok(())
}
