//! Operator CLI for the table access engine: one module per subcommand, a
//! typed error mapped to a process exit code at the very top of `main`.

mod exit_code;
mod force_flush;
mod mockdata;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_code::result_to_exit_code;

#[derive(Parser)]
#[command(name = "tae-cli", about = "Operator tools for the table access engine")]
struct Cli {
    /// Database directory to open (passed to `tae::Engine::open`).
    #[arg(long, global = true, default_value = "./tae-data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Periodically force-flushes a table's current appendable object.
    ForceFlush(force_flush::ForceFlushArgs),
    /// Synthetic workload generators.
    Mockdata {
        #[command(subcommand)]
        case: mockdata::MockdataCommand,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::ForceFlush(args) => force_flush::run(&cli.data_dir, args),
        Commands::Mockdata { case } => mockdata::run(&cli.data_dir, case),
    };

    result_to_exit_code(result)
}
