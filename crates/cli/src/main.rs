/// Entry point for the shade CLI, a bytecode obfuscation tool.
///
/// This module parses command-line arguments and dispatches to subcommands for obfuscating a
/// module or inspecting a method's blocks. It initializes logging and handles the main
/// execution flow.
use clap::Parser;
use shade_cli::commands::{Cmd, Command};
use tracing_subscriber::EnvFilter;

/// Command-line interface for shade.
///
/// shade rewrites a module's method bodies to resist static analysis: no-op padding, string
/// literal encoding, debugger tripwires, control-flow flattening and symbol renaming.
#[derive(Parser)]
#[command(name = "shade")]
#[command(about = "shade: bytecode obfuscator")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Log per-block and per-instruction detail
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Runs the shade CLI with the provided arguments.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cli.command.execute().await
}
