use clap::{Parser, Subcommand};

use quarry_cli::commands;

/// Quarry -- inspect the client-side query cache.
#[derive(Parser)]
#[command(name = "quarry", about = "Quarry -- inspect the client-side query cache")]
#[command(version)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or validate quarry configuration.
    Config(commands::config::ConfigArgs),
    /// Derive cache keys and read cached entries.
    Cache(commands::cache::CacheArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let _ = quarry_core::init_tracing(cli.verbose, cli.quiet, cli.log_json);

    let result = match cli.command {
        Commands::Config(args) => commands::config::execute(args),
        Commands::Cache(args) => commands::cache::execute(args),
    };

    match result {
        Ok(code) => quarry_cli::terminate(code),
        Err(err) => {
            eprintln!("quarry: error: {err:#}");
            quarry_cli::terminate(quarry_cli::ExitCode::EngineError)
        }
    }
}
