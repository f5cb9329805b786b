//! The `config` CLI subcommand -- show and validate quarry configuration.

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;

use quarry_core::config;

use crate::ExitCode;

// ---------------------------------------------------------------------------
// ConfigArgs
// ---------------------------------------------------------------------------

/// Manage quarry configuration.
#[derive(Debug, clap::Args)]
pub struct ConfigArgs {
    /// Project directory whose `.quarry.yaml` overrides the home config.
    #[arg(long, default_value = ".")]
    pub dir: PathBuf,

    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config sub-subcommands.
#[derive(Debug, clap::Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration.
    Show,
    /// Validate the configuration files and environment.
    Validate,
}

// ---------------------------------------------------------------------------
// execute
// ---------------------------------------------------------------------------

/// Executes the `config` subcommand, printing to stdout.
pub fn execute(args: ConfigArgs) -> Result<ExitCode, anyhow::Error> {
    let stdout = std::io::stdout();
    run(args, &mut stdout.lock())
}

/// Executes the `config` subcommand, printing to `out`.
pub fn run(args: ConfigArgs, out: &mut impl Write) -> Result<ExitCode, anyhow::Error> {
    match args.action {
        ConfigAction::Show => execute_show(&args.dir, out),
        ConfigAction::Validate => execute_validate(&args.dir, out),
    }
}

/// Loads the effective configuration and prints it as YAML.
fn execute_show(dir: &std::path::Path, out: &mut impl Write) -> Result<ExitCode, anyhow::Error> {
    let cfg = config::load_config(Some(dir)).context("failed to load configuration")?;

    let yaml = serde_yml::to_string(&cfg).context("failed to serialize configuration to YAML")?;

    write!(out, "{yaml}")?;

    Ok(ExitCode::Ok)
}

/// Loads the configuration and reports whether it is valid.
fn execute_validate(
    dir: &std::path::Path,
    out: &mut impl Write,
) -> Result<ExitCode, anyhow::Error> {
    match config::load_config(Some(dir)) {
        Ok(_) => {
            writeln!(out, "Configuration is valid.")?;
            Ok(ExitCode::Ok)
        }
        Err(e) => {
            eprintln!("Configuration error: {e}");
            Ok(ExitCode::ConfigError)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
