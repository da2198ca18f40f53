//! Hostwatch - terminal multi-host monitoring dashboard.

use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hostwatch::core::PluginRegistry;
use hostwatch::probes::register_builtins;
use hostwatch::{tui, App};

/// Terminal multi-host monitoring dashboard
#[derive(Parser)]
#[command(name = "hostwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config directory (one TOML file per host)
    #[arg(short, long, global = true, env = "HOSTWATCH_CONFIG")]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the dashboard (default)
    Run,

    /// Validate the configuration and exit
    Check,

    /// List available probe types
    Probes,

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Commands::Run) => cmd_run(&cli),
        Some(Commands::Check) => cmd_check(&cli),
        Some(Commands::Probes) => {
            cmd_probes();
            Ok(())
        }
        Some(Commands::Completions { shell }) => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

/// Resolve the config directory: flag/env value (with `~` expansion) or the
/// platform config dir.
fn config_dir(cli: &Cli) -> Result<PathBuf> {
    if let Some(raw) = &cli.config {
        return Ok(PathBuf::from(shellexpand::tilde(raw).into_owned()));
    }
    let base = dirs::config_dir().context("no config directory on this platform")?;
    Ok(base.join("hostwatch"))
}

fn log_filter(verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    }
}

/// Route tracing output to a log file. The dashboard owns the terminal, so
/// diagnostics on stderr would tear the display.
fn init_file_logging(verbose: bool) -> Result<()> {
    let dir = dirs::cache_dir().context("no cache directory on this platform")?.join("hostwatch");
    std::fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join("hostwatch.log"))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_ansi(false).with_writer(Mutex::new(file)))
        .with(log_filter(verbose))
        .init();
    Ok(())
}

fn init_stderr_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(log_filter(verbose))
        .init();
}

fn cmd_run(cli: &Cli) -> Result<()> {
    init_file_logging(cli.verbose)?;

    let app = App::build(&config_dir(cli)?)?;
    app.start();
    let result = tui::run_tui(&app);
    app.stop();
    result
}

fn cmd_check(cli: &Cli) -> Result<()> {
    init_stderr_logging(cli.verbose);

    let dir = config_dir(cli)?;
    let app = App::build(&dir)?;
    println!(
        "config OK: {} probe instance(s) across {} host(s) in {}",
        app.probe_count(),
        app.aggregator().snapshot().hosts.len(),
        dir.display()
    );
    Ok(())
}

fn cmd_probes() {
    let mut registry = PluginRegistry::new();
    register_builtins(&mut registry);
    for name in registry.type_names() {
        println!("{name}");
    }
}

fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(shell, &mut cmd, name, &mut io::stdout());
}
