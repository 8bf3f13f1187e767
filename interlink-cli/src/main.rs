#![forbid(unsafe_code)]

//! `interlink` command line: starts Epoch and Elixir consoles from an
//! operator menu and links them as peers.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use interlink_core::{HarnessConfig, ResourceAllocator};
use tracing_subscriber::EnvFilter;

mod menu;

#[derive(Debug, Parser)]
#[command(
    name = "interlink",
    version,
    about = "Launch Epoch and Elixir nodes and link them as peers"
)]
struct Cli {
    /// TOML configuration file (defaults plus INTERLINK_* environment otherwise)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Epoch checkout containing the rebar3 launcher
    #[arg(long)]
    epoch_build: Option<PathBuf>,
    /// Elixir project directory `iex -S mix` runs in
    #[arg(long)]
    elixir_build: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Interactive node menu (default)
    Menu,
    /// Config helpers
    Config {
        #[command(subcommand)]
        action: ConfigCmd,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCmd {
    /// Show the effective configuration as JSON
    Show,
    /// Write a TOML configuration template
    WriteTemplate {
        /// Destination path (default: ./interlink.toml)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite if the file exists
        #[arg(long)]
        force: bool,
    },
}

const TEMPLATE_HEADER: &str = "# interlink configuration (template)\n\
# Every key is optional; INTERLINK_* environment variables override the file.\n\n";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Config {
            action: ConfigCmd::WriteTemplate { path, force },
        }) => write_template(path.unwrap_or_else(|| PathBuf::from("interlink.toml")), force),
        Some(Commands::Config {
            action: ConfigCmd::Show,
        }) => {
            let cfg = resolve_config(&cli.config, &cli.epoch_build, &cli.elixir_build)?;
            println!("{}", serde_json::to_string_pretty(&cfg)?);
            Ok(())
        }
        Some(Commands::Menu) | None => {
            let cfg = resolve_config(&cli.config, &cli.epoch_build, &cli.elixir_build)?;
            init_tracing(&cfg.log_level);
            let alloc = ResourceAllocator::new(&cfg).context("preparing node resources")?;
            menu::run(cfg, alloc).await
        }
    }
}

/// Defaults or file, then environment, then command line.
fn resolve_config(
    path: &Option<PathBuf>,
    epoch_build: &Option<PathBuf>,
    elixir_build: &Option<PathBuf>,
) -> Result<HarnessConfig> {
    let mut cfg = match path {
        Some(p) => HarnessConfig::load_from_file(p)
            .with_context(|| format!("loading {}", p.display()))?,
        None => HarnessConfig::default(),
    };
    cfg.apply_env()?;
    if let Some(p) = epoch_build {
        cfg.epoch.build_path = p.clone();
    }
    if let Some(p) = elixir_build {
        cfg.elixir.build_path = p.clone();
    }
    cfg.validate()?;
    Ok(cfg)
}

fn write_template(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "refusing to overwrite existing file: {} (use --force)",
            path.display()
        );
    }
    let body = HarnessConfig::default().to_toml_string()?;
    std::fs::write(&path, format!("{TEMPLATE_HEADER}{body}"))
        .with_context(|| format!("writing {}", path.display()))?;
    eprintln!("wrote {}", path.display());
    Ok(())
}

/// Logs go to stderr so console pass-through on stdout stays readable.
fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
