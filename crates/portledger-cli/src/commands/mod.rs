//! CLI command definitions and dispatch.

pub mod allocate;
pub mod ls;
pub mod release;
pub mod repair;
pub mod reserve;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use portledger_common::config::PortLedgerConfig;
use portledger_core::allocator::LedgerAllocator;
use portledger_core::ledger::Ledger;

/// pld — host port ledger.
#[derive(Parser, Debug)]
#[command(name = "pld", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Base directory holding the ledger.
    #[arg(long, global = true, env = "PORTLEDGER_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// JSON configuration file.
    #[arg(long, global = true, env = "PORTLEDGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// First port of the allocation range.
    #[arg(long, global = true)]
    pub min_port: Option<u16>,

    /// Exclusive end of the allocation range.
    #[arg(long, global = true)]
    pub max_port: Option<u16>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Reserve external ports for a unit.
    Reserve(reserve::ReserveArgs),
    /// Release external ports.
    Release(release::ReleaseArgs),
    /// List ledger edges.
    Ls(ls::LsArgs),
    /// Remove edges whose owner no longer exists.
    Repair(repair::RepairArgs),
    /// Ask for one free port without reserving it.
    Allocate(allocate::AllocateArgs),
}

impl Cli {
    /// Builds the effective configuration: the config file (or defaults),
    /// then command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be loaded or the
    /// resulting range is invalid.
    pub fn resolve_config(&self) -> anyhow::Result<PortLedgerConfig> {
        let mut config = match &self.config {
            Some(path) => PortLedgerConfig::load(path)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => PortLedgerConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir.clone_from(dir);
        }
        if let Some(min) = self.min_port {
            config.min_port = min;
        }
        if let Some(max) = self.max_port {
            config.max_port = max;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Opens the ledger-backed allocator described by `config`.
pub(crate) fn open_allocator(config: &PortLedgerConfig) -> anyhow::Result<LedgerAllocator> {
    let allocator = LedgerAllocator::open(&config.data_dir, config.port_range()?)
        .with_context(|| format!("opening ledger under {}", config.data_dir.display()))?;
    Ok(allocator)
}

/// Opens the ledger described by `config` without starting a worker.
pub(crate) fn open_ledger(config: &PortLedgerConfig) -> anyhow::Result<Ledger> {
    let ledger = Ledger::open(&config.data_dir)
        .with_context(|| format!("opening ledger under {}", config.data_dir.display()))?;
    Ok(ledger)
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = cli.resolve_config()?;
    tracing::debug!(
        data_dir = %config.data_dir.display(),
        min = config.min_port,
        max = config.max_port,
        "resolved configuration"
    );
    match cli.command {
        Command::Reserve(args) => reserve::execute(&args, &config),
        Command::Release(args) => release::execute(&args, &config),
        Command::Ls(args) => ls::execute(&args, &config),
        Command::Repair(args) => repair::execute(&args, &config),
        Command::Allocate(args) => allocate::execute(&args, &config),
    }
}
