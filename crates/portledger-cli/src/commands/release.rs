//! `pld release` — Release external ports.

use clap::Args;
use portledger_common::config::PortLedgerConfig;
use portledger_common::port::PortPairs;
use portledger_core::allocator::PortAllocator;

/// Arguments for the `release` command.
#[derive(Args, Debug)]
pub struct ReleaseArgs {
    /// Pairs to release, e.g. `8080:40000,22:40002`.
    #[arg(long)]
    pub ports: String,
}

/// Executes the `release` command.
///
/// Every listed external port is attempted; the last failure is returned.
///
/// # Errors
///
/// Returns an error if the pairs are malformed or a port cannot be
/// released.
pub fn execute(args: &ReleaseArgs, config: &PortLedgerConfig) -> anyhow::Result<()> {
    let ports = PortPairs::from_colon(&args.ports)?;
    let allocator = super::open_allocator(config)?;
    allocator.release(&ports)?;
    tracing::info!(count = ports.len(), "released ports");
    Ok(())
}
