//! `pld repair` — Remove edges whose owner no longer exists.

use clap::Args;
use portledger_common::config::PortLedgerConfig;

/// Arguments for the `repair` command.
#[derive(Args, Debug)]
pub struct RepairArgs {}

/// Executes the `repair` command, printing each repaired port.
///
/// # Errors
///
/// Returns an error if the ledger cannot be listed.
pub fn execute(_args: &RepairArgs, config: &PortLedgerConfig) -> anyhow::Result<()> {
    let repaired = super::open_ledger(config)?.repair()?;
    for port in &repaired {
        println!("{port}");
    }
    tracing::info!(count = repaired.len(), "ledger repaired");
    Ok(())
}
