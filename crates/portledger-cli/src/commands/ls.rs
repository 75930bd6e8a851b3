//! `pld ls` — List ledger edges.

use clap::Args;
use portledger_common::config::PortLedgerConfig;

use crate::output;

/// Arguments for the `ls` command.
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Print edges as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ls` command.
///
/// # Errors
///
/// Returns an error if the ledger cannot be listed.
pub fn execute(args: &LsArgs, config: &PortLedgerConfig) -> anyhow::Result<()> {
    let edges = super::open_ledger(config)?.edges()?;

    if args.json {
        println!("{}", output::to_json(&edges)?);
        return Ok(());
    }
    if edges.is_empty() {
        println!("No ports reserved.");
        return Ok(());
    }
    print!("{}", output::format_edges(&edges));
    Ok(())
}
