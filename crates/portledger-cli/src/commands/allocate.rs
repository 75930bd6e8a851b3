//! `pld allocate` — Ask for one free port without reserving it.

use clap::Args;
use portledger_common::config::PortLedgerConfig;
use portledger_core::allocator::PortAllocator;

/// Arguments for the `allocate` command.
#[derive(Args, Debug)]
pub struct AllocateArgs {}

/// Executes the `allocate` command.
///
/// The port is free at the time of the call but nothing holds it; a
/// concurrent reservation may take it.
///
/// # Errors
///
/// Returns an error if the range is exhausted.
pub fn execute(_args: &AllocateArgs, config: &PortLedgerConfig) -> anyhow::Result<()> {
    let allocator = super::open_allocator(config)?;
    let port = allocator.allocate()?;
    allocator.shutdown();
    println!("{port}");
    Ok(())
}
