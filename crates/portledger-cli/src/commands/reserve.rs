//! `pld reserve` — Reserve external ports for a unit.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use portledger_common::config::PortLedgerConfig;
use portledger_common::port::PortPairs;
use portledger_core::allocator::PortAllocator;
use portledger_core::unit;

use crate::output;

/// Arguments for the `reserve` command.
#[derive(Args, Debug)]
pub struct ReserveArgs {
    /// Unit definition file that will own the ports.
    #[arg(long)]
    pub owner: PathBuf,

    /// Requested pairs, e.g. `8080:0,22:40022` (`0` lets the ledger pick).
    #[arg(long)]
    pub ports: String,

    /// Pairs bound by the unit's previous reservation.
    #[arg(long)]
    pub existing: Option<String>,

    /// Read previous bindings from a unit definition's mapping lines.
    #[arg(long)]
    pub existing_from: Option<PathBuf>,

    /// Print the reserved pairs as JSON.
    #[arg(long)]
    pub json: bool,
}

impl ReserveArgs {
    fn existing_pairs(&self) -> anyhow::Result<PortPairs> {
        let mut existing = match &self.existing {
            Some(text) => PortPairs::from_colon(text)?,
            None => PortPairs::new(),
        };
        if let Some(path) = &self.existing_from {
            existing.extend(
                unit::existing_ports(path)
                    .with_context(|| format!("reading mappings from {}", path.display()))?,
            );
        }
        Ok(existing)
    }
}

/// Executes the `reserve` command.
///
/// # Errors
///
/// Returns an error if the pairs are malformed or the reservation fails.
pub fn execute(args: &ReserveArgs, config: &PortLedgerConfig) -> anyhow::Result<()> {
    let requested = PortPairs::from_colon(&args.ports)?;
    let existing = args.existing_pairs()?;

    let allocator = super::open_allocator(config)?;
    let reserved = allocator.reserve(&args.owner, &requested, &existing)?;
    allocator.shutdown();

    if args.json {
        println!("{}", output::to_json(&reserved)?);
    } else {
        println!("{}", reserved.to_colon());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use portledger_common::port::PortPair;

    use super::*;

    #[test]
    fn existing_merges_flag_and_unit_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let unit_file = dir.path().join("web.service");
        std::fs::write(&unit_file, "X-PortMapping=22:40002\n").expect("write");

        let args = ReserveArgs {
            owner: unit_file.clone(),
            ports: "8080:0,22:0".into(),
            existing: Some("8080:40000".into()),
            existing_from: Some(unit_file),
            json: false,
        };
        assert_eq!(
            args.existing_pairs().expect("existing"),
            PortPairs::from(vec![PortPair::new(8080, 40000), PortPair::new(22, 40002)])
        );
    }

    #[test]
    fn reserve_writes_edge_under_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PortLedgerConfig {
            data_dir: dir.path().to_path_buf(),
            min_port: 40000,
            max_port: 40010,
        };
        let args = ReserveArgs {
            owner: PathBuf::from("/u1"),
            ports: "8080:0".into(),
            existing: None,
            existing_from: None,
            json: true,
        };
        execute(&args, &config).expect("reserve");
        let link = dir.path().join("ports/interfaces/1/400/40000");
        assert_eq!(std::fs::read_link(link).expect("link"), PathBuf::from("/u1"));
    }
}
