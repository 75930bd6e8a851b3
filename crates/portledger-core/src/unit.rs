//! Port mappings recorded in unit definition files.
//!
//! A unit definition carries its bound ports as
//! `X-PortMapping=<internal>:<external>` lines. Reading them back gives the
//! `existing` bindings for the unit's next reservation.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::Path;

use portledger_common::constants::PORT_MAPPING_PREFIX;
use portledger_common::error::{PortLedgerError, Result};
use portledger_common::port::PortPairs;

/// Collects the pairs from every mapping line. Lines that fail to parse
/// are skipped.
///
/// # Errors
///
/// Returns an error if the reader fails.
pub fn read_port_mappings(reader: impl BufRead, source: &Path) -> Result<PortPairs> {
    let mut pairs = PortPairs::new();
    for line in reader.lines() {
        let line = line.map_err(|e| PortLedgerError::io(source, e))?;
        let Some(value) = line.strip_prefix(PORT_MAPPING_PREFIX) else {
            continue;
        };
        match PortPairs::from_colon(value) {
            Ok(found) => pairs.extend(found),
            Err(err) => {
                tracing::debug!(path = %source.display(), %err, "skipping malformed port mapping");
            }
        }
    }
    Ok(pairs)
}

/// Reads the port mappings of a unit definition. A missing file is a unit
/// that has never been reserved and yields no pairs.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn existing_ports(path: &Path) -> Result<PortPairs> {
    match File::open(path) {
        Ok(file) => read_port_mappings(BufReader::new(file), path),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(PortPairs::new()),
        Err(e) => Err(PortLedgerError::io(path, e)),
    }
}

/// Renders one mapping line per pair, each ending in a newline.
#[must_use]
pub fn render_port_mappings(pairs: &PortPairs) -> String {
    pairs
        .iter()
        .map(|p| format!("{PORT_MAPPING_PREFIX}{}:{}\n", p.internal, p.external))
        .collect()
}

#[cfg(test)]
mod tests {
    use portledger_common::port::PortPair;

    use super::*;

    const UNIT: &str = "\
[Unit]
Description=Container web-1

[Service]
ExecStart=/usr/bin/run-container web-1
X-PortMapping=8080:40000
X-PortMapping=9090:40001,22:40002
X-PortMapping=garbage
X-ContainerImage=example/web
";

    #[test]
    fn reads_every_mapping_line() {
        let pairs = read_port_mappings(UNIT.as_bytes(), Path::new("web-1.service")).expect("read");
        assert_eq!(
            pairs,
            PortPairs::from(vec![
                PortPair::new(8080, 40000),
                PortPair::new(9090, 40001),
                PortPair::new(22, 40002),
            ])
        );
    }

    #[test]
    fn missing_unit_has_no_ports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let pairs = existing_ports(&dir.path().join("absent.service")).expect("read");
        assert!(pairs.is_empty());
    }

    #[test]
    fn rendered_lines_read_back() {
        let pairs = PortPairs::from(vec![PortPair::new(8080, 40000), PortPair::new(22, 40002)]);
        let rendered = render_port_mappings(&pairs);
        assert_eq!(rendered, "X-PortMapping=8080:40000\nX-PortMapping=22:40002\n");

        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("unit.service");
        std::fs::write(&path, rendered).expect("write");
        assert_eq!(existing_ports(&path).expect("read"), pairs);
    }
}
