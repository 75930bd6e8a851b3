//! Global configuration model for the port ledger.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MAX_PORT, DEFAULT_MIN_PORT};
use crate::error::{PortLedgerError, Result};
use crate::port::PortRange;

/// Root configuration for the port ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortLedgerConfig {
    /// Base directory under which `ports/interfaces` lives.
    pub data_dir: PathBuf,
    /// First port the allocator may hand out.
    pub min_port: u16,
    /// Exclusive upper bound of the allocation range.
    pub max_port: u16,
}

impl Default for PortLedgerConfig {
    fn default() -> Self {
        Self {
            data_dir: crate::constants::data_dir().clone(),
            min_port: DEFAULT_MIN_PORT,
            max_port: DEFAULT_MAX_PORT,
        }
    }
}

impl PortLedgerConfig {
    /// Loads a configuration from a JSON file. Missing fields keep their
    /// defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, is not valid JSON, or
    /// describes an invalid range.
    pub fn load(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).map_err(|e| PortLedgerError::io(path, e))?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that the configured range is usable.
    ///
    /// # Errors
    ///
    /// Returns [`PortLedgerError::Config`] if the range is empty or starts
    /// at `0`.
    pub fn validate(&self) -> Result<()> {
        let _ = self.port_range()?;
        Ok(())
    }

    /// Returns the allocation range `[min_port, max_port)`.
    ///
    /// # Errors
    ///
    /// Returns [`PortLedgerError::Config`] if the range is invalid.
    pub fn port_range(&self) -> Result<PortRange> {
        PortRange::new(self.min_port, self.max_port)
    }
}
