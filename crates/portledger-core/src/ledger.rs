//! On-disk port ownership ledger.
//!
//! Every bound external port is a symlink
//! `<base>/ports/interfaces/<device>/<port / 100>/<port>` whose target is
//! the owning unit's definition file. The link's existence is the
//! reservation; there is no other record. The layout is shared with other
//! tools and must stay bit-exact.

use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use portledger_common::constants::DEFAULT_DEVICE;
use portledger_common::error::{PortLedgerError, Result};
use portledger_common::port::Port;
use serde::Serialize;

use crate::reservation::EdgeStore;

/// Mode of the `ports/interfaces/<device>` directory.
const DEVICE_DIR_MODE: u32 = 0o750;
/// Mode of block directories created while binding.
const BLOCK_DIR_MODE: u32 = 0o770;

/// A single ledger edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Edge {
    /// Bound external port.
    pub port: Port,
    /// Link target naming the owner.
    pub owner: PathBuf,
    /// Whether the owner still exists on disk.
    pub owner_exists: bool,
}

/// Handle on the symlink ledger rooted at a base directory.
#[derive(Debug, Clone)]
pub struct Ledger {
    root: PathBuf,
}

impl Ledger {
    /// Points at the ledger under `base` without touching the filesystem.
    #[must_use]
    pub fn new(base: impl AsRef<Path>) -> Self {
        Self {
            root: base
                .as_ref()
                .join("ports")
                .join("interfaces")
                .join(DEFAULT_DEVICE),
        }
    }

    /// Opens the ledger under `base`, creating the device directory if
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(base: impl AsRef<Path>) -> Result<Self> {
        let ledger = Self::new(base);
        fs::DirBuilder::new()
            .recursive(true)
            .mode(DEVICE_DIR_MODE)
            .create(&ledger.root)
            .map_err(|e| PortLedgerError::io(&ledger.root, e))?;
        tracing::debug!(path = %ledger.root.display(), "opened port ledger");
        Ok(ledger)
    }

    /// Directory holding every block of this device.
    #[must_use]
    pub fn device_path(&self) -> &Path {
        &self.root
    }

    /// Directory holding the edges of one block.
    #[must_use]
    pub fn block_path(&self, block: u16) -> PathBuf {
        self.root.join(block.to_string())
    }

    /// Path of the edge for `port`.
    #[must_use]
    pub fn edge_path(&self, port: Port) -> PathBuf {
        self.block_path(port.block()).join(port.to_string())
    }

    /// Ports with an entry in the given block. A missing block directory
    /// means nothing is taken. Non-numeric names are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the block directory exists but cannot be read.
    pub fn taken_in_block(&self, block: u16) -> Result<BTreeSet<Port>> {
        let dir = self.block_path(block);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(PortLedgerError::io(dir, e)),
        };
        let mut taken = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| PortLedgerError::io(&dir, e))?;
            if let Some(port) = parse_port_name(&entry.file_name()) {
                let _ = taken.insert(port);
            }
        }
        Ok(taken)
    }

    /// Whether an edge exists for `port`. Dangling edges count.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge cannot be inspected.
    pub fn is_bound(&self, port: Port) -> Result<bool> {
        let path = self.edge_path(port);
        match fs::symlink_metadata(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PortLedgerError::io(path, e)),
        }
    }

    /// Owner recorded for `port`, or `None` when unbound.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge exists but cannot be read.
    pub fn owner(&self, port: Port) -> Result<Option<PathBuf>> {
        let path = self.edge_path(port);
        match fs::read_link(&path) {
            Ok(owner) => Ok(Some(owner)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PortLedgerError::io(path, e)),
        }
    }

    /// Creates the edge `port -> owner`.
    ///
    /// # Errors
    ///
    /// Returns [`PortLedgerError::AlreadyBound`] if another edge holds the
    /// port, [`PortLedgerError::InvalidPort`] for the sentinel `0`, or an
    /// I/O error.
    pub fn bind(&self, port: Port, owner: &Path) -> Result<()> {
        port.check()?;
        let block = self.block_path(port.block());
        fs::DirBuilder::new()
            .recursive(true)
            .mode(BLOCK_DIR_MODE)
            .create(&block)
            .map_err(|e| PortLedgerError::io(&block, e))?;

        let path = self.edge_path(port);
        match std::os::unix::fs::symlink(owner, &path) {
            Ok(()) => {
                tracing::info!(%port, owner = %owner.display(), "reserved port");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Err(PortLedgerError::AlreadyBound {
                port,
                owner: self
                    .owner(port)
                    .ok()
                    .flatten()
                    .map_or_else(|| "<unknown>".into(), |o| o.display().to_string()),
            }),
            Err(e) => Err(PortLedgerError::io(path, e)),
        }
    }

    /// Removes the edge for `port`. Removing an absent edge succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge exists but cannot be removed.
    pub fn unbind(&self, port: Port) -> Result<()> {
        let path = self.edge_path(port);
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(%port, "released port");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PortLedgerError::io(path, e)),
        }
    }

    /// Releases one port.
    ///
    /// An absent edge is already released. An edge whose owner is gone is
    /// removed as a repair. If the owner cannot be inspected the edge is
    /// left in place and the error returned.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge or its owner cannot be inspected, or
    /// the edge cannot be removed.
    pub fn release(&self, port: Port) -> Result<()> {
        if port.is_default() {
            return Ok(());
        }
        let path = self.edge_path(port);
        let owner = match fs::read_link(&path) {
            Ok(owner) => owner,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                tracing::warn!(%port, error = %e, "ledger edge cannot be checked");
                return Err(PortLedgerError::io(path, e));
            }
        };
        // `metadata` follows the link, so this resolves the owner exactly as
        // the filesystem does, relative targets included.
        match fs::metadata(&path) {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::warn!(%port, owner = %owner.display(), "owner is gone, removing dangling edge");
            }
            Err(e) => {
                tracing::warn!(%port, owner = %owner.display(), error = %e, "owner cannot be checked");
                return Err(PortLedgerError::io(owner, e));
            }
        }
        self.unbind(port)
    }

    /// Lists every edge, sorted by port.
    ///
    /// # Errors
    ///
    /// Returns an error if a ledger directory cannot be read.
    pub fn edges(&self) -> Result<Vec<Edge>> {
        let blocks = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PortLedgerError::io(&self.root, e)),
        };
        let mut edges = Vec::new();
        for block in blocks {
            let block = block.map_err(|e| PortLedgerError::io(&self.root, e))?;
            if parse_block_name(&block.file_name()).is_none() || !block.path().is_dir() {
                continue;
            }
            let dir = block.path();
            for entry in fs::read_dir(&dir).map_err(|e| PortLedgerError::io(&dir, e))? {
                let entry = entry.map_err(|e| PortLedgerError::io(&dir, e))?;
                let Some(port) = parse_port_name(&entry.file_name()) else {
                    continue;
                };
                let path = entry.path();
                match fs::read_link(&path) {
                    Ok(owner) => edges.push(Edge {
                        port,
                        owner,
                        owner_exists: fs::metadata(&path).is_ok(),
                    }),
                    Err(e) => {
                        tracing::debug!(path = %path.display(), error = %e, "skipping non-link ledger entry");
                    }
                }
            }
        }
        edges.sort_by_key(|e| e.port);
        Ok(edges)
    }

    /// Releases every edge whose owner no longer exists and returns the
    /// repaired ports. Edges that cannot be released are logged and left.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be listed.
    pub fn repair(&self) -> Result<Vec<Port>> {
        let mut repaired = Vec::new();
        for edge in self.edges()?.into_iter().filter(|e| !e.owner_exists) {
            match self.release(edge.port) {
                Ok(()) => repaired.push(edge.port),
                Err(err) => tracing::warn!(port = %edge.port, %err, "unable to repair edge"),
            }
        }
        Ok(repaired)
    }
}

impl EdgeStore for Ledger {
    fn edge_exists(&self, port: Port) -> Result<bool> {
        self.is_bound(port)
    }

    fn create_edge(&self, port: Port, owner: &Path) -> Result<()> {
        self.bind(port, owner)
    }

    fn remove_edge(&self, port: Port) -> Result<()> {
        self.unbind(port)
    }

    fn release_edge(&self, port: Port) -> Result<()> {
        self.release(port)
    }
}

/// Block `0` is valid: it holds ports 1 to 99.
fn parse_block_name(name: &std::ffi::OsStr) -> Option<u16> {
    name.to_str().and_then(|s| s.parse::<u16>().ok())
}

fn parse_port_name(name: &std::ffi::OsStr) -> Option<Port> {
    name.to_str()
        .and_then(|s| s.parse::<u16>().ok())
        .filter(|&p| p != 0)
        .map(Port::new)
}
