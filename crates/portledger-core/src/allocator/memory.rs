//! In-memory allocator for planning contexts.
//!
//! Holds proposed bindings for one planning pass and never touches disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use portledger_common::error::{PortLedgerError, Result};
use portledger_common::port::{Port, PortPairs, PortRange};

use super::{PortAllocator, lock};
use crate::reservation::{self, EdgeStore};

#[derive(Debug)]
struct Table {
    edges: BTreeMap<Port, PathBuf>,
    cursor: Port,
}

/// Allocator whose edges live in a map.
///
/// Allocation walks a cursor around the range, so a port released during
/// the pass is not handed straight back.
#[derive(Debug)]
pub struct MemoryAllocator {
    range: PortRange,
    table: Mutex<Table>,
}

impl MemoryAllocator {
    /// Creates an empty allocator over `range`.
    #[must_use]
    pub const fn new(range: PortRange) -> Self {
        Self {
            range,
            table: Mutex::new(Table {
                edges: BTreeMap::new(),
                cursor: range.min(),
            }),
        }
    }

    /// Owner recorded for `port`.
    #[must_use]
    pub fn owner(&self, port: Port) -> Option<PathBuf> {
        lock(&self.table).edges.get(&port).cloned()
    }

    /// Every bound port in ascending order.
    #[must_use]
    pub fn bound_ports(&self) -> Vec<Port> {
        lock(&self.table).edges.keys().copied().collect()
    }
}

impl EdgeStore for MemoryAllocator {
    fn edge_exists(&self, port: Port) -> Result<bool> {
        Ok(lock(&self.table).edges.contains_key(&port))
    }

    fn create_edge(&self, port: Port, owner: &Path) -> Result<()> {
        port.check()?;
        let mut table = lock(&self.table);
        if let Some(current) = table.edges.get(&port) {
            return Err(PortLedgerError::AlreadyBound {
                port,
                owner: current.display().to_string(),
            });
        }
        let _ = table.edges.insert(port, owner.to_path_buf());
        Ok(())
    }

    fn remove_edge(&self, port: Port) -> Result<()> {
        let _ = lock(&self.table).edges.remove(&port);
        Ok(())
    }

    fn release_edge(&self, port: Port) -> Result<()> {
        self.remove_edge(port)
    }
}

impl PortAllocator for MemoryAllocator {
    fn allocate(&self) -> Result<Port> {
        let mut table = lock(&self.table);
        for _ in 0..self.range.len() {
            let candidate = table.cursor;
            let next = Port::new(candidate.get() + 1);
            table.cursor = if self.range.contains(next) {
                next
            } else {
                self.range.min()
            };
            if !table.edges.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(PortLedgerError::Exhausted {
            min: self.range.min(),
            max: self.range.last(),
        })
    }

    fn reserve(
        &self,
        owner: &Path,
        requested: &PortPairs,
        existing: &PortPairs,
    ) -> Result<PortPairs> {
        reservation::reserve(
            self,
            self.range,
            || self.allocate(),
            owner,
            requested,
            existing,
        )
    }

    fn release(&self, ports: &PortPairs) -> Result<()> {
        reservation::release(self, ports)
    }
}
