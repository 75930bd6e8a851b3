//! Port allocator abstraction with ledger-backed and in-memory
//! implementations.

pub mod ledger;
pub mod memory;

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use portledger_common::error::Result;
use portledger_common::port::{Port, PortPairs};

pub use ledger::LedgerAllocator;
pub use memory::MemoryAllocator;

/// Hands out and records host ports for units.
///
/// Implementors share one contract: `allocate` never returns `0`,
/// `reserve` follows the five-pass reservation protocol, and `release`
/// attempts every port and reports the last failure.
pub trait PortAllocator: Send + Sync {
    /// Returns a port currently believed free, without recording it.
    ///
    /// # Errors
    ///
    /// Returns [`PortLedgerError::Exhausted`](portledger_common::error::PortLedgerError::Exhausted)
    /// if no port is free, or an error if the allocator has stopped.
    fn allocate(&self) -> Result<Port>;

    /// Binds external ports for every requested internal port on behalf of
    /// `owner`, reusing `existing` bindings where possible.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid, conflicts with
    /// `existing`, no port can be allocated, or an edge cannot be written.
    fn reserve(
        &self,
        owner: &Path,
        requested: &PortPairs,
        existing: &PortPairs,
    ) -> Result<PortPairs>;

    /// Releases the external ports of `ports`.
    ///
    /// # Errors
    ///
    /// Returns the last per-port failure.
    fn release(&self, ports: &PortPairs) -> Result<()>;
}

/// Locks a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
