//! Allocator backed by the filesystem ledger.
//!
//! A single worker thread walks the configured range block by block,
//! re-reading each block directory on every pass, and offers every port
//! not present in the ledger through a zero-capacity channel. Each offer is
//! taken by exactly one caller, which is the only exclusion needed for
//! handing out port numbers. After [`MAX_EMPTY_PASSES`] consecutive passes
//! without a free port the worker offers `0`, which callers see as
//! [`PortLedgerError::Exhausted`].

use std::ops::ControlFlow;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use portledger_common::constants::{MAX_EMPTY_PASSES, PORTS_PER_BLOCK};
use portledger_common::error::{PortLedgerError, Result};
use portledger_common::port::{Port, PortPairs, PortRange};

use super::{PortAllocator, lock};
use crate::ledger::Ledger;
use crate::reservation;

/// Lifecycle of the scanning worker.
enum Worker {
    /// Not started yet; holds the sending half until it is.
    Idle(SyncSender<Port>),
    Running(JoinHandle<()>),
    /// Shut down for good.
    Stopped,
}

/// Port allocator for one range of one ledger.
///
/// The worker is started at most once, on the first [`start`](Self::start)
/// or allocation, and stops on [`shutdown`](Self::shutdown) or drop. A
/// stopped allocator cannot be restarted.
pub struct LedgerAllocator {
    ledger: Ledger,
    range: PortRange,
    worker: Mutex<Worker>,
    offers: Mutex<Option<Receiver<Port>>>,
    stop: Arc<AtomicBool>,
}

impl LedgerAllocator {
    /// Creates an allocator over `range` without starting its worker.
    #[must_use]
    pub fn new(ledger: Ledger, range: PortRange) -> Self {
        let (sender, receiver) = mpsc::sync_channel(0);
        Self {
            ledger,
            range,
            worker: Mutex::new(Worker::Idle(sender)),
            offers: Mutex::new(Some(receiver)),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Opens the ledger under `base` and creates an allocator over `range`.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger directory cannot be created.
    pub fn open(base: impl AsRef<Path>, range: PortRange) -> Result<Self> {
        Ok(Self::new(Ledger::open(base)?, range))
    }

    /// The ledger this allocator scans and writes.
    #[must_use]
    pub const fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// The allocation range.
    #[must_use]
    pub const fn range(&self) -> PortRange {
        self.range
    }

    /// Starts the worker. Returns `true` if this call started it and
    /// `false` if it was already running.
    ///
    /// # Errors
    ///
    /// Returns [`PortLedgerError::AllocatorStopped`] after shutdown, or an
    /// I/O error if the thread cannot be spawned (which also stops the
    /// allocator).
    pub fn start(&self) -> Result<bool> {
        let mut worker = lock(&self.worker);
        match std::mem::replace(&mut *worker, Worker::Stopped) {
            Worker::Idle(offers) => {
                let scanner = Scanner {
                    ledger: self.ledger.clone(),
                    range: self.range,
                    block: self.range.first_block(),
                    empty_passes: 0,
                    offers,
                    stop: Arc::clone(&self.stop),
                };
                let handle = thread::Builder::new()
                    .name("port-allocator".into())
                    .spawn(move || scanner.run())
                    .map_err(|e| PortLedgerError::io(self.ledger.device_path(), e))?;
                tracing::info!(
                    range = %self.range,
                    ledger = %self.ledger.device_path().display(),
                    "port allocator started"
                );
                *worker = Worker::Running(handle);
                Ok(true)
            }
            running @ Worker::Running(_) => {
                *worker = running;
                Ok(false)
            }
            Worker::Stopped => Err(PortLedgerError::AllocatorStopped),
        }
    }

    /// Whether the worker is currently running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(*lock(&self.worker), Worker::Running(_))
    }

    /// Stops the worker for good. Later allocations fail with
    /// [`PortLedgerError::AllocatorStopped`].
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Release);
        let previous = std::mem::replace(&mut *lock(&self.worker), Worker::Stopped);
        // Dropping the receiver unblocks a worker parked on an offer.
        drop(lock(&self.offers).take());
        if let Worker::Running(handle) = previous {
            if handle.join().is_err() {
                tracing::warn!("port allocator worker panicked");
            }
            tracing::info!(range = %self.range, "port allocator stopped");
        }
    }

    fn next_offer(&self) -> Result<Port> {
        let offers = lock(&self.offers);
        let receiver = offers.as_ref().ok_or(PortLedgerError::AllocatorStopped)?;
        receiver
            .recv()
            .map_err(|_| PortLedgerError::AllocatorStopped)
    }

    const fn exhausted(&self) -> PortLedgerError {
        PortLedgerError::Exhausted {
            min: self.range.min(),
            max: self.range.last(),
        }
    }
}

impl PortAllocator for LedgerAllocator {
    fn allocate(&self) -> Result<Port> {
        let _ = self.start()?;
        // An offer can go stale while it waits for a taker, so confirm the
        // ledger still has no edge for it.
        for _ in 0..=self.range.len() {
            let port = self.next_offer()?;
            if port.is_default() {
                tracing::warn!(range = %self.range, "port allocation failed, range exhausted");
                return Err(self.exhausted());
            }
            if self.ledger.is_bound(port)? {
                tracing::debug!(%port, "offered port was bound meanwhile, skipping");
                continue;
            }
            tracing::debug!(%port, "allocated port");
            return Ok(port);
        }
        Err(self.exhausted())
    }

    fn reserve(
        &self,
        owner: &Path,
        requested: &PortPairs,
        existing: &PortPairs,
    ) -> Result<PortPairs> {
        reservation::reserve(
            &self.ledger,
            self.range,
            || self.allocate(),
            owner,
            requested,
            existing,
        )
    }

    fn release(&self, ports: &PortPairs) -> Result<()> {
        reservation::release(&self.ledger, ports)
    }
}

impl Drop for LedgerAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for LedgerAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerAllocator")
            .field("ledger", &self.ledger)
            .field("range", &self.range)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// The worker's side: block cursor and empty-pass counter.
struct Scanner {
    ledger: Ledger,
    range: PortRange,
    block: u16,
    empty_passes: u32,
    offers: SyncSender<Port>,
    stop: Arc<AtomicBool>,
}

impl Scanner {
    fn run(mut self) {
        while !self.stop.load(Ordering::Acquire) {
            if self.scan_next_block().is_break() {
                break;
            }
        }
        tracing::debug!(range = %self.range, "port allocator worker exiting");
    }

    /// Offers every free port of the block under the cursor. Breaks once
    /// nobody can receive offers anymore.
    fn scan_next_block(&mut self) -> ControlFlow<()> {
        let (block, start, end) = self.advance();
        tracing::debug!(block, start, end, "scanning ledger block");

        let taken = match self.ledger.taken_in_block(block) {
            Ok(taken) => taken,
            Err(err) => {
                tracing::warn!(block, %err, "failed to read ledger block");
                return self.empty_pass();
            }
        };

        let mut offered = false;
        for port in (start..end).map(Port::new).filter(|p| !taken.contains(p)) {
            if self.offers.send(port).is_err() {
                return ControlFlow::Break(());
            }
            if !offered {
                offered = true;
                self.empty_passes = 0;
            }
        }

        if offered {
            ControlFlow::Continue(())
        } else {
            tracing::debug!(start, end, "no free port in block");
            self.empty_passes += 1;
            self.report_if_exhausted()
        }
    }

    fn empty_pass(&mut self) -> ControlFlow<()> {
        self.empty_passes += 1;
        self.report_if_exhausted()
    }

    fn report_if_exhausted(&self) -> ControlFlow<()> {
        if self.empty_passes >= MAX_EMPTY_PASSES {
            tracing::warn!(
                range = %self.range,
                passes = self.empty_passes,
                "no free ports found, signalling exhaustion"
            );
            if self.offers.send(Port::UNASSIGNED).is_err() {
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    /// Returns the block under the cursor with its port bounds clamped to
    /// the range, and moves the cursor on, wrapping after the block that
    /// reaches `max`.
    #[allow(clippy::cast_possible_truncation)]
    fn advance(&mut self) -> (u16, u16, u16) {
        let block = self.block;
        let per_block = u32::from(PORTS_PER_BLOCK);
        let min = u32::from(self.range.min().get());
        let max = u32::from(self.range.max().get());

        let block_start = u32::from(block) * per_block;
        let block_end = block_start + per_block;
        let start = block_start.max(min);
        let end = block_end.min(max);

        self.block = if block_end >= max {
            self.range.first_block()
        } else {
            block + 1
        };
        (block, start as u16, end as u16)
    }
}
