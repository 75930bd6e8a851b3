//! Port allocation and reservation engine backed by a symlink ledger.
//!
//! - [`ledger`]: the on-disk ownership records
//! - [`allocator`]: the [`PortAllocator`](allocator::PortAllocator) contract
//!   with ledger-backed and in-memory implementations
//! - [`reservation`]: the reserve and release protocol shared by both
//! - [`unit`]: port mappings stored in unit definition files

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod allocator;
pub mod ledger;
pub mod reservation;
pub mod unit;
