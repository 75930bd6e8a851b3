//! # portledger-common
//!
//! Shared port value types, wire formats, error definitions, configuration
//! and constants used across the portledger workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod error;
pub mod port;
pub mod wire;
