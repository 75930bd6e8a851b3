//! Formatted output helpers for CLI commands.

use std::fmt::Write as _;

use portledger_core::ledger::Edge;
use serde::Serialize;

/// Renders ledger edges as an aligned table, one edge per line.
#[must_use]
pub fn format_edges(edges: &[Edge]) -> String {
    let mut out = format!("{:<8} {:<6} {}\n", "PORT", "LIVE", "OWNER");
    for edge in edges {
        let live = if edge.owner_exists { "yes" } else { "no" };
        let _ = writeln!(
            out,
            "{:<8} {:<6} {}",
            edge.port.to_string(),
            live,
            edge.owner.display()
        );
    }
    out
}

/// Serializes `value` as pretty-printed JSON.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn to_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
