//! Port value types: single ports, host endpoints, internal/external pairs
//! and allocation ranges.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::PORTS_PER_BLOCK;
use crate::error::{PortLedgerError, Result};

/// An IP port number. `0` means "unassigned" and is never bound.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Port(u16);

impl Port {
    /// The unassigned sentinel.
    pub const UNASSIGNED: Self = Self(0);

    /// Wraps a raw port number.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Returns the raw port number.
    #[must_use]
    pub const fn get(self) -> u16 {
        self.0
    }

    /// Whether this is the unassigned sentinel.
    #[must_use]
    pub const fn is_default(self) -> bool {
        self.0 == 0
    }

    /// Verifies the port can be bound (`1..=65535`).
    ///
    /// # Errors
    ///
    /// Returns [`PortLedgerError::InvalidPort`] for the sentinel `0`.
    pub fn check(self) -> Result<()> {
        if self.is_default() {
            return Err(PortLedgerError::InvalidPort {
                value: self.to_string(),
                reason: "port must be between 1 and 65535",
            });
        }
        Ok(())
    }

    /// Index of the ledger block directory holding this port.
    #[must_use]
    pub const fn block(self) -> u16 {
        self.0 / PORTS_PER_BLOCK
    }
}

impl From<u16> for Port {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl FromStr for Port {
    type Err = PortLedgerError;

    /// Parses a decimal port in `0..=65535`, ignoring surrounding whitespace.
    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let value: i64 = trimmed.parse().map_err(|_| PortLedgerError::InvalidPort {
            value: s.to_string(),
            reason: "not a number",
        })?;
        u16::try_from(value)
            .map(Self)
            .map_err(|_| PortLedgerError::InvalidPort {
                value: s.to_string(),
                reason: "port values must be between 0 and 65535",
            })
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A host and port combination. The host may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HostPort {
    /// Host name or IP literal.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub host: String,
    /// Port on that host.
    #[serde(default, skip_serializing_if = "is_unassigned")]
    pub port: Port,
}

impl HostPort {
    /// Creates an endpoint from its parts.
    #[must_use]
    pub fn new(host: impl Into<String>, port: Port) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Whether no port has been assigned.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.port.is_default()
    }

    /// Whether the endpoint refers to the local host.
    #[must_use]
    pub fn is_local(&self) -> bool {
        self.host.is_empty()
            || self.host == "localhost"
            || self
                .host
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }
}

impl FromStr for HostPort {
    type Err = PortLedgerError;

    /// Parses `host:port`, with IPv6 hosts in brackets (`[::1]:80`).
    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &'static str| PortLedgerError::InvalidPort {
            value: s.to_string(),
            reason,
        };
        let (host, port) = if let Some(rest) = s.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("missing ']'"))?;
            let port = tail
                .strip_prefix(':')
                .ok_or_else(|| invalid("missing port"))?;
            (host, port)
        } else {
            let (host, port) = s.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
            if host.contains(':') {
                return Err(invalid("too many colons in address"));
            }
            (host, port)
        };
        Ok(Self {
            host: host.to_string(),
            port: port.parse()?,
        })
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_unassigned(port: &Port) -> bool {
    port.is_default()
}

/// An internal container port and the host port bound to it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PortPair {
    /// Port exposed by the container image.
    pub internal: Port,
    /// Host port, `0` until one is assigned.
    #[serde(default, skip_serializing_if = "is_unassigned")]
    pub external: Port,
}

impl PortPair {
    /// Creates a pair from raw port numbers.
    #[must_use]
    pub const fn new(internal: u16, external: u16) -> Self {
        Self {
            internal: Port::new(internal),
            external: Port::new(external),
        }
    }
}

/// An ordered list of port pairs, unique by internal port within a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortPairs(Vec<PortPair>);

impl PortPairs {
    /// Creates an empty list.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Appends a pair.
    pub fn push(&mut self, pair: PortPair) {
        self.0.push(pair);
    }

    /// Number of pairs.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the list holds no pairs.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates the pairs in order.
    pub fn iter(&self) -> std::slice::Iter<'_, PortPair> {
        self.0.iter()
    }

    /// Borrows the pairs as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[PortPair] {
        &self.0
    }

    /// Returns the pair bound to an internal port.
    #[must_use]
    pub fn find(&self, internal: Port) -> Option<&PortPair> {
        self.0.iter().find(|p| p.internal == internal)
    }

    /// Renders container runtime publish flags, external port first
    /// (`-p 40000:8080 -p 40001:9090`).
    #[must_use]
    pub fn to_publish_args(&self) -> String {
        self.0
            .iter()
            .map(|p| format!("-p {}:{}", p.external, p.internal))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl fmt::Display for PortPairs {
    /// Human form: `8080 -> 40000, 9090 -> 40001`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pair) in self.0.iter().enumerate() {
            if i != 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} -> {}", pair.internal, pair.external)?;
        }
        Ok(())
    }
}

impl From<Vec<PortPair>> for PortPairs {
    fn from(pairs: Vec<PortPair>) -> Self {
        Self(pairs)
    }
}

impl FromIterator<PortPair> for PortPairs {
    fn from_iter<I: IntoIterator<Item = PortPair>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Extend<PortPair> for PortPairs {
    fn extend<I: IntoIterator<Item = PortPair>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl IntoIterator for PortPairs {
    type Item = PortPair;
    type IntoIter = std::vec::IntoIter<PortPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PortPairs {
    type Item = &'a PortPair;
    type IntoIter = std::slice::Iter<'a, PortPair>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// A half-open range of allocatable host ports, `[min, max)`.
///
/// `max` is a `u16`, so the highest allocatable port is `65534`. Port
/// `65535` can still be pinned by a request; it is just never handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    min: Port,
    max: Port,
}

impl PortRange {
    /// Creates a range covering `min..max`.
    ///
    /// # Errors
    ///
    /// Returns [`PortLedgerError::Config`] if `min` is `0` or the range is
    /// empty.
    pub fn new(min: u16, max: u16) -> Result<Self> {
        if min == 0 {
            return Err(PortLedgerError::Config {
                message: "port range must start at 1 or above".into(),
            });
        }
        if min >= max {
            return Err(PortLedgerError::Config {
                message: format!("port range {min}..{max} is empty"),
            });
        }
        Ok(Self {
            min: Port::new(min),
            max: Port::new(max),
        })
    }

    /// First port of the range.
    #[must_use]
    pub const fn min(&self) -> Port {
        self.min
    }

    /// Exclusive upper bound.
    #[must_use]
    pub const fn max(&self) -> Port {
        self.max
    }

    /// Last port of the range.
    #[must_use]
    pub const fn last(&self) -> Port {
        Port::new(self.max.get() - 1)
    }

    /// Number of ports in the range.
    #[must_use]
    pub const fn len(&self) -> usize {
        (self.max.get() - self.min.get()) as usize
    }

    /// Whether the range holds no ports. Always false once constructed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `port` lies in `[min, max)`.
    #[must_use]
    pub fn contains(&self, port: Port) -> bool {
        self.min <= port && port < self.max
    }

    /// Index of the block holding `min`.
    #[must_use]
    pub const fn first_block(&self) -> u16 {
        self.min.block()
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.last())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_port_accepts_full_range() {
        assert_eq!("0".parse::<Port>().expect("zero"), Port::UNASSIGNED);
        assert_eq!("65535".parse::<Port>().expect("max"), Port::new(65535));
        assert_eq!(" 8080 ".parse::<Port>().expect("trimmed"), Port::new(8080));
    }

    #[test]
    fn parse_port_rejects_out_of_range_and_garbage() {
        assert!("65536".parse::<Port>().is_err());
        assert!("-1".parse::<Port>().is_err());
        assert!("http".parse::<Port>().is_err());
        assert!("".parse::<Port>().is_err());
    }

    #[test]
    fn check_rejects_only_the_sentinel() {
        assert!(Port::UNASSIGNED.check().is_err());
        assert!(Port::new(1).check().is_ok());
        assert!(Port::new(65535).check().is_ok());
        assert!(Port::UNASSIGNED.is_default());
        assert!(!Port::new(80).is_default());
    }

    #[test]
    fn block_index_divides_by_hundred() {
        assert_eq!(Port::new(40000).block(), 400);
        assert_eq!(Port::new(40099).block(), 400);
        assert_eq!(Port::new(40100).block(), 401);
        assert_eq!(Port::new(99).block(), 0);
    }

    #[test]
    fn host_port_parses_ipv4_and_ipv6() {
        let hp: HostPort = "127.0.0.1:8080".parse().expect("v4");
        assert_eq!(hp.host, "127.0.0.1");
        assert_eq!(hp.port, Port::new(8080));
        assert!(hp.is_local());

        let hp: HostPort = "[::1]:9090".parse().expect("v6");
        assert_eq!(hp.host, "::1");
        assert!(hp.is_local());
        assert_eq!(hp.to_string(), "[::1]:9090");
    }

    #[test]
    fn host_port_rejects_bare_ipv6_and_missing_port() {
        assert!("::1:80".parse::<HostPort>().is_err());
        assert!("example.com".parse::<HostPort>().is_err());
        assert!("example.com:99999".parse::<HostPort>().is_err());
    }

    #[test]
    fn host_port_local_and_empty() {
        assert!(HostPort::new("", Port::new(80)).is_local());
        assert!(HostPort::new("localhost", Port::new(80)).is_local());
        assert!(!HostPort::new("192.168.1.1", Port::new(80)).is_local());
        assert!(HostPort::default().is_empty());
        assert_eq!(HostPort::new("", Port::new(80)).to_string(), ":80");
    }

    #[test]
    fn port_pair_json_omits_unassigned_external() {
        let json = serde_json::to_string(&PortPair::new(8080, 0)).expect("serialize");
        assert_eq!(json, r#"{"Internal":8080}"#);
        let json = serde_json::to_string(&PortPair::new(8080, 40000)).expect("serialize");
        assert_eq!(json, r#"{"Internal":8080,"External":40000}"#);
        let back: PortPair = serde_json::from_str(r#"{"Internal":22}"#).expect("deserialize");
        assert_eq!(back, PortPair::new(22, 0));
    }

    #[test]
    fn port_pairs_display_and_publish_args() {
        let pairs = PortPairs::from(vec![PortPair::new(8080, 40000), PortPair::new(9090, 40001)]);
        assert_eq!(pairs.to_string(), "8080 -> 40000, 9090 -> 40001");
        assert_eq!(pairs.to_publish_args(), "-p 40000:8080 -p 40001:9090");
        assert_eq!(pairs.find(Port::new(9090)), Some(&PortPair::new(9090, 40001)));
        assert!(pairs.find(Port::new(22)).is_none());
    }

    #[test]
    fn port_range_validation() {
        assert!(PortRange::new(0, 10).is_err());
        assert!(PortRange::new(10, 10).is_err());
        let range = PortRange::new(40000, 40010).expect("range");
        assert_eq!(range.len(), 10);
        assert!(range.contains(Port::new(40000)));
        assert!(range.contains(Port::new(40009)));
        assert!(!range.contains(Port::new(40010)));
        assert_eq!(range.first_block(), 400);
        assert_eq!(range.to_string(), "40000-40009");
    }

    #[test]
    fn port_range_tops_out_below_65535() {
        let range = PortRange::new(65000, u16::MAX).expect("range");
        assert_eq!(range.last(), Port::new(65534));
        assert!(range.contains(Port::new(65534)));
        assert!(!range.contains(Port::new(65535)));
    }
}
