//! Reservation protocol turning requested internal ports into bound
//! external ports.
//!
//! A reservation runs five passes over one record per requested internal
//! port:
//!
//! 1. initialize records from the request
//! 2. reuse the unit's previous bindings where they still match, queueing
//!    stale ones for release, then drop any reuse whose edge has vanished
//! 3. allocate a fresh external port for every record still unassigned
//! 4. persist an edge for every record not already on disk, rolling back
//!    this call's edges if one fails
//! 5. release the stale bindings, logging failures instead of returning them
//!
//! The same protocol runs against the filesystem ledger and the in-memory
//! planning store through [`EdgeStore`].

use std::collections::HashSet;
use std::path::Path;

use portledger_common::error::{PortLedgerError, Result};
use portledger_common::port::{Port, PortPair, PortPairs, PortRange};

/// Storage for port ownership edges.
pub trait EdgeStore {
    /// Whether an edge exists for `port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be inspected.
    fn edge_exists(&self, port: Port) -> Result<bool>;

    /// Creates the edge `port -> owner`, failing if one already exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge exists or cannot be written.
    fn create_edge(&self, port: Port, owner: &Path) -> Result<()>;

    /// Removes the edge for `port` unconditionally.
    ///
    /// # Errors
    ///
    /// Returns an error if the edge cannot be removed.
    fn remove_edge(&self, port: Port) -> Result<()>;

    /// Releases `port` with release semantics (absent edges are already
    /// released, edges of vanished owners are repaired).
    ///
    /// # Errors
    ///
    /// Returns an error if the edge cannot be inspected or removed.
    fn release_edge(&self, port: Port) -> Result<()>;
}

/// Per-port state for the duration of one reservation.
#[derive(Debug, Clone, Copy)]
struct Record {
    pair: PortPair,
    /// The caller asked for a specific external port.
    pinned: bool,
    /// An edge for `pair.external` is already on disk.
    satisfied: bool,
    /// `pair.external` came from the allocator during this call.
    fresh: bool,
    /// This call wrote the edge and must remove it on rollback.
    written: bool,
}

impl Record {
    fn new(pair: PortPair) -> Self {
        Self {
            pair,
            pinned: !pair.external.is_default(),
            satisfied: false,
            fresh: false,
            written: false,
        }
    }
}

/// Reserves external ports for `owner`.
///
/// `existing` is what the owner was bound to by its previous reservation.
/// `allocate` supplies fresh ports from `range` and must fail rather than
/// return `0`. Offers already held by another record of this call are
/// skipped.
///
/// # Errors
///
/// - [`PortLedgerError::Validation`] if `requested` has an unbound or
///   repeated internal port
/// - [`PortLedgerError::Conflict`] if `existing` binds one internal port to
///   two external ports; nothing is changed
/// - [`PortLedgerError::Exhausted`] if `range` cannot supply enough
///   distinct ports, or whatever else `allocate` returns; nothing is
///   changed
/// - the store's error if an edge cannot be written; edges written by this
///   call are removed first
pub fn reserve<S, A>(
    store: &S,
    range: PortRange,
    mut allocate: A,
    owner: &Path,
    requested: &PortPairs,
    existing: &PortPairs,
) -> Result<PortPairs>
where
    S: EdgeStore + ?Sized,
    A: FnMut() -> Result<Port>,
{
    validate_request(requested)?;
    let mut records: Vec<Record> = requested.iter().copied().map(Record::new).collect();

    let stale = reuse(&mut records, existing)?;
    drop_vanished(store, &mut records)?;

    let mut claimed: HashSet<Port> = records
        .iter()
        .map(|r| r.pair.external)
        .filter(|p| !p.is_default())
        .collect();
    for record in records.iter_mut().filter(|r| r.pair.external.is_default()) {
        let port = allocate_unclaimed(&mut allocate, range, &claimed)?;
        let _ = claimed.insert(port);
        record.pair.external = port;
        record.fresh = true;
    }

    persist(store, &mut records, owner)?;

    if !stale.is_empty() {
        tracing::info!(ports = %stale, "releasing stale port bindings");
    }
    for pair in &stale {
        if let Err(err) = store.release_edge(pair.external) {
            tracing::warn!(port = %pair.external, %err, "unable to release stale binding");
        }
    }

    let reserved: PortPairs = records.iter().map(|r| r.pair).collect();
    tracing::debug!(
        owner = %owner.display(),
        ports = %reserved,
        fresh = records.iter().filter(|r| r.fresh).count(),
        "reservation complete"
    );
    Ok(reserved)
}

/// Releases every external port in `ports`.
///
/// Each port is attempted independently; the last failure is returned.
///
/// # Errors
///
/// Returns the last error reported by the store.
pub fn release<S>(store: &S, ports: &PortPairs) -> Result<()>
where
    S: EdgeStore + ?Sized,
{
    let mut last = None;
    for pair in ports.iter().filter(|p| !p.external.is_default()) {
        if let Err(err) = store.release_edge(pair.external) {
            tracing::warn!(port = %pair.external, %err, "unable to release port");
            last = Some(err);
        }
    }
    last.map_or(Ok(()), Err)
}

/// Takes offers until one is not already held by this reservation. A full
/// lap of the range without such an offer means the range cannot satisfy
/// the request.
fn allocate_unclaimed<A>(
    allocate: &mut A,
    range: PortRange,
    claimed: &HashSet<Port>,
) -> Result<Port>
where
    A: FnMut() -> Result<Port>,
{
    for _ in 0..=range.len() {
        let port = allocate()?;
        if port.is_default() {
            return Err(PortLedgerError::Validation {
                message: "allocator returned the unassigned port".into(),
            });
        }
        if !claimed.contains(&port) {
            return Ok(port);
        }
        tracing::debug!(%port, "offered port is already held by this reservation, skipping");
    }
    Err(PortLedgerError::Exhausted {
        min: range.min(),
        max: range.last(),
    })
}

fn validate_request(requested: &PortPairs) -> Result<()> {
    let mut seen = HashSet::new();
    for pair in requested {
        pair.internal.check()?;
        if !seen.insert(pair.internal) {
            return Err(PortLedgerError::Validation {
                message: format!("internal port {} is requested more than once", pair.internal),
            });
        }
    }
    Ok(())
}

/// Matches previous bindings against the records and returns the bindings
/// that are no longer wanted.
///
/// A binding that matches an already satisfied record with a different
/// external port is a conflict: the first binding seen is the one reported
/// as kept, and the whole reservation is refused. An exact duplicate of the
/// satisfying binding is ignored.
fn reuse(records: &mut [Record], existing: &PortPairs) -> Result<PortPairs> {
    let mut stale = PortPairs::new();
    for ex in existing.iter().filter(|p| !p.external.is_default()) {
        let Some(record) = records.iter_mut().find(|r| r.pair.internal == ex.internal) else {
            stale.push(*ex);
            continue;
        };
        if record.satisfied {
            if record.pair.external == ex.external {
                continue;
            }
            return Err(PortLedgerError::Conflict {
                internal: ex.internal,
                first: record.pair.external,
                second: ex.external,
            });
        }
        if !record.pinned {
            record.pair.external = ex.external;
            record.satisfied = true;
        } else if record.pair.external == ex.external {
            record.satisfied = true;
        } else {
            stale.push(PortPair {
                internal: Port::UNASSIGNED,
                external: ex.external,
            });
        }
    }
    Ok(stale)
}

/// Un-satisfies records whose edge was removed behind our back. Adopted
/// ports are re-allocated; pinned ports are persisted again.
fn drop_vanished<S>(store: &S, records: &mut [Record]) -> Result<()>
where
    S: EdgeStore + ?Sized,
{
    for record in records.iter_mut().filter(|r| r.satisfied) {
        if store.edge_exists(record.pair.external)? {
            continue;
        }
        tracing::warn!(
            internal = %record.pair.internal,
            external = %record.pair.external,
            "previously reserved port is missing from the ledger"
        );
        record.satisfied = false;
        if !record.pinned {
            record.pair.external = Port::UNASSIGNED;
        }
    }
    Ok(())
}

fn persist<S>(store: &S, records: &mut [Record], owner: &Path) -> Result<()>
where
    S: EdgeStore + ?Sized,
{
    let mut failure = None;
    for record in records.iter_mut().filter(|r| !r.satisfied) {
        match store.create_edge(record.pair.external, owner) {
            Ok(()) => record.written = true,
            Err(err) => {
                tracing::warn!(port = %record.pair.external, %err, "failed to reserve port, rolling back");
                failure = Some(err);
                break;
            }
        }
    }
    let Some(err) = failure else {
        return Ok(());
    };
    for record in records.iter_mut().filter(|r| r.written) {
        match store.remove_edge(record.pair.external) {
            Ok(()) => record.written = false,
            Err(rollback) => {
                tracing::warn!(port = %record.pair.external, err = %rollback, "unable to roll back reservation");
            }
        }
    }
    Err(err)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;

    /// Store that records calls and can be told to fail specific creates.
    #[derive(Default)]
    struct FakeStore {
        edges: RefCell<BTreeMap<Port, PathBuf>>,
        fail_create: Option<Port>,
        released: RefCell<Vec<Port>>,
    }

    impl FakeStore {
        fn with_edges(ports: &[u16]) -> Self {
            let store = Self::default();
            for &p in ports {
                let _ = store
                    .edges
                    .borrow_mut()
                    .insert(Port::new(p), PathBuf::from("/old"));
            }
            store
        }

        fn ports(&self) -> Vec<u16> {
            self.edges.borrow().keys().map(|p| p.get()).collect()
        }
    }

    impl EdgeStore for FakeStore {
        fn edge_exists(&self, port: Port) -> Result<bool> {
            Ok(self.edges.borrow().contains_key(&port))
        }

        fn create_edge(&self, port: Port, owner: &Path) -> Result<()> {
            if self.fail_create == Some(port) || self.edges.borrow().contains_key(&port) {
                return Err(PortLedgerError::AlreadyBound {
                    port,
                    owner: "/other".into(),
                });
            }
            let _ = self.edges.borrow_mut().insert(port, owner.to_path_buf());
            Ok(())
        }

        fn remove_edge(&self, port: Port) -> Result<()> {
            let _ = self.edges.borrow_mut().remove(&port);
            Ok(())
        }

        fn release_edge(&self, port: Port) -> Result<()> {
            self.released.borrow_mut().push(port);
            self.remove_edge(port)
        }
    }

    fn counter(start: u16) -> impl FnMut() -> Result<Port> {
        let mut next = start;
        move || {
            let port = Port::new(next);
            next += 1;
            Ok(port)
        }
    }

    fn pairs(list: &[(u16, u16)]) -> PortPairs {
        list.iter().map(|&(i, e)| PortPair::new(i, e)).collect()
    }

    fn span() -> PortRange {
        PortRange::new(40000, 40200).expect("range")
    }

    /// Hands out `ports` in order, forever.
    fn cycle(ports: &[u16]) -> impl FnMut() -> Result<Port> + '_ {
        let mut offers = ports.iter().copied().cycle();
        move || Ok(Port::new(offers.next().unwrap_or_default()))
    }

    #[test]
    fn fresh_request_allocates_and_persists() {
        let store = FakeStore::default();
        let result = reserve(
            &store,
            span(),
            counter(40000),
            Path::new("/u1"),
            &pairs(&[(8080, 0), (9090, 0)]),
            &PortPairs::new(),
        )
        .expect("reserve");
        assert_eq!(result, pairs(&[(8080, 40000), (9090, 40001)]));
        assert_eq!(store.ports(), vec![40000, 40001]);
    }

    #[test]
    fn existing_binding_is_adopted_without_allocation() {
        let store = FakeStore::with_edges(&[40005]);
        let result = reserve(
            &store,
            span(),
            || panic!("must not allocate"),
            Path::new("/u1"),
            &pairs(&[(8080, 0)]),
            &pairs(&[(8080, 40005)]),
        )
        .expect("reserve");
        assert_eq!(result, pairs(&[(8080, 40005)]));
        assert!(store.released.borrow().is_empty());
    }

    #[test]
    fn pinned_change_releases_old_port() {
        let store = FakeStore::with_edges(&[40005]);
        let result = reserve(
            &store,
            span(),
            || panic!("must not allocate"),
            Path::new("/u1"),
            &pairs(&[(8080, 40007)]),
            &pairs(&[(8080, 40005)]),
        )
        .expect("reserve");
        assert_eq!(result, pairs(&[(8080, 40007)]));
        assert_eq!(*store.released.borrow(), vec![Port::new(40005)]);
        assert_eq!(store.ports(), vec![40007]);
    }

    #[test]
    fn unmatched_existing_binding_is_released() {
        let store = FakeStore::with_edges(&[40005, 40006]);
        let result = reserve(
            &store,
            span(),
            || panic!("must not allocate"),
            Path::new("/u1"),
            &pairs(&[(8080, 0)]),
            &pairs(&[(8080, 40005), (22, 40006)]),
        )
        .expect("reserve");
        assert_eq!(result, pairs(&[(8080, 40005)]));
        assert_eq!(*store.released.borrow(), vec![Port::new(40006)]);
    }

    #[test]
    fn vanished_adopted_edge_is_reallocated() {
        let store = FakeStore::default();
        let result = reserve(
            &store,
            span(),
            counter(40100),
            Path::new("/u1"),
            &pairs(&[(8080, 0)]),
            &pairs(&[(8080, 40005)]),
        )
        .expect("reserve");
        assert_eq!(result, pairs(&[(8080, 40100)]));
        assert_eq!(store.ports(), vec![40100]);
    }

    #[test]
    fn vanished_pinned_edge_is_persisted_again() {
        let store = FakeStore::default();
        let result = reserve(
            &store,
            span(),
            || panic!("must not allocate"),
            Path::new("/u1"),
            &pairs(&[(8080, 40005)]),
            &pairs(&[(8080, 40005)]),
        )
        .expect("reserve");
        assert_eq!(result, pairs(&[(8080, 40005)]));
        assert_eq!(store.ports(), vec![40005]);
    }

    #[test]
    fn conflicting_existing_bindings_abort_untouched() {
        let store = FakeStore::with_edges(&[40005, 40006]);
        let err = reserve(
            &store,
            span(),
            || panic!("must not allocate"),
            Path::new("/u1"),
            &pairs(&[(8080, 0), (9090, 0)]),
            &pairs(&[(8080, 40005), (8080, 40006)]),
        )
        .expect_err("conflict");
        match err {
            PortLedgerError::Conflict {
                internal,
                first,
                second,
            } => {
                assert_eq!(internal, Port::new(8080));
                assert_eq!(first, Port::new(40005));
                assert_eq!(second, Port::new(40006));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(store.ports(), vec![40005, 40006]);
        assert!(store.released.borrow().is_empty());
    }

    #[test]
    fn duplicate_identical_existing_binding_is_not_a_conflict() {
        let store = FakeStore::with_edges(&[40005]);
        let result = reserve(
            &store,
            span(),
            || panic!("must not allocate"),
            Path::new("/u1"),
            &pairs(&[(8080, 0)]),
            &pairs(&[(8080, 40005), (8080, 40005)]),
        )
        .expect("reserve");
        assert_eq!(result, pairs(&[(8080, 40005)]));
    }

    #[test]
    fn allocation_failure_persists_nothing() {
        let store = FakeStore::default();
        let mut calls = 0;
        let err = reserve(
            &store,
            span(),
            || {
                calls += 1;
                if calls == 1 {
                    Ok(Port::new(40000))
                } else {
                    Err(PortLedgerError::Exhausted {
                        min: Port::new(40000),
                        max: Port::new(40000),
                    })
                }
            },
            Path::new("/u1"),
            &pairs(&[(8080, 0), (9090, 0)]),
            &PortPairs::new(),
        )
        .expect_err("exhausted");
        assert!(matches!(err, PortLedgerError::Exhausted { .. }));
        assert!(store.ports().is_empty());
    }

    #[test]
    fn persist_failure_rolls_back_only_this_call() {
        let mut store = FakeStore::with_edges(&[40500]);
        store.fail_create = Some(Port::new(40001));
        let err = reserve(
            &store,
            span(),
            counter(40000),
            Path::new("/u1"),
            &pairs(&[(8080, 0), (9090, 0), (22, 0)]),
            &PortPairs::new(),
        )
        .expect_err("persist failure");
        assert!(matches!(err, PortLedgerError::AlreadyBound { .. }));
        assert_eq!(store.ports(), vec![40500]);
    }

    #[test]
    fn stale_release_happens_only_after_success() {
        let mut store = FakeStore::with_edges(&[40006]);
        store.fail_create = Some(Port::new(40000));
        let _ = reserve(
            &store,
            span(),
            counter(40000),
            Path::new("/u1"),
            &pairs(&[(8080, 0)]),
            &pairs(&[(22, 40006)]),
        )
        .expect_err("persist failure");
        assert!(store.released.borrow().is_empty());
        assert_eq!(store.ports(), vec![40006]);
    }

    #[test]
    fn offers_held_by_this_call_are_skipped() {
        let store = FakeStore::default();
        let result = reserve(
            &store,
            span(),
            counter(40000),
            Path::new("/u1"),
            &pairs(&[(22, 40000), (8080, 0), (9090, 0)]),
            &PortPairs::new(),
        )
        .expect("reserve");
        assert_eq!(result, pairs(&[(22, 40000), (8080, 40001), (9090, 40002)]));
        assert_eq!(store.ports(), vec![40000, 40001, 40002]);
    }

    #[test]
    fn wrapped_offers_of_this_call_mean_exhaustion() {
        let store = FakeStore::default();
        let err = reserve(
            &store,
            PortRange::new(40000, 40002).expect("range"),
            cycle(&[40000, 40001]),
            Path::new("/u1"),
            &pairs(&[(1, 0), (2, 0), (3, 0)]),
            &PortPairs::new(),
        )
        .expect_err("range too small");
        match err {
            PortLedgerError::Exhausted { min, max } => {
                assert_eq!(min, Port::new(40000));
                assert_eq!(max, Port::new(40001));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.ports().is_empty());
    }

    #[test]
    fn request_validation() {
        let store = FakeStore::default();
        let err = reserve(
            &store,
            span(),
            counter(40000),
            Path::new("/u1"),
            &pairs(&[(8080, 0), (8080, 0)]),
            &PortPairs::new(),
        )
        .expect_err("duplicate internal");
        assert!(matches!(err, PortLedgerError::Validation { .. }));

        let err = reserve(
            &store,
            span(),
            counter(40000),
            Path::new("/u1"),
            &pairs(&[(0, 0)]),
            &PortPairs::new(),
        )
        .expect_err("unbound internal");
        assert!(matches!(err, PortLedgerError::InvalidPort { .. }));
    }

    #[test]
    fn release_continues_past_failures_and_skips_unassigned() {
        struct Flaky;
        impl EdgeStore for Flaky {
            fn edge_exists(&self, _: Port) -> Result<bool> {
                Ok(true)
            }
            fn create_edge(&self, _: Port, _: &Path) -> Result<()> {
                Ok(())
            }
            fn remove_edge(&self, _: Port) -> Result<()> {
                Ok(())
            }
            fn release_edge(&self, port: Port) -> Result<()> {
                assert!(!port.is_default());
                if port.get() % 2 == 0 {
                    Err(PortLedgerError::io(
                        format!("/ledger/{port}"),
                        std::io::Error::other("busy"),
                    ))
                } else {
                    Ok(())
                }
            }
        }

        let err = release(&Flaky, &pairs(&[(1, 40000), (2, 0), (3, 40001), (4, 40002)]))
            .expect_err("aggregate failure");
        assert!(err.to_string().contains("/ledger/40002"), "{err}");
        release(&Flaky, &pairs(&[(1, 40001)])).expect("all succeed");
    }
}
