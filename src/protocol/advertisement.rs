use log::debug;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;
use tokio::time::Instant;

use super::routing_table::WireEntry;
use crate::error::RouteError;
use crate::types::{AreaId, NodeId};

/// The last advertisement accepted from one origin in one area.
#[derive(Debug, Clone)]
pub struct RouterInfo {
    pub origin: NodeId,
    pub area: AreaId,
    pub seq: u32,
    pub ttl: Duration,
    pub vector: Vec<WireEntry>,
    pub received_at: Instant,
}

impl RouterInfo {
    pub fn is_fresh_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.received_at) <= self.ttl
    }

    /// Order-independent comparison of (dest, dist) pairs.
    pub fn same_vector(&self, vector: &[WireEntry]) -> bool {
        let mine: BTreeSet<&WireEntry> = self.vector.iter().collect();
        let theirs: BTreeSet<&WireEntry> = vector.iter().collect();
        mine == theirs
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Stored, and the vector differs from the previous one.
    Changed,
    /// Stored, same vector as before.
    Unchanged,
    /// Sequence number not newer than the stored one; dropped.
    Stale,
}

/// Advertisements received in one area, one entry per origin.
#[derive(Debug)]
pub struct AdvertisementStore {
    area: AreaId,
    entries: BTreeMap<NodeId, RouterInfo>,
}

impl AdvertisementStore {
    pub fn new(area: AreaId) -> Self {
        Self {
            area,
            entries: BTreeMap::new(),
        }
    }

    pub fn accept(
        &mut self,
        origin: NodeId,
        seq: u32,
        ttl: Duration,
        vector: Vec<WireEntry>,
    ) -> Result<Acceptance, RouteError> {
        self.accept_at(origin, seq, ttl, vector, Instant::now())
    }

    /// Stores `vector` unless it repeats a destination or is older than what
    /// is held for `origin`. An expired entry is replaced whatever its
    /// sequence number, so a restarted origin is heard again.
    pub fn accept_at(
        &mut self,
        origin: NodeId,
        seq: u32,
        ttl: Duration,
        vector: Vec<WireEntry>,
        now: Instant,
    ) -> Result<Acceptance, RouteError> {
        let mut seen = HashSet::with_capacity(vector.len());
        for entry in &vector {
            if !seen.insert(entry.dest) {
                return Err(RouteError::DuplicateDestination(entry.dest));
            }
        }

        let changed = match self.entries.get(&origin) {
            Some(stored) if stored.is_fresh_at(now) && seq <= stored.seq => {
                debug!(
                    "Dropping ROUTE({}) seq {} in area {}: holding seq {}",
                    origin, seq, self.area, stored.seq
                );
                return Ok(Acceptance::Stale);
            }
            Some(stored) => !stored.same_vector(&vector),
            None => true,
        };

        self.entries.insert(
            origin,
            RouterInfo {
                origin,
                area: self.area,
                seq,
                ttl,
                vector,
                received_at: now,
            },
        );
        Ok(if changed {
            Acceptance::Changed
        } else {
            Acceptance::Unchanged
        })
    }

    pub fn get(&self, origin: NodeId) -> Option<&RouterInfo> {
        self.entries.get(&origin)
    }

    pub fn is_fresh_at(&self, origin: NodeId, now: Instant) -> bool {
        self.entries
            .get(&origin)
            .is_some_and(|info| info.is_fresh_at(now))
    }

    /// Copy of every entry still within its TTL at `now`. Expired entries
    /// stay stored until replaced.
    pub fn fresh_snapshot(&self, now: Instant) -> Vec<RouterInfo> {
        self.entries
            .values()
            .filter(|info| info.is_fresh_at(now))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(c: char) -> NodeId {
        NodeId::new(c).unwrap()
    }

    fn vector(entries: &[(char, u32)]) -> Vec<WireEntry> {
        entries
            .iter()
            .map(|(d, w)| WireEntry::new(node(*d), *w).unwrap())
            .collect()
    }

    const TTL: Duration = Duration::from_secs(10);

    #[test]
    fn test_older_sequence_is_ignored() {
        let mut store = AdvertisementStore::new(AreaId::BACKBONE);
        let now = Instant::now();
        let x = node('X');
        assert_eq!(
            store.accept_at(x, 5, TTL, vector(&[('A', 1)]), now),
            Ok(Acceptance::Changed)
        );
        assert_eq!(
            store.accept_at(x, 3, TTL, vector(&[('A', 4)]), now),
            Ok(Acceptance::Stale)
        );
        assert_eq!(
            store.accept_at(x, 5, TTL, vector(&[('A', 4)]), now),
            Ok(Acceptance::Stale)
        );
        let stored = store.get(x).unwrap();
        assert_eq!(stored.seq, 5);
        assert_eq!(stored.vector, vector(&[('A', 1)]));
    }

    #[test]
    fn test_duplicate_destination_is_rejected() {
        let mut store = AdvertisementStore::new(AreaId::BACKBONE);
        assert_eq!(
            store.accept(node('X'), 1, TTL, vector(&[('A', 1), ('A', 2)])),
            Err(RouteError::DuplicateDestination(node('A')))
        );
        assert!(store.is_empty());
    }

    #[test]
    fn test_change_detection_ignores_order() {
        let mut store = AdvertisementStore::new(AreaId::BACKBONE);
        let now = Instant::now();
        let x = node('X');
        store
            .accept_at(x, 1, TTL, vector(&[('A', 1), ('B', 2)]), now)
            .unwrap();
        assert_eq!(
            store.accept_at(x, 2, TTL, vector(&[('B', 2), ('A', 1)]), now),
            Ok(Acceptance::Unchanged)
        );
        assert_eq!(
            store.accept_at(x, 3, TTL, vector(&[('B', 3), ('A', 1)]), now),
            Ok(Acceptance::Changed)
        );
        assert_eq!(store.get(x).unwrap().seq, 3);
    }

    #[test]
    fn test_expired_entry_is_excluded_but_kept() {
        let mut store = AdvertisementStore::new(AreaId::BACKBONE);
        let t0 = Instant::now();
        let x = node('X');
        store
            .accept_at(x, 1, Duration::from_secs(1), vector(&[('A', 1)]), t0)
            .unwrap();
        assert!(store.is_fresh_at(x, t0 + Duration::from_millis(900)));
        let t2 = t0 + Duration::from_secs(2);
        assert!(!store.is_fresh_at(x, t2));
        assert!(store.fresh_snapshot(t2).is_empty());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expired_entry_accepts_lower_sequence() {
        let mut store = AdvertisementStore::new(AreaId::BACKBONE);
        let t0 = Instant::now();
        let x = node('X');
        store
            .accept_at(x, 40, Duration::from_secs(1), vector(&[('A', 1)]), t0)
            .unwrap();
        let later = t0 + Duration::from_secs(5);
        assert_eq!(
            store.accept_at(x, 1, TTL, vector(&[('A', 1)]), later),
            Ok(Acceptance::Unchanged)
        );
        assert_eq!(store.get(x).unwrap().seq, 1);
        assert!(store.is_fresh_at(x, later));
    }
}
