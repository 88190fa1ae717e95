use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;

use super::routing_table::WireEntry;
use crate::types::{AreaId, NodeId};

/// A directly configured adjacent node.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub name: NodeId,
    pub addr: SocketAddr,
    pub distance: u32,
    pub areas: BTreeSet<AreaId>,
    /// Last ROUTE vector heard from this neighbor, if any.
    pub last_vector: Option<Vec<WireEntry>>,
    pub last_vector_at: Option<Instant>,
    pub last_vector_ttl: Duration,
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

impl Neighbor {
    pub fn new(name: NodeId, addr: SocketAddr, distance: u32, areas: BTreeSet<AreaId>) -> Self {
        Self {
            name,
            addr,
            distance,
            areas,
            last_vector: None,
            last_vector_at: None,
            last_vector_ttl: Duration::ZERO,
            last_seen: chrono::Utc::now(),
        }
    }

    pub fn in_area(&self, area: AreaId) -> bool {
        self.areas.contains(&area)
    }

    pub fn record_vector(&mut self, vector: Vec<WireEntry>, ttl: Duration, now: Instant) {
        self.last_vector = Some(vector);
        self.last_vector_at = Some(now);
        self.last_vector_ttl = ttl;
        self.last_seen = chrono::Utc::now();
    }

    /// The last vector, provided it has not outlived its TTL at `now`.
    pub fn fresh_vector(&self, now: Instant) -> Option<&[WireEntry]> {
        let at = self.last_vector_at?;
        if now.saturating_duration_since(at) > self.last_vector_ttl {
            return None;
        }
        self.last_vector.as_deref()
    }

    pub fn info(&self, now: Instant) -> NeighborInfo {
        NeighborInfo {
            name: self.name,
            addr: self.addr,
            distance: self.distance,
            areas: self.areas.iter().copied().collect(),
            vector: self.fresh_vector(now).map(|v| v.to_vec()),
            last_seen: self.last_seen,
        }
    }
}

/// Read-only view of a neighbor, as handed to display sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborInfo {
    pub name: NodeId,
    pub addr: SocketAddr,
    pub distance: u32,
    pub areas: Vec<AreaId>,
    pub vector: Option<Vec<WireEntry>>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub last_seen: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_vector_expires_after_ttl() {
        let name = NodeId::new('B').unwrap();
        let addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let mut neighbor = Neighbor::new(name, addr, 1, BTreeSet::from([AreaId::BACKBONE]));
        let start = Instant::now();
        assert!(neighbor.fresh_vector(start).is_none());

        let vector = vec![WireEntry::new(NodeId::new('C').unwrap(), 1).unwrap()];
        neighbor.record_vector(vector.clone(), Duration::from_secs(1), start);
        assert_eq!(neighbor.fresh_vector(start + Duration::from_millis(500)), Some(&vector[..]));
        assert_eq!(neighbor.fresh_vector(start + Duration::from_secs(1)), Some(&vector[..]));
        assert!(neighbor.fresh_vector(start + Duration::from_secs(2)).is_none());
        assert!(neighbor.info(start + Duration::from_secs(2)).vector.is_none());
    }

    #[test]
    fn test_in_area() {
        let neighbor = Neighbor::new(
            NodeId::new('B').unwrap(),
            "127.0.0.1:4000".parse().unwrap(),
            1,
            BTreeSet::from([AreaId::BACKBONE]),
        );
        assert!(neighbor.in_area(AreaId::BACKBONE));
        assert!(!neighbor.in_area(AreaId::new('1').unwrap()));
    }
}
