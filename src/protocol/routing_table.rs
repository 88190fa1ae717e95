use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::MAX_DISTANCE;
use crate::error::ProtocolError;
use crate::types::{AreaId, NodeId};

/// One (destination, distance) element of a ROUTE vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WireEntry {
    pub dest: NodeId,
    pub dist: u32,
}

impl WireEntry {
    pub fn new(dest: NodeId, dist: u32) -> Result<Self, ProtocolError> {
        if dist > MAX_DISTANCE {
            return Err(ProtocolError::InvalidDistance(dist));
        }
        Ok(Self { dest, dist })
    }
}

impl fmt::Display for WireEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({} , {})", self.dest, self.dist)
    }
}

/// A routing-table row: a vector entry plus how to reach it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub entry: WireEntry,
    pub next_hop: Option<NodeId>,
    /// Area the route was learned through.
    pub next_hop_area: Option<AreaId>,
    /// Settled by the shortest-path computation; `false` while tentative.
    #[serde(rename = "final")]
    pub is_final: bool,
}

impl RouteEntry {
    pub fn new(entry: WireEntry, next_hop: NodeId, next_hop_area: AreaId) -> Self {
        Self {
            entry,
            next_hop: Some(next_hop),
            next_hop_area: Some(next_hop_area),
            is_final: false,
        }
    }

    /// Entry for a destination not reached yet.
    pub fn unreachable(dest: NodeId) -> Self {
        Self {
            entry: WireEntry {
                dest,
                dist: MAX_DISTANCE,
            },
            next_hop: None,
            next_hop_area: None,
            is_final: false,
        }
    }

    pub fn dest(&self) -> NodeId {
        self.entry.dest
    }

    pub fn dist(&self) -> u32 {
        self.entry.dist
    }

    pub fn has_next(&self) -> bool {
        self.next_hop.is_some()
    }

    pub fn set_final(&mut self) {
        self.is_final = true;
    }

    /// Same distance, next hop and next-hop area. The `final` flag is ignored.
    pub fn same_route(&self, other: &RouteEntry) -> bool {
        self.entry == other.entry
            && self.next_hop == other.next_hop
            && self.next_hop_area == other.next_hop_area
    }
}

impl fmt::Display for RouteEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hop = self.next_hop.map(|n| n.to_string()).unwrap_or_else(|| "-".into());
        let area = self
            .next_hop_area
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".into());
        write!(
            f,
            "(dest={},dist={}, next_hop={}/{})",
            self.dest(),
            self.dist(),
            hop,
            area
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingTable {
    entries: BTreeMap<NodeId, RouteEntry>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    pub fn add_route(&mut self, entry: RouteEntry) {
        self.entries.insert(entry.dest(), entry);
    }

    pub fn get_route(&self, dest: NodeId) -> Option<&RouteEntry> {
        self.entries.get(&dest)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
        self.entries.values()
    }

    /// Merge `other` into this table, keeping the shortest distance per
    /// destination and skipping every route learned through `exclude_area`.
    /// Ties keep the entry already installed.
    pub fn merge(&mut self, other: &RoutingTable, exclude_area: Option<AreaId>) {
        for route in other.entries.values() {
            if exclude_area.is_some() && route.next_hop_area == exclude_area {
                continue;
            }
            let better = match self.entries.get(&route.dest()) {
                None => true,
                Some(existing) => route.dist() < existing.dist(),
            };
            if better {
                let mut copy = route.clone();
                copy.is_final = false;
                self.entries.insert(copy.dest(), copy);
            }
        }
    }

    pub fn next_hop(&self, dest: NodeId) -> Option<NodeId> {
        self.entries.get(&dest).and_then(|r| r.next_hop)
    }

    /// Same destination set and identical (dist, next_hop, next_hop_area) rows.
    pub fn equals(&self, other: &RoutingTable) -> bool {
        self.entries.len() == other.entries.len()
            && other.entries.iter().all(|(dest, route)| {
                self.entries
                    .get(dest)
                    .is_some_and(|mine| mine.same_route(route))
            })
    }

    pub fn entry_vector(&self) -> Vec<WireEntry> {
        self.entries.values().map(|r| r.entry).collect()
    }

    pub fn log_table(&self) {
        for route in self.entries.values() {
            log::debug!("{}", route);
        }
    }
}

impl PartialEq for RoutingTable {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(c: char) -> NodeId {
        NodeId::new(c).unwrap()
    }

    fn area(c: char) -> AreaId {
        AreaId::new(c).unwrap()
    }

    fn route(dest: char, dist: u32, hop: char, via: char) -> RouteEntry {
        RouteEntry::new(WireEntry::new(node(dest), dist).unwrap(), node(hop), area(via))
    }

    fn table(routes: &[RouteEntry]) -> RoutingTable {
        let mut t = RoutingTable::new();
        for r in routes {
            t.add_route(r.clone());
        }
        t
    }

    #[test]
    fn test_wire_entry_rejects_distance_above_max() {
        assert!(WireEntry::new(node('A'), MAX_DISTANCE).is_ok());
        assert_eq!(
            WireEntry::new(node('A'), MAX_DISTANCE + 1),
            Err(ProtocolError::InvalidDistance(MAX_DISTANCE + 1))
        );
    }

    #[test]
    fn test_merge_prefers_strictly_shorter() {
        let mut local = table(&[route('C', 3, 'B', '0')]);
        local.merge(&table(&[route('C', 3, 'D', '0')]), None);
        assert_eq!(local.next_hop(node('C')), Some(node('B')));

        local.merge(&table(&[route('C', 2, 'D', '0')]), None);
        assert_eq!(local.next_hop(node('C')), Some(node('D')));
        assert_eq!(local.get_route(node('C')).unwrap().dist(), 2);
    }

    #[test]
    fn test_merge_is_idempotent() {
        let other = table(&[route('B', 1, 'B', '0'), route('C', 2, 'B', '0')]);
        let mut once = table(&[route('D', 4, 'E', '1')]);
        once.merge(&other, None);
        let mut twice = once.clone();
        twice.merge(&other, None);
        assert!(once.equals(&twice));
        assert_eq!(twice.len(), 3);
    }

    #[test]
    fn test_merge_excludes_area() {
        let other = table(&[route('B', 1, 'B', 'X'), route('C', 2, 'B', 'X')]);
        let mut merged = RoutingTable::new();
        merged.merge(&other, Some(area('X')));
        assert!(merged.is_empty());

        merged.merge(&other, Some(area('Y')));
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_equals_ignores_final_flag_but_not_next_hop() {
        let a = table(&[route('B', 1, 'B', '0')]);
        let mut finalized = route('B', 1, 'B', '0');
        finalized.set_final();
        assert!(a.equals(&table(&[finalized])));
        assert!(!a.equals(&table(&[route('B', 1, 'C', '0')])));
        assert!(!a.equals(&table(&[route('B', 1, 'B', '1')])));
        assert!(!a.equals(&RoutingTable::new()));
    }

    #[test]
    fn test_next_hop_for_unknown_destination() {
        let t = table(&[route('B', 1, 'B', '0')]);
        assert_eq!(t.next_hop(node('Z')), None);
        assert!(!RouteEntry::unreachable(node('Z')).has_next());
    }
}
