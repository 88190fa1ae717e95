use std::collections::BTreeMap;

use crate::protocol::{MAX_DISTANCE, WireEntry};
use crate::types::NodeId;

/// Directed link-state graph of one area: an edge (u, v, w) exists when u's
/// vector lists v at distance w.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    edges: BTreeMap<NodeId, BTreeMap<NodeId, u32>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the edges described by `origin`'s vector. Self entries and
    /// entries beyond `MAX_DISTANCE` carry no link and are skipped.
    pub fn add_vector(&mut self, origin: NodeId, vector: &[WireEntry]) {
        let links = self.edges.entry(origin).or_default();
        for entry in vector {
            if entry.dest == origin || entry.dist > MAX_DISTANCE {
                continue;
            }
            links.insert(entry.dest, entry.dist);
        }
    }

    pub fn links(&self, node: NodeId) -> impl Iterator<Item = (NodeId, u32)> + '_ {
        self.edges
            .get(&node)
            .into_iter()
            .flat_map(|links| links.iter().map(|(dest, dist)| (*dest, *dist)))
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(|links| links.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(c: char) -> NodeId {
        NodeId::new(c).unwrap()
    }

    fn entry(dest: char, dist: u32) -> WireEntry {
        WireEntry::new(node(dest), dist).unwrap()
    }

    #[test]
    fn test_add_vector_skips_self_entries() {
        let mut topo = Topology::new();
        topo.add_vector(node('B'), &[entry('B', 0), entry('C', 1)]);
        assert_eq!(topo.links(node('B')).collect::<Vec<_>>(), vec![(node('C'), 1)]);
        assert_eq!(topo.edge_count(), 1);
        assert_eq!(topo.links(node('Z')).count(), 0);
    }

    #[test]
    fn test_link_at_max_distance_is_kept() {
        let mut topo = Topology::new();
        topo.add_vector(node('A'), &[entry('B', MAX_DISTANCE)]);
        let out_of_range = WireEntry {
            dest: node('C'),
            dist: MAX_DISTANCE + 1,
        };
        topo.add_vector(node('B'), &[out_of_range]);
        assert_eq!(
            topo.links(node('A')).collect::<Vec<_>>(),
            vec![(node('B'), MAX_DISTANCE)]
        );
        assert_eq!(topo.links(node('B')).count(), 0);
    }
}
