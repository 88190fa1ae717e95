use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::network::Topology;
use crate::protocol::{MAX_DISTANCE, RouteEntry, RoutingTable, WireEntry};
use crate::types::{AreaId, NodeId};

#[derive(Debug, PartialEq, Eq)]
struct State {
    cost: u32,
    node: NodeId,
}

impl Ord for State {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap, lowest node id first on equal cost
        other
            .cost
            .cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for State {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Single-source shortest paths from `local` over one area's graph.
///
/// Every reachable node gets a final entry whose next hop is the adjacent
/// node the path leaves through (the local entry points at itself). Paths
/// longer than `MAX_DISTANCE` are left out.
pub fn shortest_paths(topology: &Topology, local: NodeId, area: AreaId) -> RoutingTable {
    let mut tentative: BTreeMap<NodeId, RouteEntry> = BTreeMap::new();
    let mut done: BTreeSet<NodeId> = BTreeSet::new();
    let mut heap = BinaryHeap::new();

    tentative.insert(
        local,
        RouteEntry::new(WireEntry { dest: local, dist: 0 }, local, area),
    );
    heap.push(State {
        cost: 0,
        node: local,
    });

    while let Some(State { cost, node }) = heap.pop() {
        if !done.insert(node) {
            continue;
        }
        let first_hop = match tentative.get_mut(&node) {
            Some(route) => {
                route.set_final();
                route.next_hop
            }
            None => continue,
        };

        for (neighbor, link_cost) in topology.links(node) {
            if done.contains(&neighbor) {
                continue;
            }
            let new_cost = cost.saturating_add(link_cost);
            if new_cost > MAX_DISTANCE {
                continue;
            }
            let improves = tentative
                .get(&neighbor)
                .is_none_or(|route| new_cost < route.dist());
            if !improves {
                continue;
            }
            let hop = if node == local { Some(neighbor) } else { first_hop };
            let Some(hop) = hop else { continue };
            tentative.insert(
                neighbor,
                RouteEntry::new(
                    WireEntry {
                        dest: neighbor,
                        dist: new_cost,
                    },
                    hop,
                    area,
                ),
            );
            heap.push(State {
                cost: new_cost,
                node: neighbor,
            });
        }
    }

    let mut table = RoutingTable::new();
    for route in tentative.into_values().filter(|r| r.is_final) {
        table.add_route(route);
    }
    table
}
