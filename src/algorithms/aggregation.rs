use crate::protocol::RoutingTable;
use crate::types::AreaId;

/// Builds the node's externally visible table out of the per-area tables.
///
/// `tables` is in configuration order. How a border node should combine
/// several areas is not settled, so the policy sits behind this trait.
pub trait AreaAggregation: Send + Sync {
    fn name(&self) -> &'static str;

    fn compose(&self, tables: &[(AreaId, RoutingTable)]) -> RoutingTable;
}

/// Publishes a single area: the backbone when served, else the first
/// configured area.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrimaryArea;

impl PrimaryArea {
    pub fn pick(areas: &[AreaId]) -> Option<AreaId> {
        areas
            .iter()
            .copied()
            .find(|a| a.is_backbone())
            .or_else(|| areas.first().copied())
    }
}

impl AreaAggregation for PrimaryArea {
    fn name(&self) -> &'static str {
        "primary-area"
    }

    fn compose(&self, tables: &[(AreaId, RoutingTable)]) -> RoutingTable {
        let areas: Vec<AreaId> = tables.iter().map(|(area, _)| *area).collect();
        PrimaryArea::pick(&areas)
            .and_then(|primary| tables.iter().find(|(area, _)| *area == primary))
            .map(|(_, table)| table.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RouteEntry, WireEntry};
    use crate::types::NodeId;

    fn area(c: char) -> AreaId {
        AreaId::new(c).unwrap()
    }

    fn table_with(dest: char, via: AreaId) -> RoutingTable {
        let node = NodeId::new(dest).unwrap();
        let mut table = RoutingTable::new();
        table.add_route(RouteEntry::new(WireEntry::new(node, 1).unwrap(), node, via));
        table
    }

    #[test]
    fn test_backbone_wins_when_served() {
        let tables = vec![
            (area('1'), table_with('B', area('1'))),
            (AreaId::BACKBONE, table_with('C', AreaId::BACKBONE)),
        ];
        let composed = PrimaryArea.compose(&tables);
        assert_eq!(composed.len(), 1);
        assert!(composed.get_route(NodeId::new('C').unwrap()).is_some());
    }

    #[test]
    fn test_first_area_without_backbone() {
        let tables = vec![
            (area('2'), table_with('D', area('2'))),
            (area('1'), table_with('B', area('1'))),
        ];
        let composed = PrimaryArea.compose(&tables);
        assert!(composed.get_route(NodeId::new('D').unwrap()).is_some());
        assert!(PrimaryArea.compose(&[]).is_empty());
    }
}
