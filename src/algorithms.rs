pub mod aggregation;
pub mod dijkstra;

pub use aggregation::{AreaAggregation, PrimaryArea};
pub use dijkstra::shortest_paths;
