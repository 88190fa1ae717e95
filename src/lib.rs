pub mod algorithms;
pub mod config;
pub mod control_server;
pub mod error;
pub mod network;
pub mod protocol;
pub mod router;
pub mod stats;
pub mod types;

pub use config::RouterConfig;
pub use error::RouterError;
pub use router::{Delivery, Dispatch, RoutingCoordinator};
pub use types::{AreaId, NodeId};
