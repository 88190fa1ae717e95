pub mod advertisement;
pub mod area_process;
pub mod message_handler;
pub mod messages;
pub mod neighbor;
pub mod neighbor_manager;
pub mod routing_table;
pub mod task_manager;

pub use advertisement::{Acceptance, AdvertisementStore, RouterInfo};
pub use area_process::{AreaRoutingProcess, AreaSettings, SendOutcome};
pub use messages::*;
pub use neighbor::*;
pub use neighbor_manager::{NeighborTable, NeighborUpdate};
pub use routing_table::*;

use std::time::Duration;

/// Distance used as "infinity"; valid distances are `0..=MAX_DISTANCE`.
pub const MAX_DISTANCE: u32 = 99;
/// Most entries one ROUTE packet may carry.
pub const MAX_ENTRY_VEC_LEN: usize = 30;
/// Added to the advertisement period to get the TTL put in ROUTE packets.
pub const TTL_ADD: Duration = Duration::from_secs(6);
pub const MAX_AREAS: usize = 10;
/// Longest accepted advertisement period, one day.
pub const MAX_ADVERTISEMENT_PERIOD_SECS: u64 = 86_400;
pub const MAX_DATA_MSG_LEN: usize = 255;
pub const DEFAULT_MAX_PATH_LEN: usize = 26;

pub const PKT_HELLO: u8 = 1;
pub const PKT_BYE: u8 = 2;
pub const PKT_ROUTE: u8 = 3;
pub const PKT_DATA: u8 = 4;
