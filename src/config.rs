use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::protocol::{
    AreaSettings, DEFAULT_MAX_PATH_LEN, MAX_ADVERTISEMENT_PERIOD_SECS, MAX_AREAS, MAX_DISTANCE,
    MAX_ENTRY_VEC_LEN,
};
use crate::types::{AreaId, NodeId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("at least one area must be configured")]
    NoAreas,

    #[error("too many areas ({0} > {max})", max = MAX_AREAS)]
    TooManyAreas(usize),

    #[error("area {0} configured twice")]
    DuplicateArea(AreaId),

    #[error("advertisement period must be between 1 and {max} seconds", max = MAX_ADVERTISEMENT_PERIOD_SECS)]
    InvalidPeriod,

    #[error("max_neighbors must be between 1 and {0}")]
    InvalidNeighborLimit(usize),

    #[error("max_path_len must be between 1 and 255")]
    InvalidPathLength,

    #[error("neighbor {0}: {1}")]
    InvalidNeighbor(NodeId, String),
}

/// Settings of one router node, read once at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    pub name: NodeId,
    pub areas: Vec<AreaId>,
    /// Unicast address HELLO/BYE/DATA are received on.
    pub local_addr: SocketAddr,
    /// ROUTE destination; joined only when it is a multicast group.
    pub multicast_addr: SocketAddr,
    #[serde(default = "default_period")]
    pub advertisement_period_secs: u64,
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
    /// 0 disables the periodic HELLO.
    #[serde(default)]
    pub hello_interval_secs: u64,
    #[serde(default = "default_true")]
    pub send_on_change: bool,
    #[serde(default = "default_true")]
    pub eager_update: bool,
    #[serde(default = "default_max_neighbors")]
    pub max_neighbors: usize,
    #[serde(default = "default_max_path_len")]
    pub max_path_len: usize,
    #[serde(default)]
    pub control_port: Option<u16>,
    #[serde(default)]
    pub neighbors: Vec<NeighborConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborConfig {
    pub name: NodeId,
    pub ip: String,
    pub port: u16,
    pub distance: u32,
    /// Empty means every area of the local node.
    #[serde(default)]
    pub areas: Vec<AreaId>,
}

fn default_period() -> u64 {
    10
}

fn default_min_interval() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_max_neighbors() -> usize {
    10
}

fn default_max_path_len() -> usize {
    DEFAULT_MAX_PATH_LEN
}

impl RouterConfig {
    pub fn new(name: NodeId, local_addr: SocketAddr, multicast_addr: SocketAddr) -> Self {
        Self {
            name,
            areas: vec![AreaId::BACKBONE],
            local_addr,
            multicast_addr,
            advertisement_period_secs: default_period(),
            min_interval_ms: default_min_interval(),
            hello_interval_secs: 0,
            send_on_change: true,
            eager_update: true,
            max_neighbors: default_max_neighbors(),
            max_path_len: default_max_path_len(),
            control_port: None,
            neighbors: Vec::new(),
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: RouterConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.areas.is_empty() {
            return Err(ConfigError::NoAreas);
        }
        if self.areas.len() > MAX_AREAS {
            return Err(ConfigError::TooManyAreas(self.areas.len()));
        }
        let mut seen = BTreeSet::new();
        for area in &self.areas {
            if !seen.insert(*area) {
                return Err(ConfigError::DuplicateArea(*area));
            }
        }
        if !(1..=MAX_ADVERTISEMENT_PERIOD_SECS).contains(&self.advertisement_period_secs) {
            return Err(ConfigError::InvalidPeriod);
        }
        // the local entry takes one slot of every ROUTE vector
        let neighbor_limit = MAX_ENTRY_VEC_LEN - 1;
        if self.max_neighbors == 0 || self.max_neighbors > neighbor_limit {
            return Err(ConfigError::InvalidNeighborLimit(neighbor_limit));
        }
        if self.max_path_len == 0 || self.max_path_len > u8::MAX as usize {
            return Err(ConfigError::InvalidPathLength);
        }
        for neighbor in &self.neighbors {
            if neighbor.name == self.name {
                return Err(ConfigError::InvalidNeighbor(
                    neighbor.name,
                    "same name as the local node".into(),
                ));
            }
            if !(1..=MAX_DISTANCE).contains(&neighbor.distance) {
                return Err(ConfigError::InvalidNeighbor(
                    neighbor.name,
                    format!("distance {} out of range", neighbor.distance),
                ));
            }
        }
        Ok(())
    }

    pub fn area_settings(&self) -> AreaSettings {
        AreaSettings {
            period: Duration::from_secs(self.advertisement_period_secs),
            min_interval: Duration::from_millis(self.min_interval_ms),
            send_on_change: self.send_on_change,
            eager_update: self.eager_update,
        }
    }

    pub fn hello_interval(&self) -> Option<Duration> {
        (self.hello_interval_secs > 0).then(|| Duration::from_secs(self.hello_interval_secs))
    }

    /// Areas the neighbor belongs to, defaulting to the local ones.
    pub fn neighbor_areas(&self, neighbor: &NeighborConfig) -> BTreeSet<AreaId> {
        if neighbor.areas.is_empty() {
            self.areas.iter().copied().collect()
        } else {
            neighbor.areas.iter().copied().collect()
        }
    }
}
