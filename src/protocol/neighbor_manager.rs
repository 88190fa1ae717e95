use log::{debug, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::messages::{ByeMessage, HelloMessage, Packet, WireCodec};
use super::neighbor::{Neighbor, NeighborInfo};
use super::routing_table::WireEntry;
use super::MAX_DISTANCE;
use crate::error::NeighborError;
use crate::network::Transport;
use crate::stats::RouterStats;
use crate::types::{AreaId, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborUpdate {
    Changed,
    Unchanged,
}

/// The adjacent nodes of this router and the unicast traffic sent to them.
pub struct NeighborTable {
    local: NodeId,
    local_areas: Vec<AreaId>,
    max_neighbors: usize,
    neighbors: Mutex<BTreeMap<NodeId, Neighbor>>,
    transport: Arc<Transport>,
    codec: WireCodec,
    stats: Arc<RouterStats>,
}

impl NeighborTable {
    pub fn new(
        local: NodeId,
        local_areas: Vec<AreaId>,
        max_neighbors: usize,
        transport: Arc<Transport>,
        codec: WireCodec,
        stats: Arc<RouterStats>,
    ) -> Self {
        Self {
            local,
            local_areas,
            max_neighbors,
            neighbors: Mutex::new(BTreeMap::new()),
            transport,
            codec,
            stats,
        }
    }

    pub fn local_name(&self) -> NodeId {
        self.local
    }

    /// Resolves `ip:port`, accepting host names as well as literals.
    pub async fn resolve(ip: &str, port: u16) -> Result<SocketAddr, NeighborError> {
        let target = format!("{}:{}", ip, port);
        let resolved = match tokio::net::lookup_host(target.as_str()).await {
            Ok(mut addrs) => addrs.find(|a| a.is_ipv4()),
            Err(e) => {
                debug!("Cannot resolve {}: {}", target, e);
                None
            }
        };
        resolved.ok_or(NeighborError::InvalidAddress(target))
    }

    /// Adds or replaces the neighbor `name`. Returns `true` when the name was
    /// not known before, in which case a HELLO has been sent to it.
    pub async fn add(
        &self,
        name: NodeId,
        addr: SocketAddr,
        distance: u32,
        areas: BTreeSet<AreaId>,
    ) -> Result<bool, NeighborError> {
        let is_new = {
            let mut neighbors = self.neighbors.lock().await;
            let is_new = !neighbors.contains_key(&name);
            if is_new && neighbors.len() >= self.max_neighbors {
                return Err(NeighborError::TableFull(self.max_neighbors));
            }
            if name == self.local {
                return Err(NeighborError::LocalName(name));
            }
            if let Some(owner) = neighbors.values().find(|n| n.addr == addr && n.name != name) {
                return Err(NeighborError::AddressInUse {
                    addr,
                    owner: owner.name,
                });
            }
            check_distance(distance)?;
            if addr.ip().is_unspecified() || addr.port() == 0 {
                return Err(NeighborError::InvalidAddress(addr.to_string()));
            }
            neighbors.insert(name, Neighbor::new(name, addr, distance, areas));
            is_new
        };

        info!(
            "{} neighbor {} at {} (distance {})",
            if is_new { "Added" } else { "Replaced" },
            name,
            addr,
            distance
        );
        if is_new {
            if let Err(e) = self.send_hello(addr, distance).await {
                warn!("Failed to send HELLO to {} ({}): {}", name, addr, e);
            }
        }
        Ok(is_new)
    }

    /// Updates the neighbor bound to `addr`.
    pub async fn update(
        &self,
        name: NodeId,
        addr: SocketAddr,
        distance: u32,
        areas: BTreeSet<AreaId>,
    ) -> Result<NeighborUpdate, NeighborError> {
        let mut neighbors = self.neighbors.lock().await;
        let neighbor = neighbors
            .values_mut()
            .find(|n| n.addr == addr)
            .ok_or_else(|| NeighborError::NotFound(addr.to_string()))?;
        check_distance(distance)?;
        if neighbor.name != name {
            return Err(NeighborError::NameMismatch {
                name,
                bound: neighbor.name,
                addr,
            });
        }
        neighbor.last_seen = chrono::Utc::now();
        if neighbor.distance == distance && neighbor.areas == areas {
            return Ok(NeighborUpdate::Unchanged);
        }
        info!(
            "Neighbor {} updated: distance {} -> {}, areas {:?} -> {:?}",
            name, neighbor.distance, distance, neighbor.areas, areas
        );
        neighbor.distance = distance;
        neighbor.areas = areas;
        Ok(NeighborUpdate::Changed)
    }

    pub async fn remove(&self, name: NodeId, send_bye: bool) -> Result<Neighbor, NeighborError> {
        let removed = self
            .neighbors
            .lock()
            .await
            .remove(&name)
            .ok_or_else(|| NeighborError::NotFound(name.to_string()))?;
        info!("Removed neighbor {}", name);
        if send_bye {
            if let Err(e) = self.send_bye(removed.addr).await {
                warn!("Failed to send BYE to {}: {}", name, e);
            }
        }
        Ok(removed)
    }

    /// Sends BYE to every neighbor and empties the table.
    pub async fn clear_with_bye(&self) -> Vec<(NodeId, io::Error)> {
        let mut neighbors = self.neighbors.lock().await;
        let mut failures = Vec::new();
        for neighbor in neighbors.values() {
            if let Err(e) = self.send_bye(neighbor.addr).await {
                warn!("Failed to send BYE to {}: {}", neighbor.name, e);
                failures.push((neighbor.name, e));
            }
        }
        neighbors.clear();
        failures
    }

    /// Sends `bytes` to every neighbor but `excluding`, carrying on past
    /// failed sends.
    pub async fn broadcast(
        &self,
        bytes: &[u8],
        excluding: Option<NodeId>,
    ) -> Vec<(NodeId, io::Error)> {
        let neighbors = self.neighbors.lock().await;
        let mut failures = Vec::new();
        for neighbor in neighbors.values() {
            if Some(neighbor.name) == excluding {
                continue;
            }
            if let Err(e) = self.transport.send_to(bytes, neighbor.addr).await {
                warn!("Send to {} ({}) failed: {}", neighbor.name, neighbor.addr, e);
                failures.push((neighbor.name, e));
            }
        }
        failures
    }

    /// Direct-neighbor vector for `area`, optionally led by the local node at
    /// distance zero.
    pub async fn local_vector(&self, include_self: bool, area: AreaId) -> Vec<WireEntry> {
        let neighbors = self.neighbors.lock().await;
        let mut vector = Vec::with_capacity(neighbors.len() + 1);
        if include_self {
            vector.push(WireEntry {
                dest: self.local,
                dist: 0,
            });
        }
        vector.extend(
            neighbors
                .values()
                .filter(|n| n.in_area(area))
                .map(|n| WireEntry {
                    dest: n.name,
                    dist: n.distance,
                }),
        );
        vector
    }

    pub async fn send_hello_all(&self) -> Vec<(NodeId, io::Error)> {
        let neighbors = self.neighbors.lock().await;
        let mut failures = Vec::new();
        for neighbor in neighbors.values() {
            if let Err(e) = self.send_hello(neighbor.addr, neighbor.distance).await {
                warn!("Failed to send HELLO to {}: {}", neighbor.name, e);
                failures.push((neighbor.name, e));
            }
        }
        failures
    }

    /// Keeps the last vector heard from a direct neighbor.
    pub async fn record_vector(
        &self,
        name: NodeId,
        vector: &[WireEntry],
        ttl: Duration,
        now: Instant,
    ) -> bool {
        match self.neighbors.lock().await.get_mut(&name) {
            Some(neighbor) => {
                neighbor.record_vector(vector.to_vec(), ttl, now);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, name: NodeId) -> Option<Neighbor> {
        self.neighbors.lock().await.get(&name).cloned()
    }

    pub async fn locate(&self, addr: SocketAddr) -> Option<NodeId> {
        self.neighbors
            .lock()
            .await
            .values()
            .find(|n| n.addr == addr)
            .map(|n| n.name)
    }

    pub async fn snapshot(&self, now: Instant) -> Vec<NeighborInfo> {
        self.neighbors
            .lock()
            .await
            .values()
            .map(|n| n.info(now))
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.neighbors.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.neighbors.lock().await.is_empty()
    }

    async fn send_hello(&self, addr: SocketAddr, distance: u32) -> io::Result<()> {
        let packet = Packet::Hello(HelloMessage {
            sender: self.local,
            distance,
            areas: self.local_areas.clone(),
        });
        let bytes = self
            .codec
            .encode(&packet)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.transport.send_to(&bytes, addr).await?;
        self.stats.hello_sent();
        debug!("HELLO sent to {}", addr);
        Ok(())
    }

    async fn send_bye(&self, addr: SocketAddr) -> io::Result<()> {
        let packet = Packet::Bye(ByeMessage { sender: self.local });
        let bytes = self
            .codec
            .encode(&packet)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        self.transport.send_to(&bytes, addr).await?;
        self.stats.bye_sent();
        debug!("BYE sent to {}", addr);
        Ok(())
    }
}

fn check_distance(distance: u32) -> Result<(), NeighborError> {
    if !(1..=MAX_DISTANCE).contains(&distance) {
        return Err(NeighborError::InvalidDistance(distance));
    }
    Ok(())
}
