use log::{debug, info, warn};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use super::advertisement::{Acceptance, AdvertisementStore, RouterInfo};
use super::messages::{Packet, RouteMessage, WireCodec};
use super::neighbor_manager::NeighborTable;
use super::routing_table::{RoutingTable, WireEntry};
use super::task_manager::PeriodicTask;
use super::{MAX_ENTRY_VEC_LEN, TTL_ADD};
use crate::algorithms::shortest_paths;
use crate::error::{RouteError, RouterError};
use crate::network::{Topology, Transport};
use crate::stats::RouterStats;
use crate::types::{AreaId, NodeId};

/// Timing and policy knobs shared by every area of a node.
#[derive(Debug, Clone)]
pub struct AreaSettings {
    /// Interval of the periodic recomputation and advertisement.
    pub period: Duration,
    /// Minimum time between two unforced advertisements of the same vector.
    pub min_interval: Duration,
    /// Reconsider advertising as soon as a received vector changed.
    pub send_on_change: bool,
    /// Recompute as soon as a received vector changed.
    pub eager_update: bool,
}

impl AreaSettings {
    /// TTL put in outgoing ROUTE packets.
    pub fn ttl(&self) -> Duration {
        self.period.saturating_add(TTL_ADD)
    }

    fn wire_ttl(&self) -> u32 {
        u32::try_from(self.ttl().as_secs()).unwrap_or(u32::MAX)
    }
}

impl Default for AreaSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(10),
            min_interval: Duration::from_secs(1),
            send_on_change: true,
            eager_update: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Sent { sequence: u32 },
    Suppressed,
}

struct AreaState {
    store: AdvertisementStore,
    table: RoutingTable,
    computed: bool,
    next_seq: u32,
    last_sent_at: Option<Instant>,
    last_sent_vector: Option<Vec<WireEntry>>,
}

/// Link-state routing for one area: received advertisements, the area's
/// routing table and the ROUTE announcements of the local node.
pub struct AreaRoutingProcess {
    area: AreaId,
    local: NodeId,
    settings: AreaSettings,
    neighbors: Arc<NeighborTable>,
    transport: Arc<Transport>,
    codec: WireCodec,
    stats: Arc<RouterStats>,
    state: Mutex<AreaState>,
    timer: Mutex<Option<PeriodicTask>>,
    /// Bumped whenever this area's table changes.
    table_version: Arc<watch::Sender<u64>>,
}

impl AreaRoutingProcess {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        area: AreaId,
        local: NodeId,
        settings: AreaSettings,
        neighbors: Arc<NeighborTable>,
        transport: Arc<Transport>,
        codec: WireCodec,
        stats: Arc<RouterStats>,
        table_version: Arc<watch::Sender<u64>>,
    ) -> Self {
        Self {
            area,
            local,
            settings,
            neighbors,
            transport,
            codec,
            stats,
            state: Mutex::new(AreaState {
                store: AdvertisementStore::new(area),
                table: RoutingTable::new(),
                computed: false,
                next_seq: 1,
                last_sent_at: None,
                last_sent_vector: None,
            }),
            timer: Mutex::new(None),
            table_version,
        }
    }

    pub fn area(&self) -> AreaId {
        self.area
    }

    pub fn settings(&self) -> &AreaSettings {
        &self.settings
    }

    pub async fn process_route(
        &self,
        sender: NodeId,
        seq: u32,
        ttl: Duration,
        vector: Vec<WireEntry>,
    ) -> Result<Acceptance, RouteError> {
        self.process_route_at(sender, seq, ttl, vector, Instant::now())
            .await
    }

    /// Stores an advertisement from `sender` and reacts to a changed vector
    /// according to the eager-update and send-on-change settings.
    pub async fn process_route_at(
        &self,
        sender: NodeId,
        seq: u32,
        ttl: Duration,
        vector: Vec<WireEntry>,
        now: Instant,
    ) -> Result<Acceptance, RouteError> {
        if vector.is_empty() || vector.len() > MAX_ENTRY_VEC_LEN {
            return Err(RouteError::InvalidVectorLength(vector.len()));
        }
        let acceptance = {
            let mut state = self.state.lock().await;
            state.store.accept_at(sender, seq, ttl, vector.clone(), now)?
        };
        if acceptance == Acceptance::Stale {
            return Ok(acceptance);
        }
        self.neighbors.record_vector(sender, &vector, ttl, now).await;

        if acceptance == Acceptance::Changed {
            debug!(
                "Area {}: vector from {} changed (seq {})",
                self.area, sender, seq
            );
            if self.settings.eager_update {
                self.run_computation_at(now).await;
            }
            if self.settings.send_on_change {
                if let Err(e) = self.send_advertisement_at(false, now).await {
                    warn!("Area {}: failed to send ROUTE: {}", self.area, e);
                }
            }
        }
        Ok(acceptance)
    }

    pub async fn run_computation(&self) -> bool {
        self.run_computation_at(Instant::now()).await
    }

    /// Rebuilds the area table from the local vector and every advertisement
    /// fresh at `now`. Returns `true` when the table changed.
    pub async fn run_computation_at(&self, now: Instant) -> bool {
        let local_vector = self.neighbors.local_vector(false, self.area).await;
        let mut state = self.state.lock().await;

        let mut topology = Topology::new();
        topology.add_vector(self.local, &local_vector);
        for info in state.store.fresh_snapshot(now) {
            if info.origin != self.local {
                topology.add_vector(info.origin, &info.vector);
            }
        }
        let table = shortest_paths(&topology, self.local, self.area);
        self.stats.spf_run();

        let changed = !state.computed || !state.table.equals(&table);
        state.table = table;
        state.computed = true;
        if changed {
            info!(
                "Area {}: routing table changed ({} routes, {} links)",
                self.area,
                state.table.len(),
                topology.edge_count()
            );
            state.table.log_table();
            self.table_version.send_modify(|v| *v += 1);
        }
        changed
    }

    pub async fn send_advertisement(&self, force: bool) -> Result<SendOutcome, RouterError> {
        self.send_advertisement_at(force, Instant::now()).await
    }

    /// Multicasts the local vector with the next sequence number unless
    /// `force` is false, the minimum interval has not elapsed at `now` and
    /// the vector is the one sent last time.
    pub async fn send_advertisement_at(
        &self,
        force: bool,
        now: Instant,
    ) -> Result<SendOutcome, RouterError> {
        let vector = self.neighbors.local_vector(true, self.area).await;
        if vector.len() > MAX_ENTRY_VEC_LEN {
            return Err(RouteError::InvalidVectorLength(vector.len()).into());
        }
        let mut state = self.state.lock().await;
        if !force {
            let too_soon = state
                .last_sent_at
                .is_some_and(|at| now.saturating_duration_since(at) < self.settings.min_interval);
            let same = state.last_sent_vector.as_ref() == Some(&vector);
            if too_soon && same {
                debug!("Area {}: ROUTE suppressed", self.area);
                return Ok(SendOutcome::Suppressed);
            }
        }

        let sequence = state.next_seq;
        state.next_seq = state.next_seq.wrapping_add(1);
        let packet = Packet::Route(RouteMessage {
            sender: self.local,
            area: self.area,
            sequence,
            ttl: self.settings.wire_ttl(),
            entries: vector.clone(),
        });
        let bytes = self.codec.encode(&packet)?;
        self.transport.send_multicast(&bytes).await?;

        state.last_sent_at = Some(now);
        state.last_sent_vector = Some(vector);
        self.stats.local_route_sent();
        debug!(
            "Area {}: ROUTE seq {} sent to {}",
            self.area,
            sequence,
            self.transport.group()
        );
        Ok(SendOutcome::Sent { sequence })
    }

    /// Timer tick: recompute, then always advertise.
    pub async fn update_routing_table(&self) {
        self.run_computation().await;
        if let Err(e) = self.send_advertisement(true).await {
            warn!("Area {}: periodic ROUTE failed: {}", self.area, e);
        }
    }

    /// Neighbor set of the area changed.
    pub async fn network_changed(&self, force: bool) {
        self.run_computation().await;
        if let Err(e) = self.send_advertisement(force).await {
            warn!("Area {}: ROUTE after network change failed: {}", self.area, e);
        }
    }

    pub async fn start_announce_timer(self: &Arc<Self>) {
        let mut timer = self.timer.lock().await;
        if let Some(previous) = timer.take() {
            previous.stop().await;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        *timer = Some(PeriodicTask::spawn(
            format!("area {} announce", self.area),
            self.settings.period,
            move || {
                let weak = weak.clone();
                async move {
                    if let Some(process) = weak.upgrade() {
                        process.update_routing_table().await;
                    }
                }
            },
        ));
    }

    pub async fn stop_announce_timer(&self) {
        if let Some(task) = self.timer.lock().await.take() {
            task.stop().await;
        }
    }

    pub async fn timer_running(&self) -> bool {
        self.timer
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub async fn routing_table(&self) -> RoutingTable {
        self.state.lock().await.table.clone()
    }

    /// Last sequence number handed out, 0 before the first ROUTE.
    pub async fn last_sequence(&self) -> u32 {
        self.state.lock().await.next_seq.wrapping_sub(1)
    }

    pub async fn advertisements(&self, now: Instant) -> Vec<RouterInfo> {
        self.state.lock().await.store.fresh_snapshot(now)
    }

    pub async fn stored_advertisement(&self, origin: NodeId) -> Option<RouterInfo> {
        self.state.lock().await.store.get(origin).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DEFAULT_MAX_PATH_LEN;
    use std::collections::BTreeSet;
    use std::net::SocketAddr;

    fn node(c: char) -> NodeId {
        NodeId::new(c).unwrap()
    }

    fn vector(entries: &[(char, u32)]) -> Vec<WireEntry> {
        entries
            .iter()
            .map(|(d, w)| WireEntry::new(node(*d), *w).unwrap())
            .collect()
    }

    struct Fixture {
        process: Arc<AreaRoutingProcess>,
        neighbors: Arc<NeighborTable>,
        group: tokio::net::UdpSocket,
        version: watch::Receiver<u64>,
    }

    async fn fixture(settings: AreaSettings) -> Fixture {
        // a plain socket stands in for the multicast group
        let group = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let transport = Arc::new(
            Transport::bind("127.0.0.1:0".parse().unwrap(), group.local_addr().unwrap())
                .await
                .unwrap(),
        );
        let stats = Arc::new(RouterStats::new());
        let codec = WireCodec::new(DEFAULT_MAX_PATH_LEN);
        let neighbors = Arc::new(NeighborTable::new(
            node('A'),
            vec![AreaId::BACKBONE],
            10,
            transport.clone(),
            codec,
            stats.clone(),
        ));
        let (tx, version) = watch::channel(0);
        let process = Arc::new(AreaRoutingProcess::new(
            AreaId::BACKBONE,
            node('A'),
            settings,
            neighbors.clone(),
            transport,
            codec,
            stats,
            Arc::new(tx),
        ));
        Fixture {
            process,
            neighbors,
            group,
            version,
        }
    }

    async fn add_b(neighbors: &NeighborTable) {
        let addr: SocketAddr = "127.0.0.1:40101".parse().unwrap();
        neighbors
            .add(node('B'), addr, 1, BTreeSet::from([AreaId::BACKBONE]))
            .await
            .unwrap();
    }

    async fn recv_route(group: &tokio::net::UdpSocket) -> RouteMessage {
        let mut buf = [0u8; 512];
        let (len, _) = group.recv_from(&mut buf).await.unwrap();
        match WireCodec::default().decode(&buf[..len]).unwrap() {
            Packet::Route(route) => route,
            other => panic!("expected ROUTE, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_route_from_neighbor_gives_two_hop_path() {
        let f = fixture(AreaSettings {
            send_on_change: false,
            ..AreaSettings::default()
        })
        .await;
        add_b(&f.neighbors).await;

        let acceptance = f
            .process
            .process_route(node('B'), 1, Duration::from_secs(10), vector(&[('C', 1)]))
            .await
            .unwrap();
        assert_eq!(acceptance, Acceptance::Changed);

        let table = f.process.routing_table().await;
        let to_c = table.get_route(node('C')).unwrap();
        assert_eq!(to_c.dist(), 2);
        assert_eq!(to_c.next_hop, Some(node('B')));
        assert_eq!(table.next_hop(node('B')), Some(node('B')));
        assert!(*f.version.borrow() >= 1);
        assert!(f.neighbors.get(node('B')).await.unwrap().last_vector.is_some());
    }

    #[tokio::test]
    async fn test_invalid_vector_lengths_are_rejected() {
        let f = fixture(AreaSettings::default()).await;
        assert_eq!(
            f.process
                .process_route(node('B'), 1, Duration::from_secs(10), Vec::new())
                .await,
            Err(RouteError::InvalidVectorLength(0))
        );
        assert!(f.process.stored_advertisement(node('B')).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_advertisement_is_excluded_from_computation() {
        let f = fixture(AreaSettings {
            send_on_change: false,
            eager_update: false,
            ..AreaSettings::default()
        })
        .await;
        add_b(&f.neighbors).await;
        let t0 = Instant::now();
        f.process
            .process_route_at(node('B'), 1, Duration::from_secs(1), vector(&[('C', 1)]), t0)
            .await
            .unwrap();

        f.process.run_computation_at(t0).await;
        assert!(f.process.routing_table().await.get_route(node('C')).is_some());

        assert!(f.process.run_computation_at(t0 + Duration::from_secs(2)).await);
        let table = f.process.routing_table().await;
        assert!(table.get_route(node('C')).is_none());
        assert!(table.get_route(node('B')).is_some());
        assert!(f.process.stored_advertisement(node('B')).await.is_some());
    }

    #[tokio::test]
    async fn test_recomputation_without_changes_reports_unchanged() {
        let f = fixture(AreaSettings::default()).await;
        add_b(&f.neighbors).await;
        assert!(f.process.run_computation().await);
        let first = f.process.routing_table().await;
        assert!(!f.process.run_computation().await);
        assert!(first.equals(&f.process.routing_table().await));
    }

    #[tokio::test]
    async fn test_sequence_numbers_and_suppression() {
        let f = fixture(AreaSettings {
            min_interval: Duration::from_secs(60),
            ..AreaSettings::default()
        })
        .await;
        add_b(&f.neighbors).await;

        assert_eq!(f.process.last_sequence().await, 0);
        assert_eq!(
            f.process.send_advertisement(false).await.unwrap(),
            SendOutcome::Sent { sequence: 1 }
        );
        let route = recv_route(&f.group).await;
        assert_eq!(route.sequence, 1);
        assert_eq!(route.ttl, 16);
        assert_eq!(route.entries, vector(&[('A', 0), ('B', 1)]));

        assert_eq!(
            f.process.send_advertisement(false).await.unwrap(),
            SendOutcome::Suppressed
        );
        assert_eq!(
            f.process.send_advertisement(true).await.unwrap(),
            SendOutcome::Sent { sequence: 2 }
        );
        assert_eq!(recv_route(&f.group).await.sequence, 2);

        // a changed vector goes out even inside the minimum interval
        f.neighbors
            .add(
                node('C'),
                "127.0.0.1:40102".parse().unwrap(),
                2,
                BTreeSet::from([AreaId::BACKBONE]),
            )
            .await
            .unwrap();
        assert_eq!(
            f.process.send_advertisement(false).await.unwrap(),
            SendOutcome::Sent { sequence: 3 }
        );
        assert_eq!(f.process.last_sequence().await, 3);
    }

    async fn assert_no_route(group: &tokio::net::UdpSocket) {
        let mut buf = [0u8; 512];
        assert!(
            tokio::time::timeout(Duration::from_millis(200), group.recv_from(&mut buf))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_unchanged_vector_goes_out_once_min_interval_elapsed() {
        let f = fixture(AreaSettings {
            min_interval: Duration::from_secs(60),
            ..AreaSettings::default()
        })
        .await;
        add_b(&f.neighbors).await;
        let t0 = Instant::now();

        assert_eq!(
            f.process.send_advertisement_at(false, t0).await.unwrap(),
            SendOutcome::Sent { sequence: 1 }
        );
        assert_eq!(
            f.process
                .send_advertisement_at(false, t0 + Duration::from_secs(30))
                .await
                .unwrap(),
            SendOutcome::Suppressed
        );
        assert_eq!(
            f.process
                .send_advertisement_at(false, t0 + Duration::from_secs(61))
                .await
                .unwrap(),
            SendOutcome::Sent { sequence: 2 }
        );
        assert_eq!(recv_route(&f.group).await.sequence, 1);
        assert_eq!(recv_route(&f.group).await.sequence, 2);
    }

    #[tokio::test]
    async fn test_changed_route_triggers_advertisement() {
        let f = fixture(AreaSettings::default()).await;
        add_b(&f.neighbors).await;

        let acceptance = f
            .process
            .process_route(node('B'), 1, Duration::from_secs(10), vector(&[('C', 1)]))
            .await
            .unwrap();
        assert_eq!(acceptance, Acceptance::Changed);
        let route = recv_route(&f.group).await;
        assert_eq!(route.sequence, 1);
        assert_eq!(route.entries, vector(&[('A', 0), ('B', 1)]));

        // same vector again: stored, but nothing new to say
        let acceptance = f
            .process
            .process_route(node('B'), 2, Duration::from_secs(10), vector(&[('C', 1)]))
            .await
            .unwrap();
        assert_eq!(acceptance, Acceptance::Unchanged);
        assert_no_route(&f.group).await;
        assert_eq!(f.process.last_sequence().await, 1);
    }

    #[tokio::test]
    async fn test_changed_route_without_send_on_change_stays_quiet() {
        let f = fixture(AreaSettings {
            send_on_change: false,
            ..AreaSettings::default()
        })
        .await;
        add_b(&f.neighbors).await;

        let acceptance = f
            .process
            .process_route(node('B'), 1, Duration::from_secs(10), vector(&[('C', 1)]))
            .await
            .unwrap();
        assert_eq!(acceptance, Acceptance::Changed);
        assert_no_route(&f.group).await;
        assert_eq!(f.process.last_sequence().await, 0);
    }

    #[test]
    fn test_ttl_saturates_on_huge_periods() {
        let settings = AreaSettings {
            period: Duration::MAX,
            ..AreaSettings::default()
        };
        assert_eq!(settings.ttl(), Duration::MAX);
        assert_eq!(settings.wire_ttl(), u32::MAX);
    }

    #[tokio::test]
    async fn test_stop_announce_timer() {
        let f = fixture(AreaSettings {
            period: Duration::from_secs(3600),
            ..AreaSettings::default()
        })
        .await;
        f.process.start_announce_timer().await;
        assert!(f.process.timer_running().await);
        f.process.stop_announce_timer().await;
        assert!(!f.process.timer_running().await);
    }
}
