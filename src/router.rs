use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::algorithms::{AreaAggregation, PrimaryArea};
use crate::config::RouterConfig;
use crate::error::{ProtocolError, RouteError, RouterError};
use crate::network::Transport;
use crate::protocol::message_handler;
use crate::protocol::task_manager::PeriodicTask;
use crate::protocol::{
    Acceptance, AreaRoutingProcess, DataMessage, MAX_DATA_MSG_LEN, MAX_ENTRY_VEC_LEN,
    NeighborInfo, NeighborTable, NeighborUpdate, Packet, RoutingTable, WireCodec, WireEntry,
};
use crate::stats::{RouterStats, StatsSnapshot};
use crate::types::{AreaId, NodeId};

const RECV_BUFFER_LEN: usize = 2048;

/// What became of a received or locally originated packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Looped back from the local node, or nothing to act on.
    Ignored,
    NeighborAdded(NodeId),
    NeighborUpdated(NodeId, NeighborUpdate),
    NeighborRemoved(NodeId),
    Route(Acceptance),
    Delivered,
    Forwarded(NodeId),
}

/// A DATA payload addressed to this node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub source: NodeId,
    pub sequence: u32,
    pub message: Vec<u8>,
    /// Every node the packet went through, this one last.
    pub path: Vec<NodeId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStatus {
    pub name: NodeId,
    pub areas: Vec<AreaId>,
    pub local_addr: Option<SocketAddr>,
    pub group: SocketAddr,
    pub group_member: bool,
    pub running: bool,
    pub neighbors: usize,
    pub routes: usize,
    pub aggregation: String,
    pub stats: StatsSnapshot,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertisementView {
    pub origin: NodeId,
    pub seq: u32,
    pub ttl_secs: u64,
    pub vector: Vec<WireEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AreaStatus {
    pub area: AreaId,
    pub last_sequence: u32,
    pub advertisements: Vec<AdvertisementView>,
    pub routes: RoutingTable,
}

/// One router node: the neighbor table, one routing process per area, the
/// transport, and DATA forwarding.
pub struct RoutingCoordinator {
    pub(crate) local: NodeId,
    pub(crate) area_order: Vec<AreaId>,
    pub(crate) areas: BTreeMap<AreaId, Arc<AreaRoutingProcess>>,
    pub(crate) neighbors: Arc<NeighborTable>,
    pub(crate) transport: Arc<Transport>,
    pub(crate) codec: WireCodec,
    pub(crate) stats: Arc<RouterStats>,
    aggregation: Box<dyn AreaAggregation>,
    data_seq: AtomicU32,
    inbox_tx: mpsc::UnboundedSender<Delivery>,
    inbox_rx: Mutex<Option<mpsc::UnboundedReceiver<Delivery>>>,
    area_version: Arc<watch::Sender<u64>>,
    table_version: watch::Sender<u64>,
    published: Mutex<Option<RoutingTable>>,
    publisher: Mutex<Option<JoinHandle<()>>>,
    hello_interval: Option<Duration>,
    hello_task: Mutex<Option<PeriodicTask>>,
    receiver: Mutex<Option<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    started_at: DateTime<Utc>,
}

impl RoutingCoordinator {
    pub async fn bind(config: &RouterConfig) -> Result<Arc<Self>, RouterError> {
        Self::with_aggregation(config, Box::new(PrimaryArea)).await
    }

    /// Binds the sockets and builds one routing process per configured area.
    /// The engine does not run until [`RoutingCoordinator::start`].
    pub async fn with_aggregation(
        config: &RouterConfig,
        aggregation: Box<dyn AreaAggregation>,
    ) -> Result<Arc<Self>, RouterError> {
        config
            .validate()
            .map_err(|e| RouterError::Startup(e.to_string()))?;
        let transport = Transport::bind(config.local_addr, config.multicast_addr)
            .await
            .map_err(|e| {
                RouterError::Startup(format!(
                    "cannot bind {} / {}: {}",
                    config.local_addr, config.multicast_addr, e
                ))
            })?;
        let transport = Arc::new(transport);
        let codec = WireCodec::new(config.max_path_len);
        let stats = Arc::new(RouterStats::new());
        let neighbors = Arc::new(NeighborTable::new(
            config.name,
            config.areas.clone(),
            config.max_neighbors,
            transport.clone(),
            codec,
            stats.clone(),
        ));
        let (area_tx, _) = watch::channel(0u64);
        let area_version = Arc::new(area_tx);
        let (table_version, _) = watch::channel(0u64);
        let settings = config.area_settings();

        let areas: BTreeMap<AreaId, Arc<AreaRoutingProcess>> = config
            .areas
            .iter()
            .map(|area| {
                let process = AreaRoutingProcess::new(
                    *area,
                    config.name,
                    settings.clone(),
                    neighbors.clone(),
                    transport.clone(),
                    codec,
                    stats.clone(),
                    area_version.clone(),
                );
                (*area, Arc::new(process))
            })
            .collect();

        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        info!(
            "Router {} ready: areas {:?}, aggregation {}",
            config.name,
            config.areas,
            aggregation.name()
        );
        Ok(Arc::new(Self {
            local: config.name,
            area_order: config.areas.clone(),
            areas,
            neighbors,
            transport,
            codec,
            stats,
            aggregation,
            data_seq: AtomicU32::new(1),
            inbox_tx,
            inbox_rx: Mutex::new(Some(inbox_rx)),
            area_version,
            table_version,
            published: Mutex::new(None),
            publisher: Mutex::new(None),
            hello_interval: config.hello_interval(),
            hello_task: Mutex::new(None),
            receiver: Mutex::new(None),
            shutdown_tx,
            running: AtomicBool::new(false),
            started_at: Utc::now(),
        }))
    }

    pub fn local_name(&self) -> NodeId {
        self.local
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.local_addr().ok()
    }

    pub fn served_areas(&self) -> &[AreaId] {
        &self.area_order
    }

    pub fn area(&self, area: AreaId) -> Option<&Arc<AreaRoutingProcess>> {
        self.areas.get(&area)
    }

    pub fn neighbors(&self) -> &Arc<NeighborTable> {
        &self.neighbors
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Starts the receive task, computes and announces every area, then
    /// arms the area timers. A stopped router can be started again.
    pub async fn start(self: &Arc<Self>) -> Result<(), RouterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(e) = self.transport.rejoin_group() {
            self.running.store(false, Ordering::SeqCst);
            return Err(RouterError::Startup(format!(
                "cannot join {}: {}",
                self.transport.group(),
                e
            )));
        }
        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let coordinator = self.clone();
        *self.receiver.lock().await = Some(tokio::spawn(async move {
            coordinator.receive_loop(shutdown_rx).await;
        }));

        let area_rx = self.area_version.subscribe();
        let shutdown_rx = self.shutdown_tx.subscribe();
        let coordinator = self.clone();
        *self.publisher.lock().await = Some(tokio::spawn(async move {
            coordinator.publish_loop(area_rx, shutdown_rx).await;
        }));

        for area in self.ordered_areas(None) {
            if let Some(process) = self.areas.get(&area) {
                process.network_changed(true).await;
                process.start_announce_timer().await;
            }
        }

        if let Some(period) = self.hello_interval {
            let weak: Weak<Self> = Arc::downgrade(self);
            *self.hello_task.lock().await = Some(PeriodicTask::spawn("hello", period, move || {
                let weak = weak.clone();
                async move {
                    if let Some(coordinator) = weak.upgrade() {
                        coordinator.neighbors.send_hello_all().await;
                    }
                }
            }));
        }
        info!("Router {} started", self.local);
        Ok(())
    }

    /// Cancels the timers and the background tasks, optionally says BYE to
    /// every neighbor, and leaves the multicast group.
    pub async fn stop(&self, send_bye: bool) {
        if self.running.swap(false, Ordering::SeqCst) {
            for process in self.areas.values() {
                process.stop_announce_timer().await;
            }
            if let Some(task) = self.hello_task.lock().await.take() {
                task.stop().await;
            }
            self.shutdown_tx.send_replace(true);
            for task in [&self.receiver, &self.publisher] {
                if let Some(handle) = task.lock().await.take() {
                    handle.abort();
                    let _ = handle.await;
                }
            }
        }
        if send_bye {
            let failures = self.neighbors.clear_with_bye().await;
            if !failures.is_empty() {
                warn!("BYE not delivered to {} neighbor(s)", failures.len());
            }
        }
        if let Err(e) = self.transport.leave_group() {
            warn!("Leaving the multicast group failed: {}", e);
        }
        info!("Router {} stopped", self.local);
    }

    /// Relays area table changes to subscribers when the composed table
    /// actually differs.
    async fn publish_loop(
        self: Arc<Self>,
        mut area_rx: watch::Receiver<u64>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        self.publish_table().await;
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
                changed = area_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    self.publish_table().await;
                }
            }
        }
    }

    /// Bumps the table-change watch if the composed table differs from the
    /// last published one.
    pub(crate) async fn publish_table(&self) -> bool {
        let table = self.routing_table().await;
        let mut published = self.published.lock().await;
        if published.as_ref().is_some_and(|last| last.equals(&table)) {
            return false;
        }
        *published = Some(table);
        self.table_version.send_modify(|v| *v += 1);
        true
    }

    async fn receive_loop(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut buf = vec![0u8; RECV_BUFFER_LEN];
        loop {
            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Receive loop shutting down");
                        break;
                    }
                }
                received = self.transport.recv(&mut buf) => match received {
                    Ok((len, from)) => {
                        if let Err(e) = self.handle_packet(&buf[..len], from).await {
                            warn!("Packet from {} dropped: {}", from, e);
                        }
                    }
                    Err(e) => error!("Receive error: {}", e),
                },
            }
        }
    }

    /// Entry point for a received datagram.
    pub async fn handle_packet(
        &self,
        bytes: &[u8],
        from: SocketAddr,
    ) -> Result<Dispatch, RouterError> {
        message_handler::handle_packet(self, bytes, from).await
    }

    /// Areas served by this node, non-backbone areas first and the backbone
    /// last, optionally restricted to `only`.
    pub(crate) fn ordered_areas(&self, only: Option<&BTreeSet<AreaId>>) -> Vec<AreaId> {
        let selected = |area: &&AreaId| only.is_none_or(|set| set.contains(*area));
        let mut ordered: Vec<AreaId> = self
            .area_order
            .iter()
            .filter(|a| !a.is_backbone())
            .filter(selected)
            .copied()
            .collect();
        ordered.extend(
            self.area_order
                .iter()
                .filter(|a| a.is_backbone())
                .filter(selected)
                .copied(),
        );
        ordered
    }

    pub(crate) async fn neighbors_changed(&self, areas: &BTreeSet<AreaId>) {
        if !self.is_running() {
            return;
        }
        for area in self.ordered_areas(Some(areas)) {
            if let Some(process) = self.areas.get(&area) {
                process.network_changed(false).await;
            }
        }
    }

    pub async fn add_neighbor(
        &self,
        name: NodeId,
        ip: &str,
        port: u16,
        distance: u32,
        areas: BTreeSet<AreaId>,
    ) -> Result<bool, RouterError> {
        let addr = NeighborTable::resolve(ip, port).await?;
        let mut affected = areas.clone();
        if let Some(previous) = self.neighbors.get(name).await {
            affected.extend(previous.areas);
        }
        let is_new = self.neighbors.add(name, addr, distance, areas).await?;
        self.neighbors_changed(&affected).await;
        Ok(is_new)
    }

    pub async fn remove_neighbor(&self, name: NodeId, send_bye: bool) -> Result<(), RouterError> {
        let removed = self.neighbors.remove(name, send_bye).await?;
        self.neighbors_changed(&removed.areas).await;
        Ok(())
    }

    /// Validates a ROUTE and hands it to the process of its area.
    pub async fn process_route(
        &self,
        sender: NodeId,
        area: AreaId,
        seq: u32,
        ttl: Duration,
        vector: Vec<WireEntry>,
    ) -> Result<Dispatch, RouterError> {
        if sender == self.local {
            return Ok(Dispatch::Ignored);
        }
        let process = self
            .areas
            .get(&area)
            .ok_or(RouteError::AreaNotServed(area))?;
        if vector.is_empty() || vector.len() > MAX_ENTRY_VEC_LEN {
            return Err(RouteError::InvalidVectorLength(vector.len()).into());
        }
        let acceptance = process.process_route(sender, seq, ttl, vector).await?;
        Ok(Dispatch::Route(acceptance))
    }

    /// Originates a DATA packet from this node.
    pub async fn send_data(&self, dest: NodeId, message: &[u8]) -> Result<Dispatch, RouterError> {
        if message.len() > MAX_DATA_MSG_LEN {
            return Err(ProtocolError::MessageTooLong(message.len()).into());
        }
        let data = DataMessage {
            sender: self.local,
            sequence: self.data_seq.fetch_add(1, Ordering::Relaxed),
            dest,
            message: message.to_vec(),
            path: Vec::new(),
        };
        self.route(data).await
    }

    /// Delivers locally or forwards to the next hop towards `data.dest`.
    pub async fn route(&self, mut data: DataMessage) -> Result<Dispatch, RouterError> {
        if data.dest == self.local {
            self.deliver(data);
            return Ok(Dispatch::Delivered);
        }
        let result = self.forward(&mut data).await;
        if let Err(e) = &result {
            self.stats.data_dropped();
            warn!(
                "DATA {} -> {} (seq {}) dropped: {}",
                data.sender, data.dest, data.sequence, e
            );
        }
        result
    }

    async fn forward(&self, data: &mut DataMessage) -> Result<Dispatch, RouterError> {
        let table = self.routing_table().await;
        let hop = table
            .next_hop(data.dest)
            .filter(|hop| *hop != self.local)
            .ok_or(RouterError::NoRoute(data.dest))?;
        let neighbor = self
            .neighbors
            .get(hop)
            .await
            .ok_or(RouterError::UnknownNextHop(hop))?;

        data.path.push(self.local);
        if data.path.len() > self.codec.max_path_len() {
            return Err(RouterError::PathTooLong(self.codec.max_path_len()));
        }
        let bytes = self.codec.encode(&Packet::Data(data.clone()))?;
        self.transport.send_to(&bytes, neighbor.addr).await?;
        self.stats.data_sent();
        debug!(
            "DATA {} -> {} forwarded to {} ({})",
            data.sender, data.dest, hop, neighbor.addr
        );
        Ok(Dispatch::Forwarded(hop))
    }

    fn deliver(&self, data: DataMessage) {
        let mut path = data.path;
        path.push(self.local);
        info!(
            "DATA from {} (seq {}) delivered: {} bytes, path {:?}",
            data.sender,
            data.sequence,
            data.message.len(),
            path
        );
        self.stats.data_delivered();
        let delivery = Delivery {
            source: data.sender,
            sequence: data.sequence,
            message: data.message,
            path,
        };
        if self.inbox_tx.send(delivery).is_err() {
            debug!("Local inbox closed, delivery discarded");
        }
    }

    /// Receiver of locally delivered DATA; handed out once.
    pub async fn take_inbox(&self) -> Option<mpsc::UnboundedReceiver<Delivery>> {
        self.inbox_rx.lock().await.take()
    }

    /// The externally visible table, composed from the area tables.
    pub async fn routing_table(&self) -> RoutingTable {
        let mut tables = Vec::with_capacity(self.area_order.len());
        for area in &self.area_order {
            if let Some(process) = self.areas.get(area) {
                tables.push((*area, process.routing_table().await));
            }
        }
        self.aggregation.compose(&tables)
    }

    /// Bumped every time the composed routing table changes.
    pub fn subscribe_table_changes(&self) -> watch::Receiver<u64> {
        self.table_version.subscribe()
    }

    /// Recomputes and re-announces every area.
    pub async fn recalculate(&self) {
        for area in self.ordered_areas(None) {
            if let Some(process) = self.areas.get(&area) {
                process.network_changed(true).await;
            }
        }
        self.publish_table().await;
    }

    pub async fn neighbor_snapshot(&self) -> Vec<NeighborInfo> {
        self.neighbors.snapshot(Instant::now()).await
    }

    pub async fn status(&self) -> RouterStatus {
        RouterStatus {
            name: self.local,
            areas: self.area_order.clone(),
            local_addr: self.local_addr(),
            group: self.transport.group(),
            group_member: self.transport.is_member(),
            running: self.is_running(),
            neighbors: self.neighbors.len().await,
            routes: self.routing_table().await.len(),
            aggregation: self.aggregation.name().to_string(),
            stats: self.stats.snapshot(),
            started_at: self.started_at,
        }
    }

    pub async fn area_status(&self) -> Vec<AreaStatus> {
        let now = Instant::now();
        let mut out = Vec::with_capacity(self.area_order.len());
        for area in &self.area_order {
            let Some(process) = self.areas.get(area) else {
                continue;
            };
            let advertisements = process
                .advertisements(now)
                .await
                .into_iter()
                .map(|info| AdvertisementView {
                    origin: info.origin,
                    seq: info.seq,
                    ttl_secs: info.ttl.as_secs(),
                    vector: info.vector,
                })
                .collect();
            out.push(AreaStatus {
                area: *area,
                last_sequence: process.last_sequence().await,
                advertisements,
                routes: process.routing_table().await,
            });
        }
        out
    }
}
