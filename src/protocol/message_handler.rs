use log::{debug, info, warn};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::time::Duration;

use super::messages::{ByeMessage, HelloMessage, Packet, RouteMessage};
use super::neighbor_manager::NeighborUpdate;
use crate::error::RouterError;
use crate::router::{Dispatch, RoutingCoordinator};
use crate::types::AreaId;

/// Decodes one datagram and dispatches it by packet type.
pub async fn handle_packet(
    coordinator: &RoutingCoordinator,
    bytes: &[u8],
    from: SocketAddr,
) -> Result<Dispatch, RouterError> {
    let packet = match coordinator.codec.decode(bytes) {
        Ok(packet) => packet,
        Err(e) => {
            coordinator.stats.decode_error();
            warn!("Malformed packet from {} ({} bytes): {}", from, bytes.len(), e);
            return Err(e.into());
        }
    };
    if packet.sender() == coordinator.local {
        return Ok(Dispatch::Ignored);
    }
    debug!("Received {} from {} ({})", packet.name(), packet.sender(), from);

    match packet {
        Packet::Hello(hello) => handle_hello(coordinator, hello, from).await,
        Packet::Bye(bye) => handle_bye(coordinator, bye).await,
        Packet::Route(route) => handle_route(coordinator, route).await,
        Packet::Data(data) => coordinator.route(data).await,
    }
}

async fn handle_hello(
    coordinator: &RoutingCoordinator,
    hello: HelloMessage,
    from: SocketAddr,
) -> Result<Dispatch, RouterError> {
    let areas: BTreeSet<AreaId> = hello.areas.iter().copied().collect();
    let neighbors = &coordinator.neighbors;

    match neighbors.get(hello.sender).await {
        Some(known) => {
            let outcome = neighbors
                .update(hello.sender, from, hello.distance, areas.clone())
                .await?;
            if outcome == NeighborUpdate::Changed {
                let mut affected = areas;
                affected.extend(known.areas);
                coordinator.neighbors_changed(&affected).await;
            }
            Ok(Dispatch::NeighborUpdated(hello.sender, outcome))
        }
        None => {
            neighbors
                .add(hello.sender, from, hello.distance, areas.clone())
                .await?;
            info!("Discovered neighbor {} at {}", hello.sender, from);
            coordinator.neighbors_changed(&areas).await;
            Ok(Dispatch::NeighborAdded(hello.sender))
        }
    }
}

async fn handle_bye(
    coordinator: &RoutingCoordinator,
    bye: ByeMessage,
) -> Result<Dispatch, RouterError> {
    match coordinator.neighbors.remove(bye.sender, false).await {
        Ok(removed) => {
            info!("Neighbor {} said BYE", bye.sender);
            coordinator.neighbors_changed(&removed.areas).await;
            Ok(Dispatch::NeighborRemoved(bye.sender))
        }
        Err(_) => {
            debug!("BYE from unknown node {}", bye.sender);
            Ok(Dispatch::Ignored)
        }
    }
}

async fn handle_route(
    coordinator: &RoutingCoordinator,
    route: RouteMessage,
) -> Result<Dispatch, RouterError> {
    coordinator.stats.route_received();
    coordinator
        .process_route(
            route.sender,
            route.area,
            route.sequence,
            Duration::from_secs(route.ttl as u64),
            route.entries,
        )
        .await
}
