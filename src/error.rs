use std::net::SocketAddr;

use crate::types::{AreaId, NodeId};

/// Malformed or short packet. The packet is dropped, nothing is answered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("packet too short")]
    Truncated,

    #[error("unknown packet type code {0}")]
    UnknownType(u8),

    #[error("invalid node address 0x{0:04x}")]
    InvalidNode(u16),

    #[error("invalid area 0x{0:04x}")]
    InvalidArea(u16),

    #[error("invalid distance {0}")]
    InvalidDistance(u32),

    #[error("invalid list length {0}")]
    InvalidEntryCount(u32),

    #[error("invalid area count {0}")]
    InvalidAreaCount(u32),

    #[error("message too long ({0} > 255)")]
    MessageTooLong(usize),

    #[error("path length too long ({len} > {max})")]
    PathTooLong { len: usize, max: usize },
}

/// Rejected neighbor-table operation; the table is left unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NeighborError {
    #[error("neighbor table is full ({0} entries)")]
    TableFull(usize),

    #[error("neighbor name {0} equals the local name")]
    LocalName(NodeId),

    #[error("address {addr} is already bound to neighbor {owner}")]
    AddressInUse { addr: SocketAddr, owner: NodeId },

    #[error("invalid distance {0}")]
    InvalidDistance(u32),

    #[error("invalid neighbor address '{0}'")]
    InvalidAddress(String),

    #[error("neighbor {0} not found")]
    NotFound(String),

    #[error("name {name} does not match {bound}, previously associated with {addr}")]
    NameMismatch {
        name: NodeId,
        bound: NodeId,
        addr: SocketAddr,
    },
}

/// Rejected ROUTE advertisement.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouteError {
    #[error("invalid vector - duplicated destination '{0}'")]
    DuplicateDestination(NodeId),

    #[error("area {0} is not served by this node")]
    AreaNotServed(AreaId),

    #[error("invalid list length '{0}'")]
    InvalidVectorLength(usize),
}

/// Errors surfaced by the routing coordinator.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Neighbor(#[from] NeighborError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error("no route to destination {0}")]
    NoRoute(NodeId),

    #[error("invalid neighbour ({0}) in routing table")]
    UnknownNextHop(NodeId),

    #[error("path trace would exceed {0} hops")]
    PathTooLong(usize),

    #[error("send failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("router startup failed: {0}")]
    Startup(String),
}
