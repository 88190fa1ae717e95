use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use super::routing_table::WireEntry;
use super::{
    DEFAULT_MAX_PATH_LEN, MAX_AREAS, MAX_DATA_MSG_LEN, MAX_ENTRY_VEC_LEN, PKT_BYE, PKT_DATA,
    PKT_HELLO, PKT_ROUTE,
};
use crate::error::ProtocolError;
use crate::types::{AreaId, NodeId};

/// Every packet exchanged between routers, one variant per type code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Packet {
    Hello(HelloMessage),
    Bye(ByeMessage),
    Route(RouteMessage),
    Data(DataMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloMessage {
    pub sender: NodeId,
    pub distance: u32,
    pub areas: Vec<AreaId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByeMessage {
    pub sender: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteMessage {
    pub sender: NodeId,
    pub area: AreaId,
    pub sequence: u32,
    /// Seconds the vector stays valid at the receiver.
    pub ttl: u32,
    pub entries: Vec<WireEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataMessage {
    pub sender: NodeId,
    pub sequence: u32,
    pub dest: NodeId,
    pub message: Vec<u8>,
    /// Nodes the packet went through, origin first.
    pub path: Vec<NodeId>,
}

impl Packet {
    pub fn type_code(&self) -> u8 {
        match self {
            Packet::Hello(_) => PKT_HELLO,
            Packet::Bye(_) => PKT_BYE,
            Packet::Route(_) => PKT_ROUTE,
            Packet::Data(_) => PKT_DATA,
        }
    }

    pub fn sender(&self) -> NodeId {
        match self {
            Packet::Hello(m) => m.sender,
            Packet::Bye(m) => m.sender,
            Packet::Route(m) => m.sender,
            Packet::Data(m) => m.sender,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Packet::Hello(_) => "HELLO",
            Packet::Bye(_) => "BYE",
            Packet::Route(_) => "ROUTE",
            Packet::Data(_) => "DATA",
        }
    }
}

/// Big-endian codec for the router packets.
#[derive(Debug, Clone, Copy)]
pub struct WireCodec {
    max_path_len: usize,
}

impl Default for WireCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PATH_LEN)
    }
}

impl WireCodec {
    pub fn new(max_path_len: usize) -> Self {
        Self {
            max_path_len: max_path_len.min(u8::MAX as usize),
        }
    }

    pub fn max_path_len(&self) -> usize {
        self.max_path_len
    }

    pub fn encode(&self, packet: &Packet) -> Result<Bytes, ProtocolError> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(packet.type_code());
        match packet {
            Packet::Hello(hello) => {
                if hello.areas.len() > MAX_AREAS {
                    return Err(ProtocolError::InvalidAreaCount(hello.areas.len() as u32));
                }
                buf.put_u16(hello.sender.to_wire());
                buf.put_u32(hello.distance);
                buf.put_u32(hello.areas.len() as u32);
                for area in &hello.areas {
                    buf.put_u16(area.to_wire());
                }
            }
            Packet::Bye(bye) => {
                buf.put_u16(bye.sender.to_wire());
            }
            Packet::Route(route) => {
                let n = route.entries.len();
                if n == 0 || n > MAX_ENTRY_VEC_LEN {
                    return Err(ProtocolError::InvalidEntryCount(n as u32));
                }
                buf.put_u16(route.sender.to_wire());
                buf.put_u16(route.area.to_wire());
                buf.put_u32(route.sequence);
                buf.put_u32(route.ttl);
                buf.put_u32(n as u32);
                for entry in &route.entries {
                    buf.put_u16(entry.dest.to_wire());
                    buf.put_u32(entry.dist);
                }
            }
            Packet::Data(data) => {
                if data.message.len() > MAX_DATA_MSG_LEN {
                    return Err(ProtocolError::MessageTooLong(data.message.len()));
                }
                if data.path.len() > self.max_path_len {
                    return Err(ProtocolError::PathTooLong {
                        len: data.path.len(),
                        max: self.max_path_len,
                    });
                }
                buf.put_u16(data.sender.to_wire());
                buf.put_u32(data.sequence);
                buf.put_u16(data.dest.to_wire());
                buf.put_u16(data.message.len() as u16);
                buf.put_slice(&data.message);
                buf.put_u8(data.path.len() as u8);
                for hop in &data.path {
                    buf.put_u8(hop.to_byte());
                }
            }
        }
        Ok(buf.freeze())
    }

    pub fn decode(&self, mut buf: &[u8]) -> Result<Packet, ProtocolError> {
        let code = read_u8(&mut buf)?;
        let sender = read_node(&mut buf)?;
        match code {
            PKT_HELLO => {
                let distance = read_u32(&mut buf)?;
                let count = read_u32(&mut buf)?;
                if count as usize > MAX_AREAS {
                    return Err(ProtocolError::InvalidAreaCount(count));
                }
                let mut areas = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let unit = read_u16(&mut buf)?;
                    areas.push(AreaId::from_wire(unit).ok_or(ProtocolError::InvalidArea(unit))?);
                }
                Ok(Packet::Hello(HelloMessage {
                    sender,
                    distance,
                    areas,
                }))
            }
            PKT_BYE => Ok(Packet::Bye(ByeMessage { sender })),
            PKT_ROUTE => {
                let unit = read_u16(&mut buf)?;
                let area = AreaId::from_wire(unit).ok_or(ProtocolError::InvalidArea(unit))?;
                let sequence = read_u32(&mut buf)?;
                let ttl = read_u32(&mut buf)?;
                let count = read_u32(&mut buf)?;
                if count == 0 || count as usize > MAX_ENTRY_VEC_LEN {
                    return Err(ProtocolError::InvalidEntryCount(count));
                }
                let mut entries = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let dest = read_node(&mut buf)?;
                    let dist = read_u32(&mut buf)?;
                    entries.push(WireEntry::new(dest, dist)?);
                }
                Ok(Packet::Route(RouteMessage {
                    sender,
                    area,
                    sequence,
                    ttl,
                    entries,
                }))
            }
            PKT_DATA => {
                let sequence = read_u32(&mut buf)?;
                let dest = read_node(&mut buf)?;
                let len = read_u16(&mut buf)? as usize;
                if len > MAX_DATA_MSG_LEN {
                    return Err(ProtocolError::MessageTooLong(len));
                }
                let message = read_bytes(&mut buf, len)?;
                let path_len = read_u8(&mut buf)? as usize;
                if path_len > self.max_path_len {
                    return Err(ProtocolError::PathTooLong {
                        len: path_len,
                        max: self.max_path_len,
                    });
                }
                let path = read_bytes(&mut buf, path_len)?
                    .into_iter()
                    .map(|b| NodeId::from_byte(b).ok_or(ProtocolError::InvalidNode(b as u16)))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Packet::Data(DataMessage {
                    sender,
                    sequence,
                    dest,
                    message,
                    path,
                }))
            }
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

fn read_u8(buf: &mut &[u8]) -> Result<u8, ProtocolError> {
    if buf.remaining() < 1 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u8())
}

fn read_u16(buf: &mut &[u8]) -> Result<u16, ProtocolError> {
    if buf.remaining() < 2 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u16())
}

fn read_u32(buf: &mut &[u8]) -> Result<u32, ProtocolError> {
    if buf.remaining() < 4 {
        return Err(ProtocolError::Truncated);
    }
    Ok(buf.get_u32())
}

fn read_node(buf: &mut &[u8]) -> Result<NodeId, ProtocolError> {
    let unit = read_u16(buf)?;
    NodeId::from_wire(unit).ok_or(ProtocolError::InvalidNode(unit))
}

fn read_bytes(buf: &mut &[u8], len: usize) -> Result<Vec<u8>, ProtocolError> {
    if buf.remaining() < len {
        return Err(ProtocolError::Truncated);
    }
    let out = buf[..len].to_vec();
    buf.advance(len);
    Ok(out)
}
