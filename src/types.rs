use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Rejected textual or wire form of a node or area identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}'")]
pub struct InvalidId {
    pub kind: &'static str,
    pub value: String,
}

/// Address of a router node: a single uppercase letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct NodeId(char);

impl NodeId {
    pub fn new(c: char) -> Option<Self> {
        c.is_ascii_uppercase().then_some(Self(c))
    }

    pub fn as_char(self) -> char {
        self.0
    }

    /// Two-byte big-endian code unit used by HELLO/BYE/ROUTE/DATA headers.
    pub fn to_wire(self) -> u16 {
        self.0 as u16
    }

    pub fn from_wire(unit: u16) -> Option<Self> {
        char::from_u32(unit as u32).and_then(Self::new)
    }

    /// Single-byte form used inside DATA path traces.
    pub fn to_byte(self) -> u8 {
        self.0 as u8
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        Self::new(byte as char)
    }
}

impl TryFrom<char> for NodeId {
    type Error = InvalidId;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Self::new(c).ok_or_else(|| InvalidId {
            kind: "node id",
            value: c.to_string(),
        })
    }
}

impl From<NodeId> for char {
    fn from(id: NodeId) -> char {
        id.0
    }
}

impl FromStr for NodeId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::try_from(c),
            _ => Err(InvalidId {
                kind: "node id",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Routing area identifier: a single ASCII letter or digit ('0' is the backbone).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "char", into = "char")]
pub struct AreaId(char);

impl AreaId {
    pub const BACKBONE: AreaId = AreaId('0');

    pub fn new(c: char) -> Option<Self> {
        c.is_ascii_alphanumeric().then_some(Self(c))
    }

    pub fn as_char(self) -> char {
        self.0
    }

    pub fn to_wire(self) -> u16 {
        self.0 as u16
    }

    pub fn from_wire(unit: u16) -> Option<Self> {
        char::from_u32(unit as u32).and_then(Self::new)
    }

    pub fn is_backbone(self) -> bool {
        self == Self::BACKBONE
    }
}

impl TryFrom<char> for AreaId {
    type Error = InvalidId;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Self::new(c).ok_or_else(|| InvalidId {
            kind: "area id",
            value: c.to_string(),
        })
    }
}

impl From<AreaId> for char {
    fn from(id: AreaId) -> char {
        id.0
    }
}

impl FromStr for AreaId {
    type Err = InvalidId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => Self::try_from(c),
            _ => Err(InvalidId {
                kind: "area id",
                value: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for AreaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
