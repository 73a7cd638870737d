use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::Ipv6Addr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeAddrError {
    #[error("Invalid node address '{0}': expected an IPv6 address")]
    Invalid(String),
}

/// Network identity of a node in the mesh.
///
/// Edges, key records and secure associations are all keyed by this value;
/// nothing outside the owning component holds a pointer to the entry itself.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddr(Ipv6Addr);

impl NodeAddr {
    pub const fn new(addr: Ipv6Addr) -> Self {
        NodeAddr(addr)
    }

    /// Link-local address derived from a 64-bit interface identifier, the way
    /// constrained radios auto-configure (`fe80::<iid>`).
    pub fn link_local(iid: u64) -> Self {
        let segments = [
            0xfe80,
            0,
            0,
            0,
            (iid >> 48) as u16,
            (iid >> 32) as u16,
            (iid >> 16) as u16,
            iid as u16,
        ];
        NodeAddr(Ipv6Addr::from(segments))
    }

    pub fn ip(&self) -> Ipv6Addr {
        self.0
    }

    pub fn octets(&self) -> [u8; 16] {
        self.0.octets()
    }

    /// Short hex tag of the interface identifier, handy in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0.octets()[12..])
    }
}

impl From<Ipv6Addr> for NodeAddr {
    fn from(addr: Ipv6Addr) -> Self {
        NodeAddr(addr)
    }
}

impl fmt::Display for NodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NodeAddr {
    type Err = NodeAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('[').trim_end_matches(']');
        trimmed
            .parse::<Ipv6Addr>()
            .map(NodeAddr)
            .map_err(|_| NodeAddrError::Invalid(s.to_string()))
    }
}

impl Serialize for NodeAddr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeAddr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
