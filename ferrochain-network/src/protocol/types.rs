//! Wire-level value types shared across message payloads.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

bitflags! {
    #[derive(Serialize, Deserialize)]
    pub struct PeerServices: u64 {
        const NONE = 0;
        const NETWORK = 1 << 0;
    }
}

/// A 16-byte IP (IPv4-mapped if the peer is IPv4) plus big-endian port and
/// the service flags the peer advertised.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct NetworkAddress {
    pub services: u64,
    pub ip: [u8; 16],
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(ip: IpAddr, port: u16, services: u64) -> Self {
        NetworkAddress {
            services,
            ip: ip_to_mapped_bytes(ip),
            port,
        }
    }

    pub fn ip_addr(&self) -> Ipv6Addr {
        Ipv6Addr::from(self.ip)
    }

    /// Canonical 18-byte address-book key: 16-byte IP followed by
    /// big-endian port. Two endpoints with the same key are the same host.
    pub fn key(&self) -> [u8; 18] {
        let mut out = [0u8; 18];
        out[..16].copy_from_slice(&self.ip);
        out[16..].copy_from_slice(&self.port.to_be_bytes());
        out
    }

    pub fn is_routable_placeholder(&self) -> bool {
        self.port != 0 && self.ip != [0u8; 16]
    }
}

/// Rewrites an `::x.x.x.x` (IPv4-compatible) address as `::ffff:x.x.x.x`
/// (IPv4-mapped), guaranteeing a single canonical key across both forms.
pub fn ip_to_mapped_bytes(ip: IpAddr) -> [u8; 16] {
    match ip {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().octets(),
        IpAddr::V6(v6) => {
            let octets = v6.octets();
            if octets[..12] == [0u8; 12] && octets[12..] != [0, 0, 0, 0] {
                // IPv4-compatible (::x.x.x.x, not already ::ffff:x.x.x.x).
                let v4 = Ipv4Addr::new(octets[12], octets[13], octets[14], octets[15]);
                v4.to_ipv6_mapped().octets()
            } else {
                octets
            }
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
pub struct TimestampedAddress {
    pub timestamp: u32,
    pub address: NetworkAddress,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize, Deserialize)]
#[repr(u32)]
pub enum InventoryType {
    Error = 0,
    MsgBlock = 2,
}

impl InventoryType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0 => Some(InventoryType::Error),
            2 => Some(InventoryType::MsgBlock),
            _ => None,
        }
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub struct InventoryVector {
    pub kind: InventoryType,
    pub hash: [u8; 32],
}
