//! Peer-layer configuration: which network preset to speak, and where to
//! bind (§6 "Three preset networks, selectable at startup").
//!
//! Grounded on the teacher's `rill-network::config::NetworkConfig`
//! (preset-driven `Default` plus named constructors); the concrete fields
//! differ since this protocol's presets are fixed magic/port/difficulty
//! triples rather than libp2p listen multiaddrs and bootstrap peer lists.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bitebi_core::constants::NetworkParams;

/// Whether the listening socket should set `SO_REUSEPORT` before binding,
/// so that an outbound dial from this process can share its local
/// endpoint with the listener (§4.8: "enabling symmetric address gossip").
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    pub params: NetworkParams,
    pub bind_ip: IpAddr,
    pub bind_port: u16,
    pub reuse_port: bool,
}

impl NetworkConfig {
    pub fn new(params: NetworkParams) -> Self {
        Self {
            bind_port: params.default_port,
            params,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            reuse_port: true,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.bind_port = port;
        self
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.bind_port)
    }
}
