//! Swarm Builder
//!
//! Handles libp2p swarm creation with TCP transport, noise encryption,
//! and yamux multiplexing.

use super::super::behaviour::BootboxBehaviour;
use super::super::config::NetworkConfig;
use libp2p::{multiaddr::Protocol, noise, swarm::Swarm, tcp, yamux, Multiaddr, PeerId};
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// Creates a swarm listening on the configured bind address and port.
pub fn build_swarm(
    config: &NetworkConfig,
) -> Result<(Swarm<BootboxBehaviour>, PeerId), Box<dyn std::error::Error + Send + Sync>> {
    let config_for_swarm = config.clone();

    let mut swarm = libp2p::SwarmBuilder::with_new_identity()
        .with_tokio()
        .with_tcp(
            tcp::Config::default(),
            noise::Config::new,
            yamux::Config::default,
        )?
        .with_behaviour(move |key| BootboxBehaviour::new(key.public(), &config_for_swarm))?
        .with_swarm_config(|c| c.with_idle_connection_timeout(config.connection_idle_timeout))
        .build();

    let local_peer_id = *swarm.local_peer_id();
    debug!(peer_id = %local_peer_id, "Created swarm identity");

    let listen_addr = socket_multiaddr(SocketAddr::new(config.bind_address, config.bind_port));
    swarm.listen_on(listen_addr.clone())?;
    debug!(addr = %listen_addr, "Configured membership listen address");

    Ok((swarm, local_peer_id))
}

/// Multiaddr for a TCP socket address.
pub fn socket_multiaddr(addr: SocketAddr) -> Multiaddr {
    Multiaddr::from(addr.ip()).with(Protocol::Tcp(addr.port()))
}

/// Extract the IP and TCP port from a multiaddr, if it has both.
pub fn multiaddr_socket(addr: &Multiaddr) -> Option<SocketAddr> {
    let ip = addr.iter().find_map(|p| match p {
        Protocol::Ip4(ip) => Some(IpAddr::V4(ip)),
        Protocol::Ip6(ip) => Some(IpAddr::V6(ip)),
        _ => None,
    })?;
    let port = addr.iter().find_map(|p| match p {
        Protocol::Tcp(port) => Some(port),
        _ => None,
    })?;
    Some(SocketAddr::new(ip, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiaddr_socket_conversion() {
        let addr = SocketAddr::from(([192, 168, 1, 10], 7946));
        let multiaddr = socket_multiaddr(addr);
        assert_eq!(multiaddr.to_string(), "/ip4/192.168.1.10/tcp/7946");
        assert_eq!(multiaddr_socket(&multiaddr), Some(addr));
    }

    #[test]
    fn test_multiaddr_without_port() {
        let multiaddr: Multiaddr = "/ip4/10.0.0.1/udp/9000/quic-v1".parse().unwrap();
        assert_eq!(multiaddr_socket(&multiaddr), None);
    }
}
