//! Network Configuration
//!
//! Transport and membership tunables, with defaults suited to a LAN.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Network configuration with sensible defaults
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Node name announced to the group
    pub node_name: String,

    /// Address the membership transport listens on
    pub bind_address: IpAddr,

    /// Port the membership transport listens on
    pub bind_port: u16,

    /// Idle connection timeout before closing
    pub connection_idle_timeout: Duration,

    /// Upper bound for a single request/response exchange
    pub request_timeout: Duration,

    /// How long a join may take before it is reported as failed
    pub join_timeout: Duration,

    /// Initial interval between join retries
    pub join_backoff_initial: Duration,

    /// Maximum interval between join retries
    pub join_backoff_max: Duration,

    /// Capacity of the group event channel
    pub event_buffer: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            node_name: "bootbox".to_string(),
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            bind_port: 7946,
            connection_idle_timeout: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(10),
            join_backoff_initial: Duration::from_millis(250),
            join_backoff_max: Duration::from_secs(2),
            event_buffer: 256,
        }
    }
}

impl NetworkConfig {
    pub fn new(node_name: impl Into<String>, bind_address: IpAddr, bind_port: u16) -> Self {
        Self {
            node_name: node_name.into(),
            bind_address,
            bind_port,
            ..Self::default()
        }
    }
}
