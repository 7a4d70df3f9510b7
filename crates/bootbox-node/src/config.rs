//! Node Configuration
//!
//! Command line flags with `BOOTBOX_*` environment fallbacks, resolved into a
//! validated [`NodeConfig`] once at startup.

use crate::discovery::validate_service_name;
use crate::network::NetworkConfig;
use crate::version::LONG_VERSION;
use bootbox_core::Role;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("node name must not be empty")]
    EmptyNodeName,

    #[error("service name '{0}' is not a valid DNS-SD label (1-15 letters, digits or hyphens)")]
    InvalidServiceName(String),

    #[error("issuer bind port must not be 0, it is advertised to claimants")]
    EphemeralPort,

    #[error("issuer marker must not be empty")]
    EmptyMarker,

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

#[derive(Debug, Parser)]
#[command(name = "bootbox")]
#[command(about = "Hand a one-time provisioning token to exactly one machine on the local network")]
#[command(version, long_version = LONG_VERSION)]
pub struct Cli {
    /// Node role: issuer (bootbox) or claimant (worker)
    #[arg(short = 't', long, env = "BOOTBOX_ROLE", default_value = "issuer")]
    pub role: Role,

    /// Membership transport port
    #[arg(short = 'p', long, env = "BOOTBOX_BIND_PORT", default_value_t = 7946)]
    pub bind_port: u16,

    /// Membership transport address
    #[arg(short = 'a', long, env = "BOOTBOX_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: IpAddr,

    /// Name this node is known by in the group (default: bootbox-<uuid>)
    #[arg(short = 'n', long, env = "BOOTBOX_NODE_NAME")]
    pub node_name: Option<String>,

    /// Service name advertised and looked up on the local network
    #[arg(long, env = "BOOTBOX_SERVICE_NAME", default_value = "bootbox-otp")]
    pub service_name: String,

    /// Marker identifying the issuer's advertisement
    #[arg(long, env = "BOOTBOX_MARKER", default_value = "Provisioner_Bootbox_OTP")]
    pub marker: String,

    /// Token handed to the winning claimant (default: random)
    #[arg(long, env = "BOOTBOX_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Base URL of the credential authority the token is valid against
    #[arg(long, env = "BOOTBOX_AUTHORITY_URL")]
    pub authority_url: Option<String>,

    /// Seconds between discovery lookups
    #[arg(long, default_value_t = 5)]
    pub poll_interval_secs: u64,

    /// Seconds to wait after joining before serving or claiming
    #[arg(long, default_value_t = 2)]
    pub settle_delay_secs: u64,

    /// Seconds to wait for answers to one claim
    #[arg(long, default_value_t = 5)]
    pub claim_timeout_secs: u64,

    /// Claim attempts when nobody answers
    #[arg(long, default_value_t = 3)]
    pub claim_attempts: u32,

    /// Stop advertising after this many seconds (default: until shutdown)
    #[arg(long)]
    pub advertise_secs: Option<u64>,

    /// Give up discovery after this many seconds (default: until shutdown)
    #[arg(long)]
    pub discovery_timeout_secs: Option<u64>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "BOOTBOX_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

/// Resolved node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub role: Role,
    pub network: NetworkConfig,
    pub service_name: String,
    pub marker: String,
    pub token: String,
    pub authority_url: Option<String>,
    pub poll_interval: Duration,
    pub settle_delay: Duration,
    pub claim_timeout: Duration,
    pub claim_attempts: u32,
    pub advertise_for: Option<Duration>,
    pub discovery_timeout: Option<Duration>,
    pub metrics_addr: Option<SocketAddr>,
}

impl NodeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.node_name.trim().is_empty() {
            return Err(ConfigError::EmptyNodeName);
        }
        if self.role == Role::Issuer && self.network.bind_port == 0 {
            return Err(ConfigError::EphemeralPort);
        }
        if validate_service_name(&self.service_name).is_err() {
            return Err(ConfigError::InvalidServiceName(self.service_name.clone()));
        }
        if self.marker.is_empty() {
            return Err(ConfigError::EmptyMarker);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Zero("poll interval"));
        }
        if self.claim_timeout.is_zero() {
            return Err(ConfigError::Zero("claim timeout"));
        }
        if self.claim_attempts == 0 {
            return Err(ConfigError::Zero("claim attempts"));
        }
        if self.advertise_for.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Zero("advertise duration"));
        }
        if self.discovery_timeout.is_some_and(|d| d.is_zero()) {
            return Err(ConfigError::Zero("discovery timeout"));
        }
        Ok(())
    }
}

impl TryFrom<Cli> for NodeConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        let node_name = cli
            .node_name
            .unwrap_or_else(|| format!("bootbox-{}", uuid::Uuid::new_v4()));
        let token = cli
            .token
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let config = Self {
            role: cli.role,
            network: NetworkConfig::new(node_name, cli.bind_address, cli.bind_port),
            service_name: cli.service_name,
            marker: cli.marker,
            token,
            authority_url: cli.authority_url,
            poll_interval: Duration::from_secs(cli.poll_interval_secs),
            settle_delay: Duration::from_secs(cli.settle_delay_secs),
            claim_timeout: Duration::from_secs(cli.claim_timeout_secs),
            claim_attempts: cli.claim_attempts,
            advertise_for: cli.advertise_secs.map(Duration::from_secs),
            discovery_timeout: cli.discovery_timeout_secs.map(Duration::from_secs),
            metrics_addr: cli.metrics_addr,
        };
        config.validate()?;
        Ok(config)
    }
}
