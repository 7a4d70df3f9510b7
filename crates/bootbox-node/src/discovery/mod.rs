//! Local-Network Discovery
//!
//! How a claimant finds the issuer without any pre-shared address:
//! - `mdns`: multicast DNS service discovery substrate
//! - `memory`: in-process substrate for tests
//! - `interfaces`: physical IPv4 addresses worth advertising
//! - `advertiser`: issuer side, keeps the advertisement published
//! - `resolver`: claimant side, polls until the issuer shows up

pub mod advertiser;
pub mod interfaces;
pub mod mdns;
pub mod memory;
pub mod resolver;

pub use advertiser::PresenceAdvertiser;
pub use mdns::MdnsDiscovery;
pub use resolver::AddressResolver;

use async_trait::async_trait;
use bootbox_core::Advertisement;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::sync::mpsc;

/// Errors from the discovery substrate
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("mDNS error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    #[error("invalid service name '{0}'")]
    InvalidServiceName(String),

    #[error("failed to publish advertisement: {0}")]
    Publish(String),

    #[error("discovery substrate unavailable")]
    Unavailable,
}

/// A record returned by a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Fully qualified instance name
    pub name: String,
    pub host: String,
    pub addresses: Vec<Ipv4Addr>,
    pub port: u16,
    pub metadata: HashMap<String, String>,
}

/// Proof that an advertisement is published. Consumed by unpublish.
#[derive(Debug, PartialEq, Eq)]
pub struct Registration {
    pub service_name: String,
    pub instance: String,
}

/// Capability offered by a local discovery substrate.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    /// Publish a record until unpublished.
    async fn publish(&self, advertisement: &Advertisement) -> Result<Registration, DiscoveryError>;

    /// Withdraw a record.
    async fn unpublish(&self, registration: Registration) -> Result<(), DiscoveryError>;

    /// Run one lookup. Records arrive on the returned channel, which closes
    /// once `window` has elapsed.
    async fn lookup(
        &self,
        service_name: &str,
        window: Duration,
    ) -> Result<mpsc::Receiver<ServiceRecord>, DiscoveryError>;
}

/// Service names are used as a DNS-SD service label.
pub fn validate_service_name(name: &str) -> Result<(), DiscoveryError> {
    let valid = !name.is_empty()
        && name.len() <= 15
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && !name.starts_with('-')
        && !name.ends_with('-');
    if valid {
        Ok(())
    } else {
        Err(DiscoveryError::InvalidServiceName(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_name_validation() {
        assert!(validate_service_name("bootstrap-v1").is_ok());
        assert!(validate_service_name("bootbox-otp").is_ok());
        assert!(validate_service_name("").is_err());
        assert!(validate_service_name("provisioner-otp-service").is_err());
        assert!(validate_service_name("has space").is_err());
        assert!(validate_service_name("-leading").is_err());
    }
}
