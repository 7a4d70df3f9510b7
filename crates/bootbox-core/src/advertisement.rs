//! Issuer Advertisement
//!
//! The record an issuer publishes on the local network so claimants can find
//! it without any pre-shared address.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Metadata key carrying the issuer marker in the published record.
pub const MARKER_KEY: &str = "marker";

/// Discoverable record identifying a node as the issuer for a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    /// Service the issuer provisions tokens for
    pub service_name: String,
    /// Host identity (usually the hostname)
    pub host_identity: String,
    /// IPv4 addresses claimants may join on
    pub addresses: Vec<Ipv4Addr>,
    /// Membership port on those addresses
    pub port: u16,
    /// Opaque marker meaning "this is the issuer for `service_name`"
    pub marker: String,
}

impl Advertisement {
    /// Metadata published alongside the record.
    pub fn metadata(&self) -> HashMap<String, String> {
        HashMap::from([(MARKER_KEY.to_string(), self.marker.clone())])
    }

    /// Whether a record's metadata carries the expected marker.
    pub fn matches_marker(metadata: &HashMap<String, String>, marker: &str) -> bool {
        metadata.get(MARKER_KEY).map(String::as_str) == Some(marker)
    }
}
