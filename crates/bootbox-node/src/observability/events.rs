//! Structured Events
//!
//! One function per domain event so field names stay consistent between the
//! issuer and claimant logs.
//!
//! Event types:
//! - `node_phase_changed` - Role state machine transitions
//! - `issuer_discovered` - Claimant found the issuer's advertisement
//! - `member_joined` / `member_left` - Group membership changes
//! - `token_granted` / `claim_denied` - Issuer decisions
//! - `token_received` - Claimant obtained the token
//! - `advertisement_published` / `advertisement_withdrawn` - Presence lifecycle

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use tracing::{debug, info};

/// Emit a node phase changed event
pub fn node_phase_changed(node: &str, previous_phase: &str, new_phase: &str) {
    info!(
        event_type = "node_phase_changed",
        node = %node,
        previous_phase = %previous_phase,
        new_phase = %new_phase,
        "Node phase changed"
    );
}

/// Emit an issuer discovered event
pub fn issuer_discovered(service: &str, host: &str, address: SocketAddrV4) {
    info!(
        event_type = "issuer_discovered",
        service = %service,
        host = %host,
        address = %address,
        "Issuer discovered"
    );
}

/// Emit a member joined event
pub fn member_joined(member: &str, address: Option<SocketAddr>) {
    info!(
        event_type = "member_joined",
        member = %member,
        address = ?address,
        "Member joined group"
    );
}

/// Emit a member left event
pub fn member_left(member: &str) {
    info!(
        event_type = "member_left",
        member = %member,
        "Member left group"
    );
}

/// Emit a token granted event
pub fn token_granted(requester: &str) {
    info!(
        event_type = "token_granted",
        requester = %requester,
        "Token granted"
    );
}

/// Emit a claim denied event
pub fn claim_denied(requester: &str, reason: &str) {
    info!(
        event_type = "claim_denied",
        requester = %requester,
        reason = %reason,
        "Claim denied"
    );
}

/// Emit a token received event
pub fn token_received(responder: &str, has_base_url: bool) {
    info!(
        event_type = "token_received",
        responder = %responder,
        has_base_url = has_base_url,
        "Token received"
    );
}

/// Emit an advertisement published event
pub fn advertisement_published(service: &str, addresses: &[Ipv4Addr], port: u16) {
    info!(
        event_type = "advertisement_published",
        service = %service,
        addresses = ?addresses,
        port = port,
        "Advertisement published"
    );
}

/// Emit an advertisement withdrawn event
pub fn advertisement_withdrawn(service: &str) {
    debug!(
        event_type = "advertisement_withdrawn",
        service = %service,
        "Advertisement withdrawn"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_emit() {
        // These functions should not panic when called
        node_phase_changed("node", "init", "discovering");
        issuer_discovered("bootstrap-v1", "issuer.local.", "10.0.0.5:7946".parse().unwrap());
        member_joined("worker", None);
        member_left("worker");
        token_granted("worker");
        claim_denied("worker", "token already issued");
        token_received("issuer", false);
        advertisement_published("bootstrap-v1", &[Ipv4Addr::new(10, 0, 0, 5)], 7946);
        advertisement_withdrawn("bootstrap-v1");
    }
}
