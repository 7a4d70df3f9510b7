//! libp2p NetworkBehaviour Configuration
//!
//! Combines the protocols the membership substrate needs:
//! - Identify: exchanges node names (carried as the agent version)
//! - Request-response: JSON-encoded fan-out queries and their answers

use super::config::NetworkConfig;
use crate::version::PROTOCOL_VERSION;
use libp2p::{identify, request_response, swarm::NetworkBehaviour, StreamProtocol};
use serde::{Deserialize, Serialize};

/// Protocol used for group queries.
pub const QUERY_PROTOCOL: StreamProtocol = StreamProtocol::new("/bootbox/query/1.0.0");

/// A named query sent to one member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRequest {
    pub name: String,
    pub payload: Vec<u8>,
}

/// A member's answer to a [`GroupRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupResponse {
    pub payload: Vec<u8>,
}

/// Combined network behaviour for the membership group.
#[derive(NetworkBehaviour)]
pub struct BootboxBehaviour {
    pub identify: identify::Behaviour,
    pub rpc: request_response::json::Behaviour<GroupRequest, GroupResponse>,
}

impl BootboxBehaviour {
    pub fn new(local_public_key: libp2p::identity::PublicKey, config: &NetworkConfig) -> Self {
        let identify = identify::Behaviour::new(
            identify::Config::new(PROTOCOL_VERSION.to_string(), local_public_key)
                .with_agent_version(config.node_name.clone()),
        );

        let rpc = request_response::json::Behaviour::new(
            [(QUERY_PROTOCOL, request_response::ProtocolSupport::Full)],
            request_response::Config::default().with_request_timeout(config.request_timeout),
        );

        Self { identify, rpc }
    }
}
