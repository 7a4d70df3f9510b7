//! Member Table
//!
//! Tracks which peers are connected and the node names they announced.

use super::member::{Member, MemberStatus};
use libp2p::PeerId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, trace};

/// Connection and identity state for a single peer
#[derive(Debug, Clone)]
struct MemberState {
    name: Option<String>,
    address: Option<SocketAddr>,
    status: MemberStatus,
    connected_at: Instant,
}

impl MemberState {
    fn to_member(&self, peer_id: &PeerId) -> Member {
        Member {
            name: self.name.clone().unwrap_or_else(|| short_id(peer_id)),
            address: self.address,
            status: self.status,
        }
    }
}

/// Last characters of a peer id, enough to tell peers apart in logs.
pub fn short_id(peer_id: &PeerId) -> String {
    let b58 = peer_id.to_base58();
    b58[b58.len().saturating_sub(6)..].to_string()
}

/// Shared member table, written by the swarm event loop and read by callers.
#[derive(Clone)]
pub struct MemberTable {
    pub local_peer_id: PeerId,
    members: Arc<RwLock<HashMap<PeerId, MemberState>>>,
}

impl MemberTable {
    pub fn new(local_peer_id: PeerId) -> Self {
        Self {
            local_peer_id,
            members: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Record a new connection. Returns true when the peer was not alive before.
    pub async fn mark_connected(&self, peer_id: PeerId, address: Option<SocketAddr>) -> bool {
        let mut members = self.members.write().await;
        let entry = members.entry(peer_id).or_insert_with(|| MemberState {
            name: None,
            address,
            status: MemberStatus::Left,
            connected_at: Instant::now(),
        });

        let was_alive = entry.status == MemberStatus::Alive;
        if !was_alive {
            trace!(
                peer_id_short = %short_id(&peer_id),
                address = ?address,
                "Marking member as alive"
            );
            entry.status = MemberStatus::Alive;
            entry.connected_at = Instant::now();
            if address.is_some() {
                entry.address = address;
            }
        }
        !was_alive
    }

    /// Attach the announced node name. Returns the member when the name is new.
    pub async fn set_name(&self, peer_id: &PeerId, name: String) -> Option<Member> {
        let mut members = self.members.write().await;
        let state = members.get_mut(peer_id)?;
        if state.name.as_deref() == Some(name.as_str()) {
            return None;
        }
        debug!(
            peer_id_short = %short_id(peer_id),
            name = %name,
            "Member identified"
        );
        state.name = Some(name);
        Some(state.to_member(peer_id))
    }

    /// Mark a peer as gone, returning it if it was alive.
    pub async fn mark_left(&self, peer_id: &PeerId) -> Option<Member> {
        let mut members = self.members.write().await;
        let state = members.get_mut(peer_id)?;
        if state.status == MemberStatus::Left {
            return None;
        }
        state.status = MemberStatus::Left;
        trace!(
            peer_id_short = %short_id(peer_id),
            connected_for_ms = state.connected_at.elapsed().as_millis() as u64,
            "Marking member as left"
        );
        Some(state.to_member(peer_id))
    }

    pub async fn name_of(&self, peer_id: &PeerId) -> String {
        self.members
            .read()
            .await
            .get(peer_id)
            .and_then(|state| state.name.clone())
            .unwrap_or_else(|| short_id(peer_id))
    }

    pub async fn alive(&self) -> Vec<Member> {
        self.members
            .read()
            .await
            .iter()
            .filter(|(_, state)| state.status == MemberStatus::Alive)
            .map(|(peer_id, state)| state.to_member(peer_id))
            .collect()
    }

    /// Alive peers whose name passes the filter.
    pub async fn alive_peers(&self, filter: impl Fn(&str) -> bool) -> Vec<PeerId> {
        self.members
            .read()
            .await
            .iter()
            .filter(|(_, state)| state.status == MemberStatus::Alive)
            .filter(|(peer_id, state)| {
                filter(state.name.as_deref().unwrap_or(&short_id(peer_id)))
            })
            .map(|(peer_id, _)| *peer_id)
            .collect()
    }

    pub async fn alive_count(&self) -> usize {
        self.members
            .read()
            .await
            .values()
            .filter(|state| state.status == MemberStatus::Alive)
            .count()
    }
}
