//! Member Types

use std::net::SocketAddr;

/// A node known to the group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Node name announced by the member
    pub name: String,
    /// Address the connection was observed on
    pub address: Option<SocketAddr>,
    pub status: MemberStatus,
}

/// Liveness of a member as seen from this node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberStatus {
    Alive,
    Left,
}
