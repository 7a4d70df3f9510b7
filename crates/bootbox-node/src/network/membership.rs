//! Group Membership Adapter
//!
//! Thin facade over the membership substrate. The substrate owns liveness and
//! the broadcast request/response primitive; this module defines the surface
//! the rest of the node consumes and the [`GroupHandle`] that guarantees the
//! group is released exactly once.

use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};

pub use super::types::{Member, MemberStatus};

/// Errors surfaced by the membership substrate.
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    #[error("failed to create membership group: {0}")]
    Create(String),

    #[error("failed to join {addr}: {reason}")]
    Join { addr: SocketAddr, reason: String },

    #[error("join failed: {0}")]
    Unreachable(String),

    #[error("no address could be joined")]
    NothingJoined,

    #[error("join did not complete within {0:?}")]
    JoinTimeout(Duration),

    #[error("query failed: {0}")]
    Query(String),

    #[error("response to query {id} could not be delivered")]
    ResponseDropped { id: u64 },

    #[error("membership substrate has shut down")]
    Closed,
}

/// Options for a fan-out query.
#[derive(Debug, Clone)]
pub struct QueryParams {
    /// Node names to target; empty targets every member
    pub filter_nodes: Vec<String>,
    /// Bound on how long responses are collected
    pub timeout: Duration,
}

impl QueryParams {
    pub fn all_members(timeout: Duration) -> Self {
        Self {
            filter_nodes: Vec::new(),
            timeout,
        }
    }

    pub fn targets(&self, name: &str) -> bool {
        self.filter_nodes.is_empty() || self.filter_nodes.iter().any(|n| n == name)
    }
}

/// One member's answer to a query.
#[derive(Debug, Clone)]
pub struct QueryResponse {
    pub from: String,
    pub payload: Vec<u8>,
}

/// Stream of responses to a query.
///
/// Ends when every targeted member has answered (or failed) or the query
/// deadline passes, whichever comes first.
#[derive(Debug)]
pub struct QueryResponses {
    rx: mpsc::Receiver<QueryResponse>,
    deadline: Instant,
}

impl QueryResponses {
    pub fn new(rx: mpsc::Receiver<QueryResponse>, timeout: Duration) -> Self {
        Self {
            rx,
            deadline: Instant::now() + timeout,
        }
    }

    pub async fn next(&mut self) -> Option<QueryResponse> {
        tokio::time::timeout_at(self.deadline, self.rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// A query delivered to this node, answerable once.
#[derive(Debug)]
pub struct IncomingQuery {
    pub id: u64,
    pub name: String,
    pub payload: Vec<u8>,
    /// Node name of the sender
    pub from: String,
    reply: oneshot::Sender<Vec<u8>>,
}

impl IncomingQuery {
    /// Builds a query and the receiver its response will arrive on.
    pub fn new(
        id: u64,
        name: String,
        payload: Vec<u8>,
        from: String,
    ) -> (Self, oneshot::Receiver<Vec<u8>>) {
        let (reply, rx) = oneshot::channel();
        (
            Self {
                id,
                name,
                payload,
                from,
                reply,
            },
            rx,
        )
    }

    pub fn respond(self, payload: Vec<u8>) -> Result<(), MembershipError> {
        self.reply
            .send(payload)
            .map_err(|_| MembershipError::ResponseDropped { id: self.id })
    }
}

/// Events emitted by the substrate.
#[derive(Debug)]
pub enum GroupEvent {
    MemberJoin(Member),
    MemberLeave(Member),
    Query(IncomingQuery),
}

/// Capability offered by a membership substrate.
#[async_trait]
pub trait Membership: Send + Sync {
    /// Name this node is known by inside the group
    fn local_name(&self) -> &str;

    /// Join the group through the given addresses, returning how many were reached.
    async fn join(&self, addrs: &[SocketAddr]) -> Result<usize, MembershipError>;

    /// Currently known live members, excluding this node.
    async fn members(&self) -> Vec<Member>;

    /// Broadcast a named query and stream back the answers.
    async fn query(
        &self,
        name: &str,
        payload: Vec<u8>,
        params: QueryParams,
    ) -> Result<QueryResponses, MembershipError>;

    /// Announce departure to the group.
    async fn leave(&self) -> Result<(), MembershipError>;

    /// Tear down the substrate. No other call is valid afterwards.
    async fn shutdown(&self) -> Result<(), MembershipError>;
}

/// Exclusive ownership of the joined group.
///
/// [`GroupHandle::release`] consumes the handle, so leave and shutdown run at
/// most once. A handle dropped without release (panic unwinding) releases in
/// the background when a runtime is available.
pub struct GroupHandle {
    membership: Arc<dyn Membership>,
    events: Option<mpsc::Receiver<GroupEvent>>,
    released: bool,
}

impl GroupHandle {
    pub fn new(membership: Arc<dyn Membership>, events: mpsc::Receiver<GroupEvent>) -> Self {
        Self {
            membership,
            events: Some(events),
            released: false,
        }
    }

    pub fn local_name(&self) -> &str {
        self.membership.local_name()
    }

    /// Hand the event stream to its single consumer.
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<GroupEvent>> {
        self.events.take()
    }

    pub async fn join(&self, addrs: &[SocketAddr]) -> Result<usize, MembershipError> {
        self.membership.join(addrs).await
    }

    pub async fn members(&self) -> Vec<Member> {
        self.membership.members().await
    }

    pub async fn query(
        &self,
        name: &str,
        payload: Vec<u8>,
        params: QueryParams,
    ) -> Result<QueryResponses, MembershipError> {
        self.membership.query(name, payload, params).await
    }

    /// Leave, then shut down. Shutdown runs even when leave fails.
    pub async fn release(mut self) -> Result<(), MembershipError> {
        self.released = true;
        self.events = None;

        let left = self.membership.leave().await;
        if let Err(e) = &left {
            warn!(error = %e, "Failed to leave group cleanly");
        }
        self.membership.shutdown().await?;
        debug!(node = %self.membership.local_name(), "Group released");
        left
    }
}

impl Drop for GroupHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        warn!(
            node = %self.membership.local_name(),
            "Group handle dropped without release"
        );
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let membership = self.membership.clone();
            runtime.spawn(async move {
                let _ = membership.leave().await;
                let _ = membership.shutdown().await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::MemoryCluster;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_release_runs_leave_then_shutdown_once() {
        let cluster = MemoryCluster::new();
        let (membership, events) = cluster.create("node-a", addr(7946)).unwrap();
        let stats = membership.stats();

        let group = GroupHandle::new(Arc::new(membership), events);
        group.release().await.unwrap();

        assert_eq!(stats.leaves(), 1);
        assert_eq!(stats.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_dropped_handle_releases_in_background() {
        let cluster = MemoryCluster::new();
        let (membership, events) = cluster.create("node-a", addr(7946)).unwrap();
        let stats = membership.stats();

        drop(GroupHandle::new(Arc::new(membership), events));
        for _ in 0..10 {
            if stats.shutdowns() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(stats.leaves(), 1);
        assert_eq!(stats.shutdowns(), 1);
    }

    #[tokio::test]
    async fn test_events_taken_once() {
        let cluster = MemoryCluster::new();
        let (membership, events) = cluster.create("node-a", addr(7946)).unwrap();
        let mut group = GroupHandle::new(Arc::new(membership), events);

        assert!(group.take_events().is_some());
        assert!(group.take_events().is_none());
        group.release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_responses_end_at_deadline() {
        let (tx, rx) = mpsc::channel(1);
        let mut responses = QueryResponses::new(rx, Duration::from_secs(5));

        let started = Instant::now();
        assert!(responses.next().await.is_none());
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        drop(tx);
    }

    #[test]
    fn test_filter_targets() {
        let all = QueryParams::all_members(Duration::from_secs(1));
        assert!(all.targets("anyone"));

        let some = QueryParams {
            filter_nodes: vec!["bootbox001".to_string()],
            timeout: Duration::from_secs(1),
        };
        assert!(some.targets("bootbox001"));
        assert!(!some.targets("worker-7"));
    }
}
