//! In-Process Membership
//!
//! A membership substrate where every node lives in the same process. Joining
//! any member of a group makes the joiner a member of that whole group, and
//! queries fan out to every other live member. Release calls are counted so
//! tests can observe that a group is left and shut down exactly once.

use super::membership::{
    GroupEvent, IncomingQuery, Member, MemberStatus, Membership, MembershipError, QueryParams,
    QueryResponse, QueryResponses,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, trace};

const EVENT_BUFFER: usize = 256;

struct Node {
    address: SocketAddr,
    group: u64,
    alive: bool,
    events: mpsc::Sender<GroupEvent>,
}

impl Node {
    fn member(&self, name: &str) -> Member {
        Member {
            name: name.to_string(),
            address: Some(self.address),
            status: if self.alive {
                MemberStatus::Alive
            } else {
                MemberStatus::Left
            },
        }
    }
}

#[derive(Default)]
struct ClusterInner {
    nodes: HashMap<String, Node>,
    next_group: u64,
}

/// Shared registry standing in for the network.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    inner: Arc<Mutex<ClusterInner>>,
    next_query: Arc<AtomicU64>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ClusterInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create a node that starts out as the only member of its own group.
    pub fn create(
        &self,
        name: &str,
        address: SocketAddr,
    ) -> Result<(MemoryMembership, mpsc::Receiver<GroupEvent>), MembershipError> {
        let mut inner = self.lock();
        if inner.nodes.contains_key(name) {
            return Err(MembershipError::Create(format!(
                "node name '{name}' already in use"
            )));
        }
        if inner.nodes.values().any(|n| n.address == address) {
            return Err(MembershipError::Create(format!(
                "address {address} already bound"
            )));
        }

        inner.next_group += 1;
        let group = inner.next_group;
        let (events, rx) = mpsc::channel(EVENT_BUFFER);
        inner.nodes.insert(
            name.to_string(),
            Node {
                address,
                group,
                alive: true,
                events,
            },
        );

        let membership = MemoryMembership {
            cluster: self.clone(),
            name: name.to_string(),
            stats: Arc::new(ReleaseStats::default()),
        };
        Ok((membership, rx))
    }
}

/// Counts of release calls made against one node.
#[derive(Debug, Default)]
pub struct ReleaseStats {
    leaves: AtomicUsize,
    shutdowns: AtomicUsize,
}

impl ReleaseStats {
    pub fn leaves(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }
}

/// One node's view of a [`MemoryCluster`].
pub struct MemoryMembership {
    cluster: MemoryCluster,
    name: String,
    stats: Arc<ReleaseStats>,
}

impl MemoryMembership {
    pub fn stats(&self) -> Arc<ReleaseStats> {
        self.stats.clone()
    }
}

#[async_trait]
impl Membership for MemoryMembership {
    fn local_name(&self) -> &str {
        &self.name
    }

    async fn join(&self, addrs: &[SocketAddr]) -> Result<usize, MembershipError> {
        let mut inner = self.cluster.lock();
        let (mut own_group, own_address) = match inner.nodes.get(&self.name) {
            Some(node) if node.alive => (node.group, node.address),
            _ => return Err(MembershipError::Closed),
        };

        let mut joined = 0;
        let mut last_error = None;
        for addr in addrs {
            let target_group = inner
                .nodes
                .values()
                .find(|n| n.alive && n.address == *addr)
                .map(|n| n.group);
            let Some(target_group) = target_group else {
                last_error = Some(MembershipError::Join {
                    addr: *addr,
                    reason: "no member listening".to_string(),
                });
                continue;
            };
            joined += 1;
            if target_group == own_group {
                continue;
            }

            // Merge our whole group into the target's
            for node in inner.nodes.values_mut() {
                if node.group == own_group {
                    node.group = target_group;
                }
            }
            own_group = target_group;
            debug!(node = %self.name, addr = %addr, "Joined group");

            let joiner = Member {
                name: self.name.clone(),
                address: Some(own_address),
                status: MemberStatus::Alive,
            };
            for (name, node) in inner.nodes.iter() {
                if name != &self.name && node.alive && node.group == target_group {
                    let _ = node.events.try_send(GroupEvent::MemberJoin(joiner.clone()));
                }
            }
        }

        match (joined, last_error) {
            (0, Some(e)) => Err(e),
            (0, None) => Err(MembershipError::NothingJoined),
            (n, _) => Ok(n),
        }
    }

    async fn members(&self) -> Vec<Member> {
        let inner = self.cluster.lock();
        let Some(group) = inner.nodes.get(&self.name).map(|n| n.group) else {
            return Vec::new();
        };
        inner
            .nodes
            .iter()
            .filter(|(name, node)| *name != &self.name && node.alive && node.group == group)
            .map(|(name, node)| node.member(name))
            .collect()
    }

    async fn query(
        &self,
        name: &str,
        payload: Vec<u8>,
        params: QueryParams,
    ) -> Result<QueryResponses, MembershipError> {
        let targets: Vec<(String, mpsc::Sender<GroupEvent>)> = {
            let inner = self.cluster.lock();
            let group = match inner.nodes.get(&self.name) {
                Some(node) if node.alive => node.group,
                _ => return Err(MembershipError::Closed),
            };
            inner
                .nodes
                .iter()
                .filter(|(n, node)| {
                    *n != &self.name && node.alive && node.group == group && params.targets(n)
                })
                .map(|(n, node)| (n.clone(), node.events.clone()))
                .collect()
        };

        let (tx, rx) = mpsc::channel(targets.len().max(1));
        for (target, events) in targets {
            let id = self.cluster.next_query.fetch_add(1, Ordering::Relaxed);
            let (query, reply) =
                IncomingQuery::new(id, name.to_string(), payload.clone(), self.name.clone());
            if events.try_send(GroupEvent::Query(query)).is_err() {
                trace!(target = %target, "Query not delivered, event buffer full");
                continue;
            }

            let tx = tx.clone();
            let timeout = params.timeout;
            tokio::spawn(async move {
                if let Ok(Ok(payload)) = tokio::time::timeout(timeout, reply).await {
                    let _ = tx.send(QueryResponse { from: target, payload }).await;
                }
            });
        }

        Ok(QueryResponses::new(rx, params.timeout))
    }

    async fn leave(&self) -> Result<(), MembershipError> {
        self.stats.leaves.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.cluster.lock();
        let Some(node) = inner.nodes.get_mut(&self.name) else {
            return Err(MembershipError::Closed);
        };
        if !node.alive {
            return Ok(());
        }
        node.alive = false;
        let group = node.group;
        let departed = node.member(&self.name);

        for (name, node) in inner.nodes.iter() {
            if name != &self.name && node.alive && node.group == group {
                let _ = node.events.try_send(GroupEvent::MemberLeave(departed.clone()));
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), MembershipError> {
        self.stats.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.cluster.lock().nodes.remove(&self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 7946))
    }

    #[tokio::test]
    async fn test_join_merges_groups() {
        let cluster = MemoryCluster::new();
        let (issuer, mut issuer_events) = cluster.create("issuer", addr(1)).unwrap();
        let (worker, _worker_events) = cluster.create("worker", addr(2)).unwrap();

        assert!(worker.members().await.is_empty());
        assert_eq!(worker.join(&[addr(1)]).await.unwrap(), 1);

        let names: Vec<String> = worker.members().await.into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["issuer".to_string()]);
        assert_eq!(issuer.members().await.len(), 1);

        match issuer_events.recv().await {
            Some(GroupEvent::MemberJoin(member)) => assert_eq!(member.name, "worker"),
            other => panic!("expected member join, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_join_bridges_separate_groups() {
        let cluster = MemoryCluster::new();
        let (_x, _x_events) = cluster.create("x", addr(1)).unwrap();
        let (_y, _y_events) = cluster.create("y", addr(2)).unwrap();
        let (w, _w_events) = cluster.create("w", addr(3)).unwrap();

        assert_eq!(w.join(&[addr(1), addr(2)]).await.unwrap(), 2);

        let mut names: Vec<String> = w.members().await.into_iter().map(|m| m.name).collect();
        names.sort();
        assert_eq!(names, vec!["x".to_string(), "y".to_string()]);
    }

    #[tokio::test]
    async fn test_join_unknown_address_fails() {
        let cluster = MemoryCluster::new();
        let (worker, _events) = cluster.create("worker", addr(2)).unwrap();
        let err = worker.join(&[addr(9)]).await.unwrap_err();
        assert!(matches!(err, MembershipError::Join { .. }));
    }

    #[tokio::test]
    async fn test_duplicate_name_rejected() {
        let cluster = MemoryCluster::new();
        let _first = cluster.create("node", addr(1)).unwrap();
        assert!(cluster.create("node", addr(2)).is_err());
    }

    #[tokio::test]
    async fn test_query_round_trip_and_stream_close() {
        let cluster = MemoryCluster::new();
        let (_issuer, mut issuer_events) = cluster.create("issuer", addr(1)).unwrap();
        let (worker, _worker_events) = cluster.create("worker", addr(2)).unwrap();
        worker.join(&[addr(1)]).await.unwrap();

        tokio::spawn(async move {
            while let Some(event) = issuer_events.recv().await {
                if let GroupEvent::Query(query) = event {
                    assert_eq!(query.from, "worker");
                    query.respond(b"pong".to_vec()).unwrap();
                }
            }
        });

        let mut responses = worker
            .query("ping", b"ping".to_vec(), QueryParams::all_members(Duration::from_secs(5)))
            .await
            .unwrap();
        let response = responses.next().await.unwrap();
        assert_eq!(response.from, "issuer");
        assert_eq!(response.payload, b"pong");
        assert!(responses.next().await.is_none());
    }

    #[tokio::test]
    async fn test_leave_notifies_group_and_blocks_queries() {
        let cluster = MemoryCluster::new();
        let (issuer, mut issuer_events) = cluster.create("issuer", addr(1)).unwrap();
        let (worker, _worker_events) = cluster.create("worker", addr(2)).unwrap();
        worker.join(&[addr(1)]).await.unwrap();
        let _ = issuer_events.recv().await;

        worker.leave().await.unwrap();
        match issuer_events.recv().await {
            Some(GroupEvent::MemberLeave(member)) => assert_eq!(member.name, "worker"),
            other => panic!("expected member leave, got {other:?}"),
        }
        assert!(issuer.members().await.is_empty());

        let err = worker
            .query("ping", Vec::new(), QueryParams::all_members(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, MembershipError::Closed));
    }
}
