//! Swarm Membership
//!
//! Membership substrate backed by a libp2p swarm. The swarm is owned by a
//! single event loop task; this handle talks to it over a command channel.

mod builder;
mod event_loop;

pub use builder::{build_swarm, multiaddr_socket, socket_multiaddr};
pub use event_loop::SwarmCommand;

use super::config::NetworkConfig;
use super::membership::{
    GroupEvent, Member, Membership, MembershipError, QueryParams, QueryResponses,
};
use super::types::MemberTable;
use async_trait::async_trait;
use event_loop::{EventLoop, SHUTDOWN_GRACE};
use libp2p::PeerId;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Group membership over libp2p.
pub struct SwarmMembership {
    local_name: String,
    local_peer_id: PeerId,
    commands: mpsc::UnboundedSender<SwarmCommand>,
    members: MemberTable,
    config: NetworkConfig,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SwarmMembership {
    /// Build the swarm, start listening and spawn its event loop.
    pub fn create(
        config: NetworkConfig,
    ) -> Result<(Self, mpsc::Receiver<GroupEvent>), MembershipError> {
        let (swarm, local_peer_id) =
            build_swarm(&config).map_err(|e| MembershipError::Create(e.to_string()))?;

        let members = MemberTable::new(local_peer_id);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);

        let event_loop = EventLoop::new(swarm, command_rx, event_tx, members.clone());
        let task = tokio::spawn(event_loop.run());

        info!(
            node = %config.node_name,
            peer_id = %local_peer_id,
            bind = %SocketAddr::new(config.bind_address, config.bind_port),
            "Membership group created"
        );

        Ok((
            Self {
                local_name: config.node_name.clone(),
                local_peer_id,
                commands: command_tx,
                members,
                config,
                task: Mutex::new(Some(task)),
            },
            event_rx,
        ))
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local_peer_id
    }

    fn send(&self, cmd: SwarmCommand) -> Result<(), MembershipError> {
        self.commands.send(cmd).map_err(|_| MembershipError::Closed)
    }
}

#[async_trait]
impl Membership for SwarmMembership {
    fn local_name(&self) -> &str {
        &self.local_name
    }

    async fn join(&self, addrs: &[SocketAddr]) -> Result<usize, MembershipError> {
        let (reply, rx) = oneshot::channel();
        self.send(SwarmCommand::Join {
            addrs: addrs.iter().copied().map(socket_multiaddr).collect(),
            reply,
        })?;

        match tokio::time::timeout(self.config.join_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MembershipError::Closed),
            Err(_) => Err(MembershipError::JoinTimeout(self.config.join_timeout)),
        }
    }

    async fn members(&self) -> Vec<Member> {
        self.members.alive().await
    }

    async fn query(
        &self,
        name: &str,
        payload: Vec<u8>,
        params: QueryParams,
    ) -> Result<QueryResponses, MembershipError> {
        let (responses, rx) = mpsc::channel(64);
        self.send(SwarmCommand::Query {
            name: name.to_string(),
            payload,
            filter_nodes: params.filter_nodes,
            responses,
        })?;
        Ok(QueryResponses::new(rx, params.timeout))
    }

    async fn leave(&self) -> Result<(), MembershipError> {
        let (reply, rx) = oneshot::channel();
        self.send(SwarmCommand::Leave { reply })?;
        rx.await.map_err(|_| MembershipError::Closed)
    }

    async fn shutdown(&self) -> Result<(), MembershipError> {
        // The loop may already be gone; shutting down twice is harmless
        let _ = self.send(SwarmCommand::Shutdown);

        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut task) = task {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut task).await.is_err() {
                warn!("Swarm event loop did not stop in time, aborting");
                task.abort();
            }
        }
        debug!(node = %self.local_name, "Membership substrate shut down");
        Ok(())
    }
}
