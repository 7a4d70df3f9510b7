//! Swarm Event Loop
//!
//! Owns the swarm. Translates swarm events into group events and membership
//! commands into swarm actions: dialing for joins, fanning out queries,
//! routing answers back to the nodes that asked.

use super::super::behaviour::{BootboxBehaviour, BootboxBehaviourEvent, GroupRequest, GroupResponse};
use super::super::membership::{GroupEvent, IncomingQuery, MembershipError, QueryResponse};
use super::super::types::table::short_id;
use super::super::types::MemberTable;
use super::builder::multiaddr_socket;
use crate::observability::{events, metrics};
use crate::version::PROTOCOL_VERSION;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use libp2p::request_response::{self, OutboundRequestId, ResponseChannel};
use libp2p::swarm::dial_opts::DialOpts;
use libp2p::swarm::{ConnectionId, SwarmEvent};
use libp2p::{identify, Multiaddr, PeerId, Swarm};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

/// Commands sent from [`super::SwarmMembership`] to the event loop
#[derive(Debug)]
pub enum SwarmCommand {
    /// Dial every address and report how many connected
    Join {
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<usize, MembershipError>>,
    },
    /// Send a named query to the matching members
    Query {
        name: String,
        payload: Vec<u8>,
        filter_nodes: Vec<String>,
        responses: mpsc::Sender<QueryResponse>,
    },
    /// Disconnect from every member
    Leave { reply: oneshot::Sender<()> },
    /// Stop the loop and drop the swarm
    Shutdown,
}

type PendingReply = BoxFuture<
    'static,
    (
        u64,
        ResponseChannel<GroupResponse>,
        Result<Vec<u8>, oneshot::error::RecvError>,
    ),
>;

struct PendingJoin {
    remaining: usize,
    joined: usize,
    last_error: Option<String>,
    reply: oneshot::Sender<Result<usize, MembershipError>>,
}

struct PendingQuery {
    remaining: usize,
    responses: mpsc::Sender<QueryResponse>,
}

pub struct EventLoop {
    swarm: Swarm<BootboxBehaviour>,
    commands: mpsc::UnboundedReceiver<SwarmCommand>,
    events: mpsc::Sender<GroupEvent>,
    members: MemberTable,
    dials: HashMap<ConnectionId, u64>,
    joins: HashMap<u64, PendingJoin>,
    outbound: HashMap<OutboundRequestId, u64>,
    queries: HashMap<u64, PendingQuery>,
    replies: FuturesUnordered<PendingReply>,
    next_id: u64,
}

impl EventLoop {
    pub fn new(
        swarm: Swarm<BootboxBehaviour>,
        commands: mpsc::UnboundedReceiver<SwarmCommand>,
        events: mpsc::Sender<GroupEvent>,
        members: MemberTable,
    ) -> Self {
        Self {
            swarm,
            commands,
            events,
            members,
            dials: HashMap::new(),
            joins: HashMap::new(),
            outbound: HashMap::new(),
            queries: HashMap::new(),
            replies: FuturesUnordered::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event).await;
                }

                cmd = self.commands.recv() => match cmd {
                    Some(SwarmCommand::Shutdown) | None => {
                        debug!("Swarm event loop shutting down");
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd).await,
                },

                Some((id, channel, answer)) = self.replies.next(), if !self.replies.is_empty() => {
                    self.send_answer(id, channel, answer);
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: SwarmCommand) {
        match cmd {
            SwarmCommand::Join { addrs, reply } => self.start_join(addrs, reply),
            SwarmCommand::Query {
                name,
                payload,
                filter_nodes,
                responses,
            } => {
                self.start_query(name, payload, filter_nodes, responses)
                    .await
            }
            SwarmCommand::Leave { reply } => {
                let peers: Vec<PeerId> = self.swarm.connected_peers().copied().collect();
                for peer_id in &peers {
                    let _ = self.swarm.disconnect_peer_id(*peer_id);
                }
                info!(peers = peers.len(), "Left group");
                let _ = reply.send(());
            }
            SwarmCommand::Shutdown => {}
        }
    }

    fn start_join(
        &mut self,
        addrs: Vec<Multiaddr>,
        reply: oneshot::Sender<Result<usize, MembershipError>>,
    ) {
        let join_id = self.next_id();
        let mut pending = PendingJoin {
            remaining: 0,
            joined: 0,
            last_error: None,
            reply,
        };

        for addr in addrs {
            let opts = DialOpts::unknown_peer_id().address(addr.clone()).build();
            let connection_id = opts.connection_id();
            match self.swarm.dial(opts) {
                Ok(()) => {
                    debug!(addr = %addr, "Dialing group member");
                    self.dials.insert(connection_id, join_id);
                    pending.remaining += 1;
                }
                Err(e) => {
                    warn!(addr = %addr, error = %e, "Dial failed");
                    pending.last_error = Some(format!("{addr}: {e}"));
                }
            }
        }

        if pending.remaining == 0 {
            let _ = pending.reply.send(Err(join_failure(pending.last_error)));
        } else {
            self.joins.insert(join_id, pending);
        }
    }

    fn finish_dial(&mut self, connection_id: ConnectionId, outcome: Result<(), String>) {
        let Some(join_id) = self.dials.remove(&connection_id) else {
            return;
        };
        let Some(pending) = self.joins.get_mut(&join_id) else {
            return;
        };

        pending.remaining -= 1;
        match outcome {
            Ok(()) => pending.joined += 1,
            Err(e) => pending.last_error = Some(e),
        }

        if pending.remaining == 0 {
            if let Some(pending) = self.joins.remove(&join_id) {
                let result = if pending.joined > 0 {
                    Ok(pending.joined)
                } else {
                    Err(join_failure(pending.last_error))
                };
                let _ = pending.reply.send(result);
            }
        }
    }

    async fn start_query(
        &mut self,
        name: String,
        payload: Vec<u8>,
        filter_nodes: Vec<String>,
        responses: mpsc::Sender<QueryResponse>,
    ) {
        let targets = self
            .members
            .alive_peers(|member| filter_nodes.is_empty() || filter_nodes.iter().any(|n| n == member))
            .await;

        let query_id = self.next_id();
        for peer_id in &targets {
            let request = GroupRequest {
                name: name.clone(),
                payload: payload.clone(),
            };
            let request_id = self.swarm.behaviour_mut().rpc.send_request(peer_id, request);
            self.outbound.insert(request_id, query_id);
        }

        debug!(
            query = %name,
            query_id = query_id,
            targets = targets.len(),
            "Query sent to group"
        );

        // With no targets the sender drops here and the stream ends at once
        if !targets.is_empty() {
            self.queries.insert(
                query_id,
                PendingQuery {
                    remaining: targets.len(),
                    responses,
                },
            );
        }
    }

    fn finish_outbound(&mut self, request_id: OutboundRequestId) -> Option<mpsc::Sender<QueryResponse>> {
        let query_id = self.outbound.remove(&request_id)?;
        let pending = self.queries.get_mut(&query_id)?;
        pending.remaining -= 1;
        let responses = pending.responses.clone();
        if pending.remaining == 0 {
            self.queries.remove(&query_id);
        }
        Some(responses)
    }

    fn send_answer(
        &mut self,
        id: u64,
        channel: ResponseChannel<GroupResponse>,
        answer: Result<Vec<u8>, oneshot::error::RecvError>,
    ) {
        match answer {
            Ok(payload) => {
                if self
                    .swarm
                    .behaviour_mut()
                    .rpc
                    .send_response(channel, GroupResponse { payload })
                    .is_err()
                {
                    warn!(query_id = id, "Failed to send query response, requester gone");
                }
            }
            Err(_) => {
                trace!(query_id = id, "Query left unanswered");
            }
        }
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<BootboxBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!(address = %address, "Membership transport listening");
            }
            SwarmEvent::ConnectionEstablished {
                peer_id,
                connection_id,
                endpoint,
                ..
            } => {
                let remote = endpoint.get_remote_address();
                debug!(
                    peer_id_short = %short_id(&peer_id),
                    remote_addr = %remote,
                    "Peer connected"
                );
                self.members
                    .mark_connected(peer_id, multiaddr_socket(remote))
                    .await;
                metrics::set_member_count(self.members.alive_count().await);
                self.finish_dial(connection_id, Ok(()));
            }
            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                cause,
                ..
            } => {
                debug!(
                    peer_id_short = %short_id(&peer_id),
                    cause = ?cause,
                    "Peer disconnected"
                );
                if num_established == 0 {
                    if let Some(member) = self.members.mark_left(&peer_id).await {
                        events::member_left(&member.name);
                        metrics::set_member_count(self.members.alive_count().await);
                        self.emit(GroupEvent::MemberLeave(member));
                    }
                }
            }
            SwarmEvent::OutgoingConnectionError {
                connection_id,
                peer_id,
                error,
            } => {
                debug!(
                    peer_id = ?peer_id.as_ref().map(short_id),
                    error = %error,
                    "Outgoing connection failed"
                );
                self.finish_dial(connection_id, Err(error.to_string()));
            }
            SwarmEvent::IncomingConnectionError { error, .. } => {
                trace!(error = %error, "Incoming connection failed");
            }
            SwarmEvent::Behaviour(BootboxBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                trace!(
                    peer_id_short = %short_id(&peer_id),
                    protocol_version = %info.protocol_version,
                    "Identify: received peer info"
                );
                if info.protocol_version != PROTOCOL_VERSION {
                    warn!(
                        peer_id_short = %short_id(&peer_id),
                        protocol_version = %info.protocol_version,
                        expected = PROTOCOL_VERSION,
                        "Protocol version mismatch, disconnecting"
                    );
                    let _ = self.swarm.disconnect_peer_id(peer_id);
                    return;
                }
                if let Some(member) = self.members.set_name(&peer_id, info.agent_version).await {
                    events::member_joined(&member.name, member.address);
                    self.emit(GroupEvent::MemberJoin(member));
                }
            }
            SwarmEvent::Behaviour(BootboxBehaviourEvent::Identify(event)) => {
                trace!(event = ?event, "Identify event");
            }
            SwarmEvent::Behaviour(BootboxBehaviourEvent::Rpc(event)) => {
                self.handle_rpc_event(event).await;
            }
            _ => {}
        }
    }

    async fn handle_rpc_event(
        &mut self,
        event: request_response::Event<GroupRequest, GroupResponse>,
    ) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => {
                    let id = self.next_id();
                    let from = self.members.name_of(&peer).await;
                    trace!(query = %request.name, from = %from, query_id = id, "Query received");

                    let (query, answer) = IncomingQuery::new(id, request.name, request.payload, from);
                    self.replies
                        .push(Box::pin(async move { (id, channel, answer.await) }));
                    self.emit(GroupEvent::Query(query));
                }
                request_response::Message::Response {
                    request_id,
                    response,
                } => {
                    let from = self.members.name_of(&peer).await;
                    if let Some(responses) = self.finish_outbound(request_id) {
                        let response = QueryResponse {
                            from,
                            payload: response.payload,
                        };
                        if responses.try_send(response).is_err() {
                            trace!("Query response dropped, requester stopped listening");
                        }
                    }
                }
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                debug!(
                    peer_id_short = %short_id(&peer),
                    error = %error,
                    "Query to member failed"
                );
                self.finish_outbound(request_id);
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                trace!(
                    peer_id_short = %short_id(&peer),
                    error = %error,
                    "Inbound query failed"
                );
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    fn emit(&self, event: GroupEvent) {
        if let Err(e) = self.events.try_send(event) {
            trace!(error = %e, "Group event dropped");
        }
    }
}

fn join_failure(last_error: Option<String>) -> MembershipError {
    match last_error {
        Some(reason) => MembershipError::Unreachable(reason),
        None => MembershipError::NothingJoined,
    }
}

/// Grace period for the loop to drain after a shutdown command.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
