//! Role Orchestrator
//!
//! Drives one node through its role's phases:
//!
//! ```text
//! Issuer:   Init -> Joining -> Stable -> Serving -> Done
//! Claimant: Init -> Discovering -> Joining -> Stable -> Requesting -> Done
//! ```
//!
//! A claimant that does not discover an issuer goes straight to `Done`.
//! Whatever the path, `Done` releases the group exactly once.

use crate::claim::{
    ClaimResult, GetIssuance, IssuanceActor, IssuanceState, TokenRequester, TokenResponder,
    TokenSource,
};
use crate::config::NodeConfig;
use crate::discovery::{AddressResolver, PresenceAdvertiser, ServiceDiscovery};
use crate::network::{GroupEvent, GroupHandle, MembershipError};
use crate::observability::events;
use backoff::{future::retry, ExponentialBackoff};
use bootbox_core::{Advertisement, Grant, Role};
use kameo::Actor;
use std::fmt;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodePhase {
    Init,
    Discovering,
    Joining,
    Stable,
    Serving,
    Requesting,
    Done,
}

impl fmt::Display for NodePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodePhase::Init => write!(f, "init"),
            NodePhase::Discovering => write!(f, "discovering"),
            NodePhase::Joining => write!(f, "joining"),
            NodePhase::Stable => write!(f, "stable"),
            NodePhase::Serving => write!(f, "serving"),
            NodePhase::Requesting => write!(f, "requesting"),
            NodePhase::Done => write!(f, "done"),
        }
    }
}

/// Why a claimant ended without a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoTokenReason {
    /// No issuer advertisement before cancellation or the discovery timeout
    NotFound,
    JoinFailed(String),
    Denied(Vec<String>),
    Unanswered,
    ClaimFailed(String),
    Cancelled,
}

impl fmt::Display for NoTokenReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoTokenReason::NotFound => write!(f, "issuer not found"),
            NoTokenReason::JoinFailed(e) => write!(f, "could not join issuer: {e}"),
            NoTokenReason::Denied(reasons) => write!(f, "denied: {}", reasons.join("; ")),
            NoTokenReason::Unanswered => write!(f, "no member answered the claim"),
            NoTokenReason::ClaimFailed(e) => write!(f, "claim failed: {e}"),
            NoTokenReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// How a node's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Issuer stopped serving
    Served { issuance: IssuanceState },
    /// Claimant obtained the token
    Token { grant: Grant, responder: String },
    NoToken(NoTokenReason),
}

pub struct RoleOrchestrator {
    config: NodeConfig,
    discovery: Arc<dyn ServiceDiscovery>,
    token_source: Arc<dyn TokenSource>,
    advertise_addrs: Vec<Ipv4Addr>,
    phase: NodePhase,
}

impl RoleOrchestrator {
    pub fn new(
        config: NodeConfig,
        discovery: Arc<dyn ServiceDiscovery>,
        token_source: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            config,
            discovery,
            token_source,
            advertise_addrs: Vec::new(),
            phase: NodePhase::Init,
        }
    }

    /// Addresses an issuer advertises.
    pub fn with_advertise_addrs(mut self, addrs: Vec<Ipv4Addr>) -> Self {
        self.advertise_addrs = addrs;
        self
    }

    pub fn phase(&self) -> NodePhase {
        self.phase
    }

    fn transition(&mut self, next: NodePhase) {
        if self.phase == next {
            return;
        }
        events::node_phase_changed(
            &self.config.network.node_name,
            &self.phase.to_string(),
            &next.to_string(),
        );
        self.phase = next;
    }

    /// Run the node's role to completion, then release the group.
    pub async fn run(&mut self, mut group: GroupHandle, cancel: &CancellationToken) -> NodeOutcome {
        info!(
            node = %group.local_name(),
            role = %self.config.role,
            service = %self.config.service_name,
            "Node starting"
        );

        let outcome = match self.config.role {
            Role::Issuer => self.issue(&mut group, cancel).await,
            Role::Claimant => self.claim(&group, cancel).await,
        };

        self.transition(NodePhase::Done);
        if let Err(e) = group.release().await {
            warn!(error = %e, "Group release reported an error");
        }
        outcome
    }

    /// Wait out the settle delay. False when cancelled first.
    async fn settle(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.settle_delay) => true,
        }
    }

    async fn issue(&mut self, group: &mut GroupHandle, cancel: &CancellationToken) -> NodeOutcome {
        // The issuer's group is the one it created.
        self.transition(NodePhase::Joining);
        self.transition(NodePhase::Stable);

        let issuance = IssuanceActor::spawn(IssuanceActor::new(self.token_source.clone()));

        if self.settle(cancel).await {
            self.transition(NodePhase::Serving);
            let events = group.take_events().unwrap_or_else(|| {
                warn!("Group events already consumed, no claims will be answered");
                mpsc::channel::<GroupEvent>(1).1
            });
            self.serve(issuance.clone(), events, group.local_name(), cancel)
                .await;
        }

        let state = match issuance.ask(GetIssuance).await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Could not read issuance state");
                IssuanceState::default()
            }
        };
        if let Err(e) = issuance.stop_gracefully().await {
            debug!(error = %e, "Issuance actor already stopped");
        }
        NodeOutcome::Served { issuance: state }
    }

    /// Advertise and answer claims concurrently until cancelled.
    async fn serve(
        &self,
        issuance: kameo::actor::ActorRef<IssuanceActor>,
        events: mpsc::Receiver<GroupEvent>,
        local_name: &str,
        cancel: &CancellationToken,
    ) {
        let advertisement = Advertisement {
            service_name: self.config.service_name.clone(),
            host_identity: local_name.to_string(),
            addresses: self.advertise_addrs.clone(),
            port: self.config.network.bind_port,
            marker: self.config.marker.clone(),
        };
        let advertiser = PresenceAdvertiser::new(self.discovery.clone(), advertisement)
            .with_duration(self.config.advertise_for);
        let responder = TokenResponder::new(issuance, local_name);
        let serving = cancel.child_token();

        let advertise = async {
            if let Err(e) = advertiser.advertise(&serving).await {
                warn!(
                    error = %e,
                    service = %self.config.service_name,
                    "Advertisement failed, issuer only reachable at a known address"
                );
            }
        };
        let respond = async {
            responder.run(events, &serving).await;
            serving.cancel();
        };
        tokio::join!(advertise, respond);
    }

    async fn claim(&mut self, group: &GroupHandle, cancel: &CancellationToken) -> NodeOutcome {
        self.transition(NodePhase::Discovering);
        let resolver = AddressResolver::new(
            self.discovery.clone(),
            self.config.service_name.clone(),
            self.config.marker.clone(),
            self.config.poll_interval,
        )
        .with_timeout(self.config.discovery_timeout);

        let issuer = match resolver.resolve(cancel).await {
            Ok(Some(addr)) => addr,
            Ok(None) => return NodeOutcome::NoToken(NoTokenReason::NotFound),
            Err(e) => {
                warn!(error = %e, "Discovery failed");
                return NodeOutcome::NoToken(NoTokenReason::NotFound);
            }
        };

        self.transition(NodePhase::Joining);
        let joined = tokio::select! {
            _ = cancel.cancelled() => return NodeOutcome::NoToken(NoTokenReason::Cancelled),
            joined = self.join(group, issuer) => joined,
        };
        if let Err(e) = joined {
            warn!(error = %e, issuer = %issuer, "Could not join issuer");
            return NodeOutcome::NoToken(NoTokenReason::JoinFailed(e.to_string()));
        }

        self.transition(NodePhase::Stable);
        if !self.settle(cancel).await {
            return NodeOutcome::NoToken(NoTokenReason::Cancelled);
        }
        let members = group.members().await;
        debug!(members = members.len(), "Group settled");

        self.transition(NodePhase::Requesting);
        let requester = TokenRequester::new(self.config.claim_timeout, self.config.claim_attempts);
        match requester.request_token(group, cancel).await {
            Ok(ClaimResult::Granted { grant, responder }) => {
                events::token_received(&responder, grant.base_url.is_some());
                NodeOutcome::Token { grant, responder }
            }
            Ok(ClaimResult::Denied { reasons }) => NodeOutcome::NoToken(NoTokenReason::Denied(reasons)),
            Ok(ClaimResult::Unanswered) => NodeOutcome::NoToken(NoTokenReason::Unanswered),
            Ok(ClaimResult::Cancelled) => NodeOutcome::NoToken(NoTokenReason::Cancelled),
            Err(e) => {
                warn!(error = %e, "Claim failed");
                NodeOutcome::NoToken(NoTokenReason::ClaimFailed(e.to_string()))
            }
        }
    }

    /// Join the issuer, retrying with exponential backoff within the join timeout.
    async fn join(&self, group: &GroupHandle, issuer: SocketAddrV4) -> Result<usize, MembershipError> {
        let network = &self.config.network;
        let backoff = ExponentialBackoff {
            initial_interval: network.join_backoff_initial,
            max_interval: network.join_backoff_max,
            max_elapsed_time: Some(network.join_timeout),
            ..Default::default()
        };
        let addrs = [SocketAddr::V4(issuer)];

        retry(backoff, || async {
            match group.join(&addrs).await {
                Ok(joined) => {
                    info!(issuer = %issuer, joined, "Joined issuer's group");
                    Ok(joined)
                }
                Err(e) => {
                    warn!(error = %e, issuer = %issuer, "Join failed, retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
    }
}
