//! Token Responder
//!
//! Issuer loop that owns the group event stream for the lifetime of the
//! serving phase. `claim-token` queries are decided by the issuance actor and
//! answered in their own task; everything else is only logged.

use super::issuance::{ClaimToken, IssuanceActor};
use crate::network::{GroupEvent, IncomingQuery};
use bootbox_core::{ClaimOutcome, ClaimRequest, ClaimResponse, CLAIM_QUERY_NAME};
use kameo::actor::ActorRef;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// How long in-flight answers may take once the loop is stopping.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

pub struct TokenResponder {
    issuance: ActorRef<IssuanceActor>,
    local_name: String,
}

impl TokenResponder {
    pub fn new(issuance: ActorRef<IssuanceActor>, local_name: impl Into<String>) -> Self {
        Self {
            issuance,
            local_name: local_name.into(),
        }
    }

    /// Serve until `cancel` fires or the event stream closes.
    pub async fn run(&self, mut events: mpsc::Receiver<GroupEvent>, cancel: &CancellationToken) {
        info!(node = %self.local_name, "Token responder started");
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(GroupEvent::Query(query)) if query.name == CLAIM_QUERY_NAME => {
                        self.answer(query, &mut in_flight);
                    }
                    Some(GroupEvent::Query(query)) => {
                        debug!(query = %query.name, from = %query.from, "Ignoring unrelated query");
                    }
                    Some(GroupEvent::MemberJoin(member)) => {
                        trace!(member = %member.name, "Member joined");
                    }
                    Some(GroupEvent::MemberLeave(member)) => {
                        trace!(member = %member.name, "Member left");
                    }
                    None => {
                        warn!("Group event stream closed");
                        break;
                    }
                },
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "Claim answer task failed");
                    }
                }
            }
        }

        let drain = async { while in_flight.join_next().await.is_some() {} };
        if tokio::time::timeout(DRAIN_GRACE, drain).await.is_err() {
            warn!("Abandoning unanswered claims");
        }
        info!(node = %self.local_name, "Token responder stopped");
    }

    fn answer(&self, query: IncomingQuery, in_flight: &mut JoinSet<()>) {
        let requester = match ClaimRequest::decode(&query.payload) {
            Ok(request) => request.requester,
            Err(e) => {
                debug!(error = %e, from = %query.from, "Claim payload not understood, using sender name");
                query.from.clone()
            }
        };
        debug!(requester = %requester, query_id = query.id, "Claim received");

        let issuance = self.issuance.clone();
        let responder = self.local_name.clone();
        in_flight.spawn(async move {
            let outcome = match issuance.ask(ClaimToken { requester: requester.clone() }).await {
                Ok(decision) => ClaimOutcome::from(decision),
                Err(e) => {
                    warn!(error = %e, requester = %requester, "Issuance actor unreachable");
                    ClaimOutcome::denied("issuer shutting down")
                }
            };

            let response = ClaimResponse { responder, outcome };
            if let Err(e) = query.respond(response.encode()) {
                warn!(error = %e, requester = %requester, "Failed to answer claim");
            }
        });
    }
}
