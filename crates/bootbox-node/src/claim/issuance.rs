//! Issuance Actor
//!
//! Owns the issued flag. Every claim goes through this actor's mailbox, so
//! claims are decided one at a time and no two can both see the token as
//! unissued. The token is fetched before the flag is committed: a failed
//! fetch leaves the token available for a later claim.

use super::token_source::TokenSource;
use crate::observability::{events, metrics};
use bootbox_core::{ClaimOutcome, Grant, DENIED_ALREADY_ISSUED, DENIED_AUTHORITY_UNAVAILABLE};
use chrono::{DateTime, Utc};
use kameo::{
    message::{Context, Message},
    Actor, Reply,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

/// Issuance record. Terminal once `issued` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Reply)]
pub struct IssuanceState {
    pub issued: bool,
    /// Token value handed out, kept out of serialized snapshots
    #[serde(skip_serializing)]
    pub token: Option<String>,
    /// Claimant that received the token
    pub issued_to: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
}

#[derive(Actor)]
pub struct IssuanceActor {
    state: IssuanceState,
    source: Arc<dyn TokenSource>,
}

impl IssuanceActor {
    pub fn new(source: Arc<dyn TokenSource>) -> Self {
        Self {
            state: IssuanceState::default(),
            source,
        }
    }

    async fn decide(&mut self, requester: &str) -> IssuanceDecision {
        if self.state.issued {
            return IssuanceDecision::Denied(DENIED_ALREADY_ISSUED.to_string());
        }

        let token = match self.source.fetch().await {
            Ok(token) => token,
            Err(e) => {
                warn!(error = %e, requester = %requester, "Token fetch failed, claim not committed");
                return IssuanceDecision::Denied(DENIED_AUTHORITY_UNAVAILABLE.to_string());
            }
        };

        self.state = IssuanceState {
            issued: true,
            token: Some(token.clone()),
            issued_to: Some(requester.to_string()),
            issued_at: Some(Utc::now()),
        };
        IssuanceDecision::Granted(Grant {
            token,
            base_url: self.source.base_url(),
        })
    }
}

// ============================================================================
// Messages
// ============================================================================

/// Claim the token on behalf of a requester.
#[derive(Debug, Clone)]
pub struct ClaimToken {
    pub requester: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Reply)]
pub enum IssuanceDecision {
    Granted(Grant),
    Denied(String),
}

impl From<IssuanceDecision> for ClaimOutcome {
    fn from(decision: IssuanceDecision) -> Self {
        match decision {
            IssuanceDecision::Granted(grant) => ClaimOutcome::Granted(grant),
            IssuanceDecision::Denied(reason) => ClaimOutcome::Denied { reason },
        }
    }
}

impl Message<ClaimToken> for IssuanceActor {
    type Reply = IssuanceDecision;

    async fn handle(
        &mut self,
        msg: ClaimToken,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        let decision = self.decide(&msg.requester).await;
        match &decision {
            IssuanceDecision::Granted(_) => {
                metrics::record_claim("granted");
                events::token_granted(&msg.requester);
            }
            IssuanceDecision::Denied(reason) => {
                metrics::record_claim("denied");
                events::claim_denied(&msg.requester, reason);
            }
        }
        decision
    }
}

/// Snapshot of the issuance record.
#[derive(Debug, Clone)]
pub struct GetIssuance;

impl Message<GetIssuance> for IssuanceActor {
    type Reply = IssuanceState;

    async fn handle(
        &mut self,
        _msg: GetIssuance,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.state.clone()
    }
}
