//! Token Requester
//!
//! Claimant side of the handoff. One attempt broadcasts a `claim-token`
//! query to every member and reads answers until the first grant or until
//! the response stream closes. Denials are remembered but never end the
//! wait early, since another responder may still grant. An attempt that
//! hears nothing at all is retried; a denial is final.

use crate::network::{GroupHandle, MembershipError, QueryParams};
use crate::observability::metrics;
use bootbox_core::{ClaimOutcome, ClaimRequest, ClaimResponse, Grant, CLAIM_QUERY_NAME};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Pause between attempts that heard nothing, giving late members time to
/// become visible.
const RETRY_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ClaimError {
    #[error("claim query failed: {0}")]
    Membership(#[from] MembershipError),
}

/// How a claim ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    Granted { grant: Grant, responder: String },
    /// Every answer was a denial
    Denied { reasons: Vec<String> },
    /// No member answered in any attempt
    Unanswered,
    Cancelled,
}

pub struct TokenRequester {
    timeout: Duration,
    attempts: u32,
}

impl TokenRequester {
    pub fn new(timeout: Duration, attempts: u32) -> Self {
        Self {
            timeout,
            attempts: attempts.max(1),
        }
    }

    pub async fn request_token(
        &self,
        group: &GroupHandle,
        cancel: &CancellationToken,
    ) -> Result<ClaimResult, ClaimError> {
        let started = Instant::now();
        let result = self.claim(group, cancel).await;
        metrics::record_claim_duration(started.elapsed());
        result
    }

    async fn claim(
        &self,
        group: &GroupHandle,
        cancel: &CancellationToken,
    ) -> Result<ClaimResult, ClaimError> {
        let request = ClaimRequest::new(group.local_name());

        for attempt in 1..=self.attempts {
            info!(attempt, attempts = self.attempts, "Claiming token");
            match self.attempt(group, &request, cancel).await? {
                ClaimResult::Unanswered => {
                    warn!(attempt, "No member answered the claim");
                    if attempt < self.attempts {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(ClaimResult::Cancelled),
                            _ = tokio::time::sleep(RETRY_PAUSE) => {}
                        }
                    }
                }
                result => return Ok(result),
            }
        }
        Ok(ClaimResult::Unanswered)
    }

    async fn attempt(
        &self,
        group: &GroupHandle,
        request: &ClaimRequest,
        cancel: &CancellationToken,
    ) -> Result<ClaimResult, ClaimError> {
        let mut responses = group
            .query(
                CLAIM_QUERY_NAME,
                request.encode(),
                QueryParams::all_members(self.timeout),
            )
            .await?;

        let mut reasons = Vec::new();
        loop {
            let response = tokio::select! {
                _ = cancel.cancelled() => return Ok(ClaimResult::Cancelled),
                response = responses.next() => response,
            };
            let Some(response) = response else { break };

            let answer = match ClaimResponse::decode(&response.payload) {
                Ok(answer) => answer,
                Err(e) => {
                    warn!(error = %e, from = %response.from, "Unreadable claim answer");
                    continue;
                }
            };

            match answer.outcome {
                ClaimOutcome::Granted(grant) => {
                    return Ok(ClaimResult::Granted {
                        grant,
                        responder: answer.responder,
                    });
                }
                ClaimOutcome::Denied { reason } => {
                    debug!(responder = %answer.responder, reason = %reason, "Claim denied");
                    reasons.push(reason);
                }
            }
        }

        if reasons.is_empty() {
            Ok(ClaimResult::Unanswered)
        } else {
            Ok(ClaimResult::Denied { reasons })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::memory::MemoryCluster;
    use crate::network::{GroupEvent, IncomingQuery, Membership};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn addr(last: u8) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, last], 7946))
    }

    fn answer(query: IncomingQuery, responder: &str, outcome: ClaimOutcome) {
        let response = ClaimResponse {
            responder: responder.to_string(),
            outcome,
        };
        query.respond(response.encode()).unwrap();
    }

    /// Answers every query with `outcome`, optionally after a delay.
    fn serve(mut events: mpsc::Receiver<GroupEvent>, name: &'static str, outcome: ClaimOutcome, delay: Duration) {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let GroupEvent::Query(query) = event {
                    tokio::time::sleep(delay).await;
                    answer(query, name, outcome.clone());
                }
            }
        });
    }

    async fn claimant(cluster: &MemoryCluster, targets: &[SocketAddr]) -> GroupHandle {
        let (worker, events) = cluster.create("worker", addr(100)).unwrap();
        let group = GroupHandle::new(Arc::new(worker), events);
        group.join(targets).await.unwrap();
        group
    }

    #[tokio::test]
    async fn test_grant_after_denial_wins() {
        let cluster = MemoryCluster::new();
        let (denier, denier_events) = cluster.create("denier", addr(1)).unwrap();
        let (granter, granter_events) = cluster.create("granter", addr(2)).unwrap();
        serve(denier_events, "denier", ClaimOutcome::denied("token already issued"), Duration::ZERO);
        serve(
            granter_events,
            "granter",
            ClaimOutcome::Granted(Grant {
                token: "otp-123".to_string(),
                base_url: None,
            }),
            Duration::from_millis(50),
        );

        let group = claimant(&cluster, &[addr(1), addr(2)]).await;
        let result = TokenRequester::new(Duration::from_secs(5), 1)
            .request_token(&group, &CancellationToken::new())
            .await
            .unwrap();

        match result {
            ClaimResult::Granted { grant, responder } => {
                assert_eq!(grant.token, "otp-123");
                assert_eq!(responder, "granter");
            }
            other => panic!("expected grant, got {other:?}"),
        }
        drop((denier, granter));
        group.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_grant_returns_without_waiting_for_stragglers() {
        let cluster = MemoryCluster::new();
        let (_fast, fast_events) = cluster.create("fast", addr(1)).unwrap();
        let (_slow, slow_events) = cluster.create("slow", addr(2)).unwrap();
        serve(
            fast_events,
            "fast",
            ClaimOutcome::Granted(Grant {
                token: "otp-123".to_string(),
                base_url: None,
            }),
            Duration::ZERO,
        );
        serve(slow_events, "slow", ClaimOutcome::denied("late"), Duration::from_secs(3600));

        let group = claimant(&cluster, &[addr(1), addr(2)]).await;
        let started = Instant::now();
        let result = TokenRequester::new(Duration::from_secs(10), 1)
            .request_token(&group, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(result, ClaimResult::Granted { .. }));
        assert!(started.elapsed() < Duration::from_secs(5));
        group.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_denial_is_final() {
        let cluster = MemoryCluster::new();
        let (_issuer, mut issuer_events) = cluster.create("issuer", addr(1)).unwrap();
        let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(event) = issuer_events.recv().await {
                if let GroupEvent::Query(query) = event {
                    let _ = seen_tx.send(());
                    answer(query, "issuer", ClaimOutcome::denied("token already issued"));
                }
            }
        });

        let group = claimant(&cluster, &[addr(1)]).await;
        let result = TokenRequester::new(Duration::from_secs(5), 3)
            .request_token(&group, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            result,
            ClaimResult::Denied {
                reasons: vec!["token already issued".to_string()]
            }
        );
        group.release().await.unwrap();

        assert!(seen_rx.recv().await.is_some());
        assert!(seen_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_silence_is_retried_then_unanswered() {
        let cluster = MemoryCluster::new();
        // Member that never answers; its queries sit in the buffer.
        let (_mute, _mute_events) = cluster.create("mute", addr(1)).unwrap();

        let group = claimant(&cluster, &[addr(1)]).await;
        let started = Instant::now();
        let result = TokenRequester::new(Duration::from_secs(5), 3)
            .request_token(&group, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, ClaimResult::Unanswered);
        assert_eq!(started.elapsed(), Duration::from_secs(15) + 2 * RETRY_PAUSE);
        group.release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_reaches_member_that_appears_late() {
        let cluster = MemoryCluster::new();
        let (worker, events) = cluster.create("worker", addr(100)).unwrap();
        let group = GroupHandle::new(Arc::new(worker), events);

        let late_cluster = cluster.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RETRY_PAUSE / 2).await;
            let (issuer, issuer_events) = late_cluster.create("issuer", addr(1)).unwrap();
            issuer.join(&[addr(100)]).await.unwrap();
            serve(
                issuer_events,
                "issuer",
                ClaimOutcome::Granted(Grant {
                    token: "otp-123".to_string(),
                    base_url: None,
                }),
                Duration::ZERO,
            );
        });

        let started = Instant::now();
        let result = TokenRequester::new(Duration::from_secs(5), 3)
            .request_token(&group, &CancellationToken::new())
            .await
            .unwrap();
        match result {
            ClaimResult::Granted { responder, .. } => assert_eq!(responder, "issuer"),
            other => panic!("expected grant, got {other:?}"),
        }
        assert!(started.elapsed() >= RETRY_PAUSE);
        group.release().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait() {
        let cluster = MemoryCluster::new();
        let (_mute, _mute_events) = cluster.create("mute", addr(1)).unwrap();
        let group = claimant(&cluster, &[addr(1)]).await;

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            canceller.cancel();
        });

        let result = TokenRequester::new(Duration::from_secs(5), 3)
            .request_token(&group, &cancel)
            .await
            .unwrap();
        assert_eq!(result, ClaimResult::Cancelled);
        group.release().await.unwrap();
    }
}
