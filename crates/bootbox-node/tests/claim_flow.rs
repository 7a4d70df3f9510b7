//! One issuer, several claimants, all on the in-process substrates.

use bootbox_core::{Role, DENIED_ALREADY_ISSUED};
use bootbox_node::claim::StaticTokenSource;
use bootbox_node::config::NodeConfig;
use bootbox_node::discovery::memory::MemoryDiscovery;
use bootbox_node::network::memory::{MemoryCluster, ReleaseStats};
use bootbox_node::network::{GroupHandle, NetworkConfig};
use bootbox_node::orchestrator::{NoTokenReason, NodeOutcome, RoleOrchestrator};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const SERVICE: &str = "bootstrap-v1";
const MARKER: &str = "ISSUER-READY";
const TOKEN: &str = "otp-0f3a9c";

fn config(role: Role, name: &str) -> NodeConfig {
    NodeConfig {
        role,
        network: NetworkConfig::new(name, "0.0.0.0".parse().unwrap(), 7946),
        service_name: SERVICE.to_string(),
        marker: MARKER.to_string(),
        token: TOKEN.to_string(),
        authority_url: Some("https://auth.lab.local".to_string()),
        poll_interval: Duration::from_millis(50),
        settle_delay: Duration::from_millis(20),
        claim_timeout: Duration::from_secs(2),
        claim_attempts: 1,
        advertise_for: None,
        discovery_timeout: Some(Duration::from_secs(10)),
        metrics_addr: None,
    }
}

struct Node {
    stats: Arc<ReleaseStats>,
    task: JoinHandle<NodeOutcome>,
}

fn start(
    cluster: &MemoryCluster,
    discovery: &MemoryDiscovery,
    role: Role,
    name: &str,
    ip: Ipv4Addr,
    cancel: &CancellationToken,
) -> Node {
    let (membership, events) = cluster
        .create(name, SocketAddr::from((ip, 7946)))
        .unwrap();
    let stats = membership.stats();
    let group = GroupHandle::new(Arc::new(membership), events);

    let mut orchestrator = RoleOrchestrator::new(
        config(role, name),
        Arc::new(discovery.clone()),
        Arc::new(StaticTokenSource::new(
            TOKEN,
            Some("https://auth.lab.local".to_string()),
        )),
    )
    .with_advertise_addrs(vec![ip]);

    let cancel = cancel.clone();
    let task = tokio::spawn(async move { orchestrator.run(group, &cancel).await });
    Node { stats, task }
}

fn assert_released_once(stats: &ReleaseStats) {
    assert_eq!(stats.leaves(), 1);
    assert_eq!(stats.shutdowns(), 1);
}

#[tokio::test]
async fn test_token_issued_exactly_once() {
    let cluster = MemoryCluster::new();
    let discovery = MemoryDiscovery::new();
    let issuer_cancel = CancellationToken::new();
    let claimant_cancel = CancellationToken::new();

    let issuer = start(
        &cluster,
        &discovery,
        Role::Issuer,
        "bootbox001",
        Ipv4Addr::new(10, 0, 0, 1),
        &issuer_cancel,
    );

    let first = start(
        &cluster,
        &discovery,
        Role::Claimant,
        "worker-a",
        Ipv4Addr::new(10, 0, 0, 2),
        &claimant_cancel,
    );
    let second = start(
        &cluster,
        &discovery,
        Role::Claimant,
        "worker-b",
        Ipv4Addr::new(10, 0, 0, 3),
        &claimant_cancel,
    );

    let first_outcome = first.task.await.unwrap();
    let second_outcome = second.task.await.unwrap();
    assert_released_once(&first.stats);
    assert_released_once(&second.stats);

    let outcomes = [&first_outcome, &second_outcome];
    let grants: Vec<_> = outcomes
        .iter()
        .filter_map(|o| match o {
            NodeOutcome::Token { grant, responder } => Some((grant, responder)),
            _ => None,
        })
        .collect();
    assert_eq!(grants.len(), 1, "exactly one claimant gets the token: {outcomes:?}");
    let (grant, responder) = grants[0];
    assert_eq!(grant.token, TOKEN);
    assert_eq!(grant.base_url.as_deref(), Some("https://auth.lab.local"));
    assert_eq!(responder, "bootbox001");

    let denied = outcomes
        .iter()
        .filter(|o| {
            matches!(o, NodeOutcome::NoToken(NoTokenReason::Denied(reasons))
                if reasons == &vec![DENIED_ALREADY_ISSUED.to_string()])
        })
        .count();
    assert_eq!(denied, 1);

    // A late claimant is denied too.
    let late = start(
        &cluster,
        &discovery,
        Role::Claimant,
        "worker-c",
        Ipv4Addr::new(10, 0, 0, 4),
        &claimant_cancel,
    );
    assert_eq!(
        late.task.await.unwrap(),
        NodeOutcome::NoToken(NoTokenReason::Denied(vec![DENIED_ALREADY_ISSUED.to_string()]))
    );
    assert_released_once(&late.stats);

    issuer_cancel.cancel();
    match issuer.task.await.unwrap() {
        NodeOutcome::Served { issuance } => {
            assert!(issuance.issued);
            assert_eq!(issuance.token.as_deref(), Some(TOKEN));
            let winner = match (&first_outcome, &second_outcome) {
                (NodeOutcome::Token { .. }, _) => "worker-a",
                _ => "worker-b",
            };
            assert_eq!(issuance.issued_to.as_deref(), Some(winner));
        }
        other => panic!("expected issuer to report served, got {other:?}"),
    }
    assert_released_once(&issuer.stats);
    assert_eq!(discovery.published(), 1);
    assert_eq!(discovery.unpublished(), 1);
}

#[tokio::test]
async fn test_claimant_without_issuer_ends_cleanly() {
    let cluster = MemoryCluster::new();
    let discovery = MemoryDiscovery::new();
    let cancel = CancellationToken::new();

    let node = start(
        &cluster,
        &discovery,
        Role::Claimant,
        "worker-a",
        Ipv4Addr::new(10, 0, 0, 2),
        &cancel,
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    cancel.cancel();

    assert_eq!(
        node.task.await.unwrap(),
        NodeOutcome::NoToken(NoTokenReason::NotFound)
    );
    assert_released_once(&node.stats);
    assert!(discovery.lookups() >= 1);
}
