//! Bootbox - One-Time Token Provisioning

use anyhow::{anyhow, Context};
use bootbox_core::Role;
use bootbox_node::claim::StaticTokenSource;
use bootbox_node::config::{Cli, NodeConfig};
use bootbox_node::discovery::{interfaces, MdnsDiscovery};
use bootbox_node::network::{GroupHandle, SwarmMembership};
use bootbox_node::observability::{init_metrics, init_tracing, shutdown_tracing, TracingConfig};
use bootbox_node::orchestrator::{NodeOutcome, RoleOrchestrator};
use bootbox_node::version;
use clap::Parser;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(TracingConfig::from_env())
        .map_err(|e| anyhow!("failed to initialize tracing: {e}"))?;

    let config = NodeConfig::try_from(cli).context("invalid configuration")?;
    if let Some(addr) = config.metrics_addr {
        init_metrics(addr).map_err(|e| anyhow!("failed to start metrics endpoint: {e}"))?;
    }

    info!(
        version = %version::full_version(),
        node = %config.network.node_name,
        role = %config.role,
        "Starting bootbox"
    );

    let discovery = MdnsDiscovery::new().context("failed to start mDNS discovery")?;
    let (membership, events) = SwarmMembership::create(config.network.clone())
        .context("failed to create membership group")?;
    info!(peer_id = %membership.local_peer_id(), "Membership identity ready");
    let group = GroupHandle::new(Arc::new(membership), events);

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    let role = config.role;
    let advertise_addrs = advertise_addrs(config.network.bind_address);
    let token_source = StaticTokenSource::new(config.token.clone(), config.authority_url.clone());
    let mut orchestrator =
        RoleOrchestrator::new(config, Arc::new(discovery.clone()), Arc::new(token_source))
            .with_advertise_addrs(advertise_addrs);

    let outcome = orchestrator.run(group, &cancel).await;
    discovery.shutdown();
    report(role, outcome);

    shutdown_tracing();
    Ok(())
}

/// A specific bind address is advertised as is; otherwise every physical interface.
fn advertise_addrs(bind_address: IpAddr) -> Vec<Ipv4Addr> {
    match bind_address {
        IpAddr::V4(addr) if !addr.is_unspecified() => vec![addr],
        _ => interfaces::physical_ipv4_addrs(),
    }
}

fn report(role: Role, outcome: NodeOutcome) {
    match outcome {
        NodeOutcome::Token { grant, responder } => {
            info!(responder = %responder, "Provisioning token obtained");
            println!("token: {}", grant.token);
            if let Some(base_url) = grant.base_url {
                println!("base_url: {base_url}");
            }
        }
        NodeOutcome::NoToken(reason) => {
            warn!(reason = %reason, "No token obtained");
            println!("no token obtained");
        }
        NodeOutcome::Served { issuance } => {
            info!(
                role = %role,
                issued = issuance.issued,
                issued_to = ?issuance.issued_to,
                "Issuer stopped"
            );
        }
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("Shutdown signal received");
    cancel.cancel();
}
