//! Prometheus Metrics
//!
//! Metrics go through the `metrics` facade and are no-ops until a recorder
//! is installed. With a listen address a Prometheus scrape endpoint is served.
//!
//! Metrics tracked:
//! - `bootbox_claims_total` - counter of issuer decisions by outcome
//! - `bootbox_group_members` - gauge of live group members
//! - `bootbox_discovery_lookups_total` - counter of discovery lookups by result
//! - `bootbox_claim_duration_seconds` - histogram of claimant wait time

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus recorder and HTTP listener.
///
/// Must be called inside a tokio runtime.
pub fn init_metrics(listen: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new().with_http_listener(listen).install()?;
    register_metric_descriptions();
    tracing::info!(listen = %listen, "Prometheus metrics endpoint started");
    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(
        "bootbox_claims_total",
        "Claims decided by this issuer, by outcome"
    );
    describe_gauge!(
        "bootbox_group_members",
        "Live members of the group, excluding this node"
    );
    describe_counter!(
        "bootbox_discovery_lookups_total",
        "Discovery lookups, by whether the issuer was found"
    );
    describe_histogram!(
        "bootbox_claim_duration_seconds",
        "Time a claimant spent waiting for a claim to resolve"
    );
}

/// Record an issuer decision
pub fn record_claim(outcome: &str) {
    counter!("bootbox_claims_total", "outcome" => outcome.to_string()).increment(1);
}

/// Update the group member gauge
pub fn set_member_count(count: usize) {
    gauge!("bootbox_group_members").set(count as f64);
}

/// Record a discovery lookup
pub fn record_lookup(found: bool) {
    let result = if found { "found" } else { "miss" };
    counter!("bootbox_discovery_lookups_total", "result" => result).increment(1);
}

/// Record how long a claim took
pub fn record_claim_duration(duration: Duration) {
    histogram!("bootbox_claim_duration_seconds").record(duration.as_secs_f64());
}
