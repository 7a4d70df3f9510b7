//! Address Resolver
//!
//! Claimant side of discovery. Polls the discovery substrate on a fixed
//! interval until a record carrying the expected marker shows up, then hands
//! back the issuer's membership address. Cancellation and the optional
//! discovery timeout both yield `Ok(None)`: not finding an issuer is an
//! expected outcome, not a fault.

use super::interfaces::is_joinable;
use super::{DiscoveryError, ServiceDiscovery, ServiceRecord};
use crate::observability::{events, metrics};
use bootbox_core::Advertisement;
use std::net::SocketAddrV4;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct AddressResolver {
    discovery: Arc<dyn ServiceDiscovery>,
    service_name: String,
    marker: String,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl AddressResolver {
    pub fn new(
        discovery: Arc<dyn ServiceDiscovery>,
        service_name: impl Into<String>,
        marker: impl Into<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            discovery,
            service_name: service_name.into(),
            marker: marker.into(),
            poll_interval,
            timeout: None,
        }
    }

    /// Give up after `timeout` even without cancellation.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// First joinable address of a record carrying the marker.
    fn match_record(&self, record: &ServiceRecord) -> Option<SocketAddrV4> {
        if !Advertisement::matches_marker(&record.metadata, &self.marker) {
            debug!(record = %record.name, "Ignoring record without issuer marker");
            return None;
        }
        record
            .addresses
            .iter()
            .find(|addr| is_joinable(addr))
            .map(|addr| SocketAddrV4::new(*addr, record.port))
    }

    /// Poll until the issuer is found, the timeout elapses or `cancel` fires.
    pub async fn resolve(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<SocketAddrV4>, DiscoveryError> {
        info!(
            service = %self.service_name,
            poll_interval_secs = self.poll_interval.as_secs_f64(),
            "Looking for issuer"
        );

        let expiry = expire_at(self.timeout.map(|t| Instant::now() + t));
        tokio::pin!(expiry);

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(service = %self.service_name, "Discovery cancelled");
                    return Ok(None);
                }
                _ = &mut expiry => {
                    info!(service = %self.service_name, "Discovery timed out");
                    return Ok(None);
                }
                _ = ticker.tick() => {}
            }

            let mut records = match self
                .discovery
                .lookup(&self.service_name, self.poll_interval)
                .await
            {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, service = %self.service_name, "Discovery lookup failed");
                    metrics::record_lookup(false);
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!(service = %self.service_name, "Discovery cancelled");
                        return Ok(None);
                    }
                    _ = &mut expiry => {
                        info!(service = %self.service_name, "Discovery timed out");
                        return Ok(None);
                    }
                    record = records.recv() => match record {
                        Some(record) => {
                            if let Some(addr) = self.match_record(&record) {
                                metrics::record_lookup(true);
                                events::issuer_discovered(&self.service_name, &record.host, addr);
                                return Ok(Some(addr));
                            }
                        }
                        None => break,
                    },
                }
            }
            metrics::record_lookup(false);
        }
    }
}

async fn expire_at(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::memory::MemoryDiscovery;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    const SERVICE: &str = "bootstrap-v1";
    const MARKER: &str = "ISSUER-READY";

    fn record(marker: &str, addresses: Vec<Ipv4Addr>) -> ServiceRecord {
        ServiceRecord {
            name: format!("issuer.{SERVICE}"),
            host: "issuer.local.".to_string(),
            addresses,
            port: 7946,
            metadata: HashMap::from([("marker".to_string(), marker.to_string())]),
        }
    }

    fn resolver(discovery: &MemoryDiscovery) -> AddressResolver {
        AddressResolver::new(
            Arc::new(discovery.clone()),
            SERVICE,
            MARKER,
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolves_advertised_address() {
        let discovery = MemoryDiscovery::new();
        discovery.insert(SERVICE, record(MARKER, vec![Ipv4Addr::new(10, 0, 0, 5)]));

        let addr = resolver(&discovery)
            .resolve(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(addr, Some(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 7946)));
        assert_eq!(discovery.lookups(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_within_poll_interval_of_appearing() {
        let discovery = MemoryDiscovery::new();
        let late = discovery.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            late.insert(SERVICE, record(MARKER, vec![Ipv4Addr::new(10, 0, 0, 5)]));
        });

        let start = Instant::now();
        let addr = resolver(&discovery)
            .resolve(&CancellationToken::new())
            .await
            .unwrap();
        assert!(addr.is_some());
        // Polls at 0, 5, 10 and 15 seconds.
        assert_eq!(start.elapsed(), Duration::from_secs(15));
        assert_eq!(discovery.lookups(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ignores_wrong_marker_and_loopback() {
        let discovery = MemoryDiscovery::new();
        discovery.insert(SERVICE, record("SOMEONE-ELSE", vec![Ipv4Addr::new(10, 0, 0, 9)]));
        let mut loopback = record(MARKER, vec![Ipv4Addr::LOCALHOST]);
        loopback.name = "loopback.bootstrap-v1".to_string();
        discovery.insert(SERVICE, loopback);

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(11)).await;
            canceller.cancel();
        });

        assert_eq!(resolver(&discovery).resolve(&cancel).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_exactly_at_cancellation() {
        let discovery = MemoryDiscovery::new();
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            canceller.cancel();
        });

        let start = Instant::now();
        let addr = resolver(&discovery).resolve(&cancel).await.unwrap();
        assert_eq!(addr, None);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_not_found() {
        let discovery = MemoryDiscovery::new();
        let start = Instant::now();
        let addr = resolver(&discovery)
            .with_timeout(Some(Duration::from_secs(12)))
            .resolve(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(addr, None);
        assert_eq!(start.elapsed(), Duration::from_secs(12));
    }
}
