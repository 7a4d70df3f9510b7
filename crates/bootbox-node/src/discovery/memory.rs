//! In-Process Discovery Registry
//!
//! Shared record registry standing in for multicast DNS in tests. Clones
//! share the same registry, so an issuer and several claimants can be wired
//! to one instance. Publish, unpublish and lookup calls are counted.

use super::{DiscoveryError, Registration, ServiceDiscovery, ServiceRecord};
use async_trait::async_trait;
use bootbox_core::Advertisement;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct Counters {
    published: AtomicUsize,
    unpublished: AtomicUsize,
    lookups: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct MemoryDiscovery {
    /// service name -> instance name -> record
    records: Arc<Mutex<HashMap<String, HashMap<String, ServiceRecord>>>>,
    counters: Arc<Counters>,
    fail_publish: Arc<AtomicBool>,
}

impl MemoryDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent publish fail.
    pub fn fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    /// Insert a record directly, bypassing publish.
    pub fn insert(&self, service_name: &str, record: ServiceRecord) {
        if let Ok(mut records) = self.records.lock() {
            records
                .entry(service_name.to_string())
                .or_default()
                .insert(record.name.clone(), record);
        }
    }

    pub fn published(&self) -> usize {
        self.counters.published.load(Ordering::SeqCst)
    }

    pub fn unpublished(&self) -> usize {
        self.counters.unpublished.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.counters.lookups.load(Ordering::SeqCst)
    }

    /// Number of records currently visible for a service.
    pub fn visible(&self, service_name: &str) -> usize {
        self.records
            .lock()
            .map(|r| r.get(service_name).map_or(0, HashMap::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl ServiceDiscovery for MemoryDiscovery {
    async fn publish(&self, advertisement: &Advertisement) -> Result<Registration, DiscoveryError> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Publish("publish disabled".to_string()));
        }

        let instance = format!(
            "{}.{}",
            advertisement.host_identity, advertisement.service_name
        );
        let record = ServiceRecord {
            name: instance.clone(),
            host: advertisement.host_identity.clone(),
            addresses: advertisement.addresses.clone(),
            port: advertisement.port,
            metadata: advertisement.metadata(),
        };
        self.insert(&advertisement.service_name, record);
        self.counters.published.fetch_add(1, Ordering::SeqCst);

        Ok(Registration {
            service_name: advertisement.service_name.clone(),
            instance,
        })
    }

    async fn unpublish(&self, registration: Registration) -> Result<(), DiscoveryError> {
        let mut records = self.records.lock().map_err(|_| DiscoveryError::Unavailable)?;
        if let Some(instances) = records.get_mut(&registration.service_name) {
            instances.remove(&registration.instance);
        }
        self.counters.unpublished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Delivers the records visible right now, then closes the channel.
    async fn lookup(
        &self,
        service_name: &str,
        _window: Duration,
    ) -> Result<mpsc::Receiver<ServiceRecord>, DiscoveryError> {
        self.counters.lookups.fetch_add(1, Ordering::SeqCst);

        let snapshot: Vec<ServiceRecord> = {
            let records = self.records.lock().map_err(|_| DiscoveryError::Unavailable)?;
            records
                .get(service_name)
                .map(|r| r.values().cloned().collect())
                .unwrap_or_default()
        };

        let (tx, rx) = mpsc::channel(snapshot.len().max(1));
        for record in snapshot {
            // Capacity covers the whole snapshot.
            let _ = tx.try_send(record);
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn advertisement() -> Advertisement {
        Advertisement {
            service_name: "bootstrap-v1".to_string(),
            host_identity: "bootbox001".to_string(),
            addresses: vec![Ipv4Addr::new(10, 0, 0, 5)],
            port: 7946,
            marker: "ISSUER-READY".to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_lookup_unpublish() {
        let discovery = MemoryDiscovery::new();
        let registration = discovery.publish(&advertisement()).await.unwrap();
        assert_eq!(discovery.visible("bootstrap-v1"), 1);

        let mut rx = discovery
            .lookup("bootstrap-v1", Duration::from_secs(1))
            .await
            .unwrap();
        let record = rx.recv().await.unwrap();
        assert_eq!(record.port, 7946);
        assert_eq!(record.addresses, vec![Ipv4Addr::new(10, 0, 0, 5)]);
        assert!(Advertisement::matches_marker(&record.metadata, "ISSUER-READY"));
        assert!(rx.recv().await.is_none());

        discovery.unpublish(registration).await.unwrap();
        assert_eq!(discovery.visible("bootstrap-v1"), 0);
        assert_eq!(discovery.published(), 1);
        assert_eq!(discovery.unpublished(), 1);
        assert_eq!(discovery.lookups(), 1);
    }

    #[tokio::test]
    async fn test_lookup_other_service_is_empty() {
        let discovery = MemoryDiscovery::new();
        discovery.publish(&advertisement()).await.unwrap();

        let mut rx = discovery
            .lookup("other-service", Duration::from_secs(1))
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_publish() {
        let discovery = MemoryDiscovery::new();
        discovery.fail_publish(true);
        assert!(matches!(
            discovery.publish(&advertisement()).await,
            Err(DiscoveryError::Publish(_))
        ));
        assert_eq!(discovery.published(), 0);
    }
}
