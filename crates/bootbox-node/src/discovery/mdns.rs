//! Multicast DNS Service Discovery
//!
//! Production discovery substrate built on `mdns-sd`. An advertisement maps
//! to one DNS-SD instance of type `_<service>._tcp.local.` whose TXT record
//! carries the issuer marker.

use super::{validate_service_name, DiscoveryError, Registration, ServiceDiscovery, ServiceRecord};
use async_trait::async_trait;
use bootbox_core::Advertisement;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const LOOKUP_BUFFER: usize = 16;

/// DNS-SD service type for a service name.
pub fn service_type(service_name: &str) -> String {
    format!("_{}._tcp.local.", service_name)
}

#[derive(Clone)]
pub struct MdnsDiscovery {
    daemon: ServiceDaemon,
}

impl MdnsDiscovery {
    /// Start the mDNS daemon. Fails when no multicast socket can be bound.
    pub fn new() -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new()?;
        info!("mDNS daemon started");
        Ok(Self { daemon })
    }

    /// Stop the daemon. Outstanding lookups end with it.
    pub fn shutdown(&self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!(error = %e, "mDNS daemon shutdown failed");
        }
    }
}

fn to_record(info: &ServiceInfo) -> ServiceRecord {
    let metadata: HashMap<String, String> = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();

    let mut addresses: Vec<_> = info.get_addresses_v4().into_iter().copied().collect();
    addresses.sort();

    ServiceRecord {
        name: info.get_fullname().to_string(),
        host: info.get_hostname().to_string(),
        addresses,
        port: info.get_port(),
        metadata,
    }
}

#[async_trait]
impl ServiceDiscovery for MdnsDiscovery {
    async fn publish(&self, advertisement: &Advertisement) -> Result<Registration, DiscoveryError> {
        validate_service_name(&advertisement.service_name)?;
        if advertisement.addresses.is_empty() {
            return Err(DiscoveryError::Publish(
                "no advertisable IPv4 addresses".to_string(),
            ));
        }

        let ty = service_type(&advertisement.service_name);
        let host = format!("{}.local.", advertisement.host_identity);
        let ips = advertisement
            .addresses
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let service = ServiceInfo::new(
            &ty,
            &advertisement.host_identity,
            &host,
            ips.as_str(),
            advertisement.port,
            advertisement.metadata(),
        )?;
        let instance = service.get_fullname().to_string();
        self.daemon.register(service)?;

        debug!(instance = %instance, "Registered mDNS service");
        Ok(Registration {
            service_name: advertisement.service_name.clone(),
            instance,
        })
    }

    async fn unpublish(&self, registration: Registration) -> Result<(), DiscoveryError> {
        self.daemon.unregister(&registration.instance)?;
        debug!(instance = %registration.instance, "Unregistered mDNS service");
        Ok(())
    }

    async fn lookup(
        &self,
        service_name: &str,
        window: Duration,
    ) -> Result<mpsc::Receiver<ServiceRecord>, DiscoveryError> {
        validate_service_name(service_name)?;
        let ty = service_type(service_name);
        let browse = self.daemon.browse(&ty)?;
        let daemon = self.daemon.clone();
        let (tx, rx) = mpsc::channel(LOOKUP_BUFFER);
        let deadline = Instant::now() + window;

        tokio::spawn(async move {
            loop {
                match tokio::time::timeout_at(deadline, browse.recv_async()).await {
                    Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                        if tx.send(to_record(&info)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Ok(event)) => {
                        debug!(?event, "mDNS browse event");
                    }
                    // Daemon gone or window elapsed
                    Ok(Err(_)) | Err(_) => break,
                }
            }
            if let Err(e) = daemon.stop_browse(&ty) {
                debug!(error = %e, service_type = %ty, "stop_browse failed");
            }
        });

        Ok(rx)
    }
}
