//! Presence Advertiser
//!
//! Issuer side of discovery: keeps one advertisement published while the
//! issuer accepts joiners and withdraws it exactly once on the way out.

use super::{DiscoveryError, ServiceDiscovery};
use crate::observability::events;
use bootbox_core::Advertisement;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct PresenceAdvertiser {
    discovery: Arc<dyn ServiceDiscovery>,
    advertisement: Advertisement,
    duration: Option<Duration>,
}

impl PresenceAdvertiser {
    pub fn new(discovery: Arc<dyn ServiceDiscovery>, advertisement: Advertisement) -> Self {
        Self {
            discovery,
            advertisement,
            duration: None,
        }
    }

    /// Withdraw after `duration` even if not cancelled.
    pub fn with_duration(mut self, duration: Option<Duration>) -> Self {
        self.duration = duration;
        self
    }

    /// Publish, then block until `cancel` fires or the duration elapses.
    ///
    /// A publish failure is returned immediately; nothing is withdrawn in
    /// that case.
    pub async fn advertise(&self, cancel: &CancellationToken) -> Result<(), DiscoveryError> {
        let ad = &self.advertisement;
        let registration = self.discovery.publish(ad).await?;
        events::advertisement_published(&ad.service_name, &ad.addresses, ad.port);

        match self.duration {
            Some(duration) => {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(duration) => {}
                }
            }
            None => cancel.cancelled().await,
        }

        let withdrawn = self.discovery.unpublish(registration).await;
        match &withdrawn {
            Ok(()) => events::advertisement_withdrawn(&ad.service_name),
            Err(e) => warn!(error = %e, service = %ad.service_name, "Failed to withdraw advertisement"),
        }
        withdrawn
    }
}
