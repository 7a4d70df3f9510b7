//! Bootbox Node Library
//!
//! Issuer and claimant roles for handing a one-time provisioning token to
//! exactly one machine on an ad-hoc local network.

pub mod claim;
pub mod config;
pub mod discovery;
pub mod network;
pub mod observability;
pub mod orchestrator;
pub mod version;
