//! Group Membership Module
//!
//! Provides the coordination group issuers and claimants join:
//! - `membership`: the substrate trait, events and the owning [`GroupHandle`]
//! - `swarm`: libp2p-backed substrate (TCP, noise, yamux, identify, request-response)
//! - `memory`: in-process substrate for tests and local simulation
//! - `types`: member records and the member table

pub mod behaviour;
pub mod config;
pub mod memory;
pub mod membership;
pub mod swarm;
pub mod types;

pub use config::NetworkConfig;
pub use membership::{
    GroupEvent, GroupHandle, IncomingQuery, Member, MemberStatus, Membership, MembershipError,
    QueryParams, QueryResponse, QueryResponses,
};
pub use swarm::SwarmMembership;
