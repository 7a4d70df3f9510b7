//! Core shared types for bootbox
//!
//! Protocol types exchanged between issuers and claimants, independent of
//! the membership and discovery substrates that carry them.

pub mod advertisement;
pub mod claim;
pub mod role;

pub use advertisement::Advertisement;
pub use claim::{
    ClaimOutcome, ClaimRequest, ClaimResponse, CodecError, Grant, CLAIM_QUERY_NAME,
    DENIED_ALREADY_ISSUED, DENIED_AUTHORITY_UNAVAILABLE,
};
pub use role::{ParseRoleError, Role};
