//! Token Claiming
//!
//! The exactly-once handoff of the provisioning token:
//! - `token_source`: where the issuer gets the token value
//! - `issuance`: single-writer actor owning the issued flag
//! - `responder`: issuer loop answering `claim-token` queries
//! - `requester`: claimant side, broadcasts a claim and waits for a grant

pub mod issuance;
pub mod requester;
pub mod responder;
pub mod token_source;

pub use issuance::{ClaimToken, GetIssuance, IssuanceActor, IssuanceDecision, IssuanceState};
pub use requester::{ClaimError, ClaimResult, TokenRequester};
pub use responder::TokenResponder;
pub use token_source::{StaticTokenSource, TokenSource, TokenSourceError};
