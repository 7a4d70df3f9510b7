//! Claim Protocol Messages
//!
//! Payloads carried by the group-wide `claim-token` query and its per-node
//! answers. The membership substrate treats them as opaque bytes; they are
//! JSON-encoded here.

use serde::{Deserialize, Serialize};

/// Query name claimants broadcast and issuers answer.
pub const CLAIM_QUERY_NAME: &str = "claim-token";

/// Denial reason once the token has been handed out.
pub const DENIED_ALREADY_ISSUED: &str = "token already issued";

/// Denial reason when the credential authority could not produce a token.
pub const DENIED_AUTHORITY_UNAVAILABLE: &str = "token authority unavailable";

/// Errors decoding a claim payload.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed claim payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Payload of a claim query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRequest {
    /// Node name of the claimant
    pub requester: String,
    /// Free-form message, informational only
    #[serde(default)]
    pub message: String,
}

impl ClaimRequest {
    pub fn new(requester: impl Into<String>) -> Self {
        Self {
            requester: requester.into(),
            message: "request".to_string(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing a struct of plain strings cannot fail
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// What a claimant receives when its claim wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    /// The one-time token
    pub token: String,
    /// Base URL of the credential authority the token is valid against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Result of one claim as decided by a responder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum ClaimOutcome {
    Granted(Grant),
    Denied { reason: String },
}

impl ClaimOutcome {
    pub fn denied(reason: impl Into<String>) -> Self {
        ClaimOutcome::Denied {
            reason: reason.into(),
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, ClaimOutcome::Granted(_))
    }
}

/// A single node's answer to a claim query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimResponse {
    /// Node name of the responder
    pub responder: String,
    pub outcome: ClaimOutcome,
}

impl ClaimResponse {
    pub fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_denied_wire_shape() {
        let response = ClaimResponse {
            responder: "bootbox001".to_string(),
            outcome: ClaimOutcome::denied(DENIED_ALREADY_ISSUED),
        };
        let json: serde_json::Value = serde_json::from_slice(&response.encode()).unwrap();
        assert_eq!(json["outcome"]["outcome"], "denied");
        assert_eq!(json["outcome"]["reason"], DENIED_ALREADY_ISSUED);
    }

    #[test]
    fn test_granted_omits_missing_base_url() {
        let response = ClaimResponse {
            responder: "bootbox001".to_string(),
            outcome: ClaimOutcome::Granted(Grant {
                token: "abc".to_string(),
                base_url: None,
            }),
        };
        let json: serde_json::Value = serde_json::from_slice(&response.encode()).unwrap();
        assert_eq!(json["outcome"]["token"], "abc");
        assert!(json["outcome"].get("base_url").is_none());

        let decoded = ClaimResponse::decode(&response.encode()).unwrap();
        assert!(decoded.outcome.is_granted());
    }

    #[test]
    fn test_request_message_is_optional() {
        let request = ClaimRequest::decode(br#"{"requester":"worker-1"}"#).unwrap();
        assert_eq!(request.requester, "worker-1");
        assert!(request.message.is_empty());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(ClaimResponse::decode(b"ONE-TIME-TOKEN-12345").is_err());
    }
}
