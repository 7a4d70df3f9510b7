//! Token Source
//!
//! The issuer never holds a literal token in code; it asks a source for it
//! at the moment a claim wins.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum TokenSourceError {
    #[error("token authority unavailable: {0}")]
    Unavailable(String),

    #[error("token authority returned an empty token")]
    Empty,
}

#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Produce the token value handed to the winning claimant.
    async fn fetch(&self) -> Result<String, TokenSourceError>;

    /// Base URL of the authority the token is valid against, if known.
    fn base_url(&self) -> Option<String>;
}

/// Token configured up front (flag, environment, or generated at startup).
#[derive(Debug, Clone)]
pub struct StaticTokenSource {
    token: String,
    base_url: Option<String>,
}

impl StaticTokenSource {
    pub fn new(token: impl Into<String>, base_url: Option<String>) -> Self {
        Self {
            token: token.into(),
            base_url,
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn fetch(&self) -> Result<String, TokenSourceError> {
        if self.token.is_empty() {
            return Err(TokenSourceError::Empty);
        }
        Ok(self.token.clone())
    }

    fn base_url(&self) -> Option<String> {
        self.base_url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_source() {
        let source = StaticTokenSource::new("otp-123", Some("https://auth.local".to_string()));
        assert_eq!(source.fetch().await.unwrap(), "otp-123");
        assert_eq!(source.base_url().as_deref(), Some("https://auth.local"));
    }

    #[tokio::test]
    async fn test_empty_token_is_an_error() {
        let source = StaticTokenSource::new("", None);
        assert!(matches!(source.fetch().await, Err(TokenSourceError::Empty)));
    }
}
