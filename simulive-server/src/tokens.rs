//! Playback token issuance
//!
//! Tokens are random opaque strings with an expiry. They gate access at the
//! edge; nothing here signs them.

use std::time::Duration;

use rand::distributions::Alphanumeric;
use rand::Rng;
use simulive_core::schedule::SignedTokens;
use thiserror::Error;

/// Length of each issued token
const TOKEN_LENGTH: usize = 32;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("no signed stream for playback id {0}")]
    UnknownPlayback(String),

    #[error("token issuance unavailable: {0}")]
    Unavailable(String),
}

pub trait TokenIssuer: Send + Sync {
    fn issue(&self, playback_id: &str) -> Result<SignedTokens, TokenError>;
}

/// Issues random tokens valid for `ttl`
#[derive(Debug, Clone)]
pub struct OpaqueTokenIssuer {
    ttl: Duration,
}

impl OpaqueTokenIssuer {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

impl TokenIssuer for OpaqueTokenIssuer {
    fn issue(&self, playback_id: &str) -> Result<SignedTokens, TokenError> {
        if playback_id.trim().is_empty() {
            return Err(TokenError::UnknownPlayback(playback_id.to_string()));
        }

        let now = chrono::Utc::now().timestamp_millis();
        Ok(SignedTokens {
            playback: random_token(),
            thumbnail: Some(random_token()),
            storyboard: Some(random_token()),
            expires_at: Some(now.saturating_add(self.ttl.as_millis() as i64)),
        })
    }
}
