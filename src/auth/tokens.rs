//! In-memory access token cache for a single credential handle

use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds before expiry at which a token is treated as stale.
const EXPIRY_MARGIN_SECS: u64 = 300;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// Access token plus its absolute expiry.
#[derive(Clone)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: Option<u64>,
}

impl CachedToken {
    pub fn new(token: String, expires_in_secs: Option<u64>) -> Self {
        let expires_at = expires_in_secs.map(|secs| now_secs() + secs);
        Self { token, expires_at }
    }

    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            // Consider expired if less than 5 minutes remaining
            Some(exp) => now_secs() + EXPIRY_MARGIN_SECS >= exp,
            None => false,
        }
    }
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_token_not_expired() {
        let token = CachedToken::new("abc".to_string(), Some(3600));
        assert!(!token.is_expired());
    }

    #[test]
    fn test_token_inside_margin_is_expired() {
        let token = CachedToken::new("abc".to_string(), Some(60));
        assert!(token.is_expired());
    }

    #[test]
    fn test_token_without_expiry_never_expires() {
        let token = CachedToken::new("abc".to_string(), None);
        assert!(!token.is_expired());
    }

    #[test]
    fn test_debug_redacts_secret() {
        let token = CachedToken::new("super-secret".to_string(), Some(3600));
        assert!(!format!("{:?}", token).contains("super-secret"));
    }
}
