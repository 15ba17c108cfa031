//! Single-use magic-link tokens for no-login approval decisions.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::HashMap;

use crate::error::{WorkflowError, WorkflowResult};

/// Tokens expire this many hours after issue.
pub const TOKEN_TTL_HOURS: i64 = 48;

const TOKEN_LENGTH: usize = 48;

struct TokenEntry {
    approval_id: String,
    expires_at: DateTime<Utc>,
    used: bool,
}

/// In-memory registry of issued tokens, keyed by the token string.
#[derive(Default)]
pub struct TokenRegistry {
    tokens: RwLock<HashMap<String, TokenEntry>>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token bound to one approval record. Piggybacks an
    /// expiry sweep so tokens for approvals that never resolve do not
    /// accumulate.
    pub fn issue(&self, approval_id: &str, now: DateTime<Utc>) -> String {
        self.purge_expired(now);
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(TOKEN_LENGTH)
            .map(char::from)
            .collect();
        self.tokens.write().insert(
            token.clone(),
            TokenEntry {
                approval_id: approval_id.to_string(),
                expires_at: now + Duration::hours(TOKEN_TTL_HOURS),
                used: false,
            },
        );
        token
    }

    /// Redeem a token, marking it used. Unknown, expired, and already-used
    /// tokens are indistinguishable to the caller.
    pub fn redeem(&self, token: &str, now: DateTime<Utc>) -> WorkflowResult<String> {
        let mut tokens = self.tokens.write();
        let entry = tokens.get_mut(token).ok_or(WorkflowError::InvalidToken)?;
        if entry.used || now >= entry.expires_at {
            return Err(WorkflowError::InvalidToken);
        }
        entry.used = true;
        Ok(entry.approval_id.clone())
    }

    /// Invalidate all outstanding tokens for an approval, e.g. after
    /// delegation moves it to another user.
    pub fn revoke_for(&self, approval_id: &str) {
        self.tokens
            .write()
            .retain(|_, entry| entry.approval_id != approval_id);
    }

    /// Drop every expired entry, used or not.
    pub fn purge_expired(&self, now: DateTime<Utc>) {
        self.tokens.write().retain(|_, entry| now < entry.expires_at);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.tokens.read().len()
    }
}
