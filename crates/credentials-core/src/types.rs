//! Core types for credentials-core

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifetime of every access token, fixed at issuance.
pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 10;

/// Lifetime of a freshly minted renewal token.
pub const RENEWAL_TOKEN_TTL_DAYS: i64 = 2;

pub fn access_token_ttl() -> Duration {
    Duration::minutes(ACCESS_TOKEN_TTL_MINUTES)
}

pub fn renewal_token_ttl() -> Duration {
    Duration::days(RENEWAL_TOKEN_TTL_DAYS)
}

/// A verified account as reported by the credential store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    pub username: String,
    pub email: String,
}

impl Identity {
    /// Create a new identity ID
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

/// Request to create a new identity
#[derive(Debug, Clone, Deserialize)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub secret: String,
}

/// A signed, bounded-lifetime access token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Compact JWT (header.payload.signature)
    pub token: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// The single live renewal token a user may hold
#[derive(Clone, PartialEq, Eq)]
pub struct RenewalToken {
    pub value: String,
    pub owner_user_id: String,
    pub expires_at: DateTime<Utc>,
}

impl RenewalToken {
    /// A renewal token is usable strictly before its expiry instant.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for RenewalToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenewalToken")
            .field("value", &"<redacted>")
            .field("owner_user_id", &self.owner_user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
