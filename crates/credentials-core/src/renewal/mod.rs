//! Renewal token rotation
//!
//! Each user owns at most one live renewal token. Login reuses a token that
//! is still valid; an explicit renewal always replaces it, which makes a
//! redeemed value useless for a second attempt.

use std::sync::Arc;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

use crate::clock::Clock;
use crate::store::{CredentialStore, RenewalTokenStore};
use crate::types::{renewal_token_ttl, Identity, RenewalToken};
use crate::{Error, Result};

/// Entropy of a renewal value
const RENEWAL_VALUE_BYTES: usize = 32;

/// How often login re-reads a slot that another writer changed under it
const MAX_INSTALL_ATTEMPTS: usize = 3;

/// Fresh, URL-safe renewal value
pub fn generate_value() -> String {
    let mut bytes = [0u8; RENEWAL_VALUE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub struct RenewalTokenRotator {
    store: Arc<dyn RenewalTokenStore>,
    credentials: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
}

impl RenewalTokenRotator {
    pub fn new(
        store: Arc<dyn RenewalTokenStore>,
        credentials: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            credentials,
            clock,
        }
    }

    fn mint(&self, user_id: &str, now: DateTime<Utc>) -> RenewalToken {
        RenewalToken {
            value: generate_value(),
            owner_user_id: user_id.to_string(),
            expires_at: now + renewal_token_ttl(),
        }
    }

    /// The user's live renewal token, minting one when none is valid.
    ///
    /// When a concurrent login installs a token first, that token is
    /// returned instead, so every caller ends up with the value that
    /// actually sits in the slot.
    pub async fn obtain_for_login(&self, user_id: &str) -> Result<RenewalToken> {
        let mut current = self.store.get(user_id).await?;

        for _ in 0..MAX_INSTALL_ATTEMPTS {
            let now = self.clock.now();

            if let Some(token) = current.as_ref().filter(|t| t.is_valid_at(now)) {
                debug!(user_id, "reusing live renewal token");
                return Ok(token.clone());
            }

            let fresh = self.mint(user_id, now);
            let expected = current.as_ref().map(|t| t.value.as_str());
            if self.store.replace(user_id, expected, fresh.clone()).await? {
                debug!(user_id, expires_at = %fresh.expires_at, "issued renewal token");
                return Ok(fresh);
            }

            debug!(user_id, "renewal slot changed concurrently, re-reading");
            current = self.store.get(user_id).await?;
        }

        warn!(user_id, "gave up installing renewal token");
        Err(Error::RenewalConflict)
    }

    /// Redeem `presented` for a brand-new token.
    ///
    /// Unknown, expired and already-redeemed values all fail with
    /// `InvalidOrExpiredRefreshToken`.
    pub async fn rotate(&self, presented: &str) -> Result<(Identity, RenewalToken)> {
        let now = self.clock.now();

        let identity = self
            .credentials
            .find_by_renewal_value(presented, now)
            .await?
            .ok_or(Error::InvalidOrExpiredRefreshToken)?;

        let fresh = self.mint(&identity.id, now);
        if !self.store.replace(&identity.id, Some(presented), fresh.clone()).await? {
            warn!(user_id = %identity.id, "renewal token was redeemed concurrently");
            return Err(Error::InvalidOrExpiredRefreshToken);
        }

        debug!(user_id = %identity.id, expires_at = %fresh.expires_at, "rotated renewal token");
        Ok((identity, fresh))
    }

    /// Empty the user's slot
    pub async fn revoke(&self, user_id: &str) -> Result<()> {
        self.store.clear(user_id).await
    }
}
