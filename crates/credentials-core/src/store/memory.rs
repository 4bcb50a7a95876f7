//! In-memory user store
//!
//! Keeps identities, roles and renewal slots in DashMaps. A renewal slot is
//! only ever changed while holding the shard lock of its user entry, which
//! serializes updates per user without blocking other users.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use super::{CredentialStore, RenewalTokenStore, RoleRegistry};
use crate::config::PasswordConfig;
use crate::password::SecretHasher;
use crate::types::{Identity, NewIdentity, RenewalToken};
use crate::{Error, Result};

#[derive(Debug, Clone)]
struct UserRecord {
    identity: Identity,
    password_hash: String,
    roles: BTreeSet<String>,
    renewal: Option<RenewalSlot>,
}

#[derive(Debug, Clone)]
struct RenewalSlot {
    value: String,
    expires_at: DateTime<Utc>,
}

// Both keys fold ASCII case only, matching SQLite's NOCASE collation
fn normalize_username(username: &str) -> String {
    username.to_ascii_uppercase()
}

fn normalize_role(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

#[derive(Clone)]
pub struct InMemoryUserStore {
    /// user_id -> record
    users: Arc<DashMap<String, UserRecord>>,
    /// normalized username -> user_id
    usernames: Arc<DashMap<String, String>>,
    /// normalized role name -> role name as created
    roles: Arc<DashMap<String, String>>,
    hasher: SecretHasher,
}

impl InMemoryUserStore {
    pub fn new(password: &PasswordConfig) -> Result<Self> {
        Ok(Self {
            users: Arc::new(DashMap::new()),
            usernames: Arc::new(DashMap::new()),
            roles: Arc::new(DashMap::new()),
            hasher: SecretHasher::new(password)?,
        })
    }

    pub fn identity_count(&self) -> usize {
        self.users.len()
    }

    fn identity_by_username(&self, username: &str) -> Option<(Identity, String)> {
        let user_id = self.usernames.get(&normalize_username(username))?.value().clone();
        self.users
            .get(&user_id)
            .map(|record| (record.identity.clone(), record.password_hash.clone()))
    }
}

#[async_trait]
impl CredentialStore for InMemoryUserStore {
    async fn create_identity(&self, request: NewIdentity) -> Result<Identity> {
        let password_hash = self.hasher.hash(&request.secret).await?;

        let identity = Identity {
            id: Identity::new_id(),
            username: request.username.clone(),
            email: request.email.clone(),
        };

        match self.usernames.entry(normalize_username(&request.username)) {
            Entry::Occupied(_) => {
                return Err(Error::IdentityRejected(format!(
                    "Username '{}' is already taken.",
                    request.username
                )));
            }
            Entry::Vacant(slot) => {
                slot.insert(identity.id.clone());
            }
        }

        self.users.insert(
            identity.id.clone(),
            UserRecord {
                identity: identity.clone(),
                password_hash,
                roles: BTreeSet::new(),
                renewal: None,
            },
        );

        Ok(identity)
    }

    async fn delete_identity(&self, user_id: &str) -> Result<()> {
        if let Some((_, record)) = self.users.remove(user_id) {
            self.usernames
                .remove_if(&normalize_username(&record.identity.username), |_, id| id == user_id);
        }
        Ok(())
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Identity>> {
        Ok(self.users.get(user_id).map(|record| record.identity.clone()))
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>> {
        Ok(self.identity_by_username(username).map(|(identity, _)| identity))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.identity.email.eq_ignore_ascii_case(email))
            .map(|entry| entry.identity.clone()))
    }

    async fn verify_secret(&self, username: &str, secret: &str) -> Result<Option<Identity>> {
        let Some((identity, password_hash)) = self.identity_by_username(username) else {
            return Ok(None);
        };

        if self.hasher.verify(secret, &password_hash).await? {
            Ok(Some(identity))
        } else {
            Ok(None)
        }
    }

    async fn find_by_renewal_value(&self, value: &str, now: DateTime<Utc>) -> Result<Option<Identity>> {
        let mut matches: Vec<Identity> = self
            .users
            .iter()
            .filter(|entry| {
                entry
                    .renewal
                    .as_ref()
                    .is_some_and(|slot| slot.value == value && now < slot.expires_at)
            })
            .map(|entry| entry.identity.clone())
            .collect();

        if matches.len() == 1 {
            Ok(matches.pop())
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl RoleRegistry for InMemoryUserStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.roles.contains_key(&normalize_role(name)))
    }

    async fn create(&self, name: &str) -> Result<()> {
        self.roles
            .entry(normalize_role(name))
            .or_insert_with(|| name.trim().to_string());
        Ok(())
    }

    async fn assign(&self, user_id: &str, role: &str) -> Result<()> {
        let role_name = self
            .roles
            .get(&normalize_role(role))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::RoleAssignment(format!("Role {} does not exist.", role)))?;

        let mut record = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;
        record.roles.insert(role_name);
        Ok(())
    }

    async fn roles_of(&self, identity: &Identity) -> Result<BTreeSet<String>> {
        Ok(self
            .users
            .get(&identity.id)
            .map(|record| record.roles.clone())
            .unwrap_or_default())
    }

    async fn role_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.roles.iter().map(|entry| entry.value().clone()).collect();
        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl RenewalTokenStore for InMemoryUserStore {
    async fn get(&self, user_id: &str) -> Result<Option<RenewalToken>> {
        Ok(self.users.get(user_id).and_then(|record| {
            record.renewal.as_ref().map(|slot| RenewalToken {
                value: slot.value.clone(),
                owner_user_id: user_id.to_string(),
                expires_at: slot.expires_at,
            })
        }))
    }

    async fn put(&self, user_id: &str, token: RenewalToken) -> Result<()> {
        let mut record = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;
        record.renewal = Some(RenewalSlot {
            value: token.value,
            expires_at: token.expires_at,
        });
        Ok(())
    }

    async fn replace(&self, user_id: &str, expected: Option<&str>, token: RenewalToken) -> Result<bool> {
        let mut record = self
            .users
            .get_mut(user_id)
            .ok_or_else(|| Error::UserNotFound(user_id.to_string()))?;

        let current = record.renewal.as_ref().map(|slot| slot.value.as_str());
        if current != expected {
            return Ok(false);
        }

        record.renewal = Some(RenewalSlot {
            value: token.value,
            expires_at: token.expires_at,
        });
        Ok(true)
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        if let Some(mut record) = self.users.get_mut(user_id) {
            record.renewal = None;
        }
        Ok(())
    }
}
