//! Storage capabilities consumed by the credential core
//!
//! Account storage, role persistence and the per-user renewal slot live
//! behind these traits. Any backend satisfying them can be plugged into
//! [`CredentialSession`](crate::CredentialSession). The renewal slot is part
//! of the user record, so a backend normally implements all three traits on
//! one type.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{Identity, NewIdentity, RenewalToken};
use crate::Result;

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryUserStore;
pub use sqlite::SqliteUserStore;

/// Account storage and secret verification
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Create an identity, hashing `secret`. Duplicate usernames fail with
    /// `Error::IdentityRejected`.
    async fn create_identity(&self, request: NewIdentity) -> Result<Identity>;

    /// Remove an identity together with its role links and renewal slot
    async fn delete_identity(&self, user_id: &str) -> Result<()>;

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Identity>>;

    /// Case-insensitive lookup
    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>>;

    /// The identity if `secret` matches the stored hash for `username`
    async fn verify_secret(&self, username: &str, secret: &str) -> Result<Option<Identity>>;

    /// The single identity holding renewal value `value` with expiry after `now`
    async fn find_by_renewal_value(&self, value: &str, now: DateTime<Utc>) -> Result<Option<Identity>>;
}

/// Role persistence
#[async_trait]
pub trait RoleRegistry: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Create a role. Creating an existing role is a no-op.
    async fn create(&self, name: &str) -> Result<()>;

    /// Attach an existing role to a user. Unknown roles fail with
    /// `Error::RoleAssignment`.
    async fn assign(&self, user_id: &str, role: &str) -> Result<()>;

    async fn roles_of(&self, identity: &Identity) -> Result<BTreeSet<String>>;

    async fn role_names(&self) -> Result<Vec<String>>;
}

/// The single renewal-token slot of each user
#[async_trait]
pub trait RenewalTokenStore: Send + Sync {
    async fn get(&self, user_id: &str) -> Result<Option<RenewalToken>>;

    /// Unconditionally overwrite the slot
    async fn put(&self, user_id: &str, token: RenewalToken) -> Result<()>;

    /// Install `token` only if the slot still holds `expected`
    /// (`None` = empty slot). Returns whether the swap happened.
    async fn replace(&self, user_id: &str, expected: Option<&str>, token: RenewalToken) -> Result<bool>;

    /// Empty the slot. Clearing an empty slot succeeds.
    async fn clear(&self, user_id: &str) -> Result<()>;
}
