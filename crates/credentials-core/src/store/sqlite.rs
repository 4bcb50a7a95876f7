//! SQLite user store
//!
//! The renewal slot is two nullable columns on the `users` row. Every slot
//! change is a single UPDATE, and `replace` adds the previously observed value
//! to its WHERE clause, so concurrent writers for one user cannot both win.

use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use super::{CredentialStore, RenewalTokenStore, RoleRegistry};
use crate::config::PasswordConfig;
use crate::password::SecretHasher;
use crate::types::{Identity, NewIdentity, RenewalToken};
use crate::{Error, Result};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE COLLATE NOCASE,
        email TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        refresh_token TEXT,
        refresh_token_expires_at INTEGER,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_users_refresh_token ON users(refresh_token)",
    "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email COLLATE NOCASE)",
    "CREATE TABLE IF NOT EXISTS roles (
        name TEXT PRIMARY KEY COLLATE NOCASE
    )",
    "CREATE TABLE IF NOT EXISTS user_roles (
        user_id TEXT NOT NULL,
        role_name TEXT NOT NULL COLLATE NOCASE,
        PRIMARY KEY (user_id, role_name)
    )",
];

#[derive(Clone)]
pub struct SqliteUserStore {
    pool: SqlitePool,
    hasher: SecretHasher,
}

impl SqliteUserStore {
    /// Connect (creating the file when the URL allows it) and apply the schema
    pub async fn new(database_url: &str, password: &PasswordConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // An in-memory database exists per connection, so keep exactly one
        let max_connections = if database_url.contains(":memory:") { 1 } else { 8 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            hasher: SecretHasher::new(password)?,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn identity_from_row(row: &SqliteRow) -> Result<Identity> {
    Ok(Identity {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
    })
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| Error::Storage(format!("timestamp out of range: {}", millis)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[async_trait]
impl CredentialStore for SqliteUserStore {
    async fn create_identity(&self, request: NewIdentity) -> Result<Identity> {
        let password_hash = self.hasher.hash(&request.secret).await?;
        let identity = Identity {
            id: Identity::new_id(),
            username: request.username,
            email: request.email,
        };

        let inserted = sqlx::query(
            "INSERT INTO users (id, username, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&identity.id)
        .bind(&identity.username)
        .bind(&identity.email)
        .bind(&password_hash)
        .bind(to_millis(Utc::now()))
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(identity),
            Err(e) if is_unique_violation(&e) => Err(Error::IdentityRejected(format!(
                "Username '{}' is already taken.",
                identity.username
            ))),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_identity(&self, user_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM user_roles WHERE user_id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM users WHERE id = ?1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_id(&self, user_id: &str) -> Result<Option<Identity>> {
        let row = sqlx::query("SELECT id, username, email FROM users WHERE id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<Identity>> {
        let row = sqlx::query("SELECT id, username, email FROM users WHERE username = ?1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Identity>> {
        let row = sqlx::query(
            "SELECT id, username, email FROM users WHERE email = ?1 COLLATE NOCASE LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(identity_from_row).transpose()
    }

    async fn verify_secret(&self, username: &str, secret: &str) -> Result<Option<Identity>> {
        let row = sqlx::query(
            "SELECT id, username, email, password_hash FROM users WHERE username = ?1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let password_hash: String = row.try_get("password_hash")?;
        if self.hasher.verify(secret, &password_hash).await? {
            Ok(Some(identity_from_row(&row)?))
        } else {
            Ok(None)
        }
    }

    async fn find_by_renewal_value(&self, value: &str, now: DateTime<Utc>) -> Result<Option<Identity>> {
        let rows = sqlx::query(
            "SELECT id, username, email FROM users
             WHERE refresh_token = ?1 AND refresh_token_expires_at > ?2",
        )
        .bind(value)
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await?;

        // More than one holder would mean the value is ambiguous; honour none
        if rows.len() != 1 {
            if rows.len() > 1 {
                tracing::warn!(count = rows.len(), "renewal value held by several users");
            }
            return Ok(None);
        }
        identity_from_row(&rows[0]).map(Some)
    }
}

#[async_trait]
impl RoleRegistry for SqliteUserStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM roles WHERE name = ?1")
            .bind(name.trim())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn create(&self, name: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO roles (name) VALUES (?1)")
            .bind(name.trim())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn assign(&self, user_id: &str, role: &str) -> Result<()> {
        let role_name: Option<String> = sqlx::query_scalar("SELECT name FROM roles WHERE name = ?1")
            .bind(role.trim())
            .fetch_optional(&self.pool)
            .await?;

        let role_name =
            role_name.ok_or_else(|| Error::RoleAssignment(format!("Role {} does not exist.", role)))?;

        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO user_roles (user_id, role_name)
             SELECT id, ?2 FROM users WHERE id = ?1",
        )
        .bind(user_id)
        .bind(&role_name)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 && self.find_by_id(user_id).await?.is_none() {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn roles_of(&self, identity: &Identity) -> Result<BTreeSet<String>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT r.name FROM user_roles ur JOIN roles r ON r.name = ur.role_name
             WHERE ur.user_id = ?1",
        )
        .bind(&identity.id)
        .fetch_all(&self.pool)
        .await?;
        Ok(names.into_iter().collect())
    }

    async fn role_names(&self) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar("SELECT name FROM roles ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(names)
    }
}

#[async_trait]
impl RenewalTokenStore for SqliteUserStore {
    async fn get(&self, user_id: &str) -> Result<Option<RenewalToken>> {
        let row = sqlx::query(
            "SELECT refresh_token, refresh_token_expires_at FROM users WHERE id = ?1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let value: Option<String> = row.try_get("refresh_token")?;
        let expires_at: Option<i64> = row.try_get("refresh_token_expires_at")?;

        match (value, expires_at) {
            (Some(value), Some(expires_at)) => Ok(Some(RenewalToken {
                value,
                owner_user_id: user_id.to_string(),
                expires_at: from_millis(expires_at)?,
            })),
            _ => Ok(None),
        }
    }

    async fn put(&self, user_id: &str, token: RenewalToken) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE users SET refresh_token = ?1, refresh_token_expires_at = ?2 WHERE id = ?3",
        )
        .bind(&token.value)
        .bind(to_millis(token.expires_at))
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        Ok(())
    }

    async fn replace(&self, user_id: &str, expected: Option<&str>, token: RenewalToken) -> Result<bool> {
        // `IS` compares NULL to NULL as equal, covering the empty-slot case
        let updated = sqlx::query(
            "UPDATE users SET refresh_token = ?1, refresh_token_expires_at = ?2
             WHERE id = ?3 AND refresh_token IS ?4",
        )
        .bind(&token.value)
        .bind(to_millis(token.expires_at))
        .bind(user_id)
        .bind(expected)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 1 {
            return Ok(true);
        }
        if self.find_by_id(user_id).await?.is_none() {
            return Err(Error::UserNotFound(user_id.to_string()));
        }
        Ok(false)
    }

    async fn clear(&self, user_id: &str) -> Result<()> {
        sqlx::query(
            "UPDATE users SET refresh_token = NULL, refresh_token_expires_at = NULL WHERE id = ?1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
