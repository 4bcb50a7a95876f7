//! # Credentials-Core
//!
//! Access credential issuance and renewal for client applications.
//!
//! This crate provides:
//! - Password login against a pluggable credential store (Argon2id hashes)
//! - Ten-minute HS256 access tokens carrying name, email, token id and roles
//! - One rotating two-day renewal token per user, reused across logins while
//!   live and replaced on every renewal
//! - Idempotent role creation and all-or-nothing registration
//! - A JSON REST API (`/auth/*`) built on axum
//!
//! ## Architecture
//!
//! [`CredentialSession`] orchestrates [`ClaimsComposer`], [`AccessTokenIssuer`]
//! and [`RenewalTokenRotator`] over three storage capabilities
//! ([`CredentialStore`], [`RoleRegistry`], [`RenewalTokenStore`]). SQLite and
//! in-memory backends ship with the crate.

pub mod api;
pub mod claims;
pub mod clock;
pub mod config;
pub mod error;
pub mod jwt;
pub mod logging;
pub mod password;
pub mod renewal;
pub mod session;
pub mod store;
pub mod types;
pub mod validation;

use std::sync::Arc;

pub use claims::{ClaimSet, ClaimType, ClaimsComposer};
pub use clock::{Clock, ManualClock, SystemClock};
pub use crate::config::CredentialsConfig;
pub use error::{Error, Result};
pub use jwt::{AccessClaims, AccessTokenIssuer, JwtConfig};
pub use renewal::RenewalTokenRotator;
pub use session::{CredentialSession, LoginOutcome, RenewalOutcome};
pub use store::{CredentialStore, InMemoryUserStore, RenewalTokenStore, RoleRegistry, SqliteUserStore};
pub use types::{AccessToken, Identity, NewIdentity, RenewalToken};

/// Initialize the credential service from startup configuration.
///
/// Fails fast with `Error::ConfigurationMissing` when the signing key is absent.
pub async fn init(config: &CredentialsConfig) -> Result<CredentialSession> {
    // Validate the signing key before touching the database
    let issuer = AccessTokenIssuer::new(&config.jwt)?;

    let store = Arc::new(SqliteUserStore::new(&config.database_url, &config.password).await?);

    Ok(CredentialSession::new(
        store.clone(),
        store.clone(),
        store,
        issuer,
        Arc::new(SystemClock),
        config.password.clone(),
    ))
}
