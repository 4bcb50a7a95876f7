//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::sync::Arc;

use credentials_core::config::PasswordConfig;
use credentials_core::{
    AccessTokenIssuer, CredentialSession, CredentialStore, Identity, InMemoryUserStore, JwtConfig,
    ManualClock, NewIdentity, RoleRegistry,
};

pub const SIGNING_KEY: &str = "integration-test-signing-key-0123456789abcdef";
pub const ISSUER: &str = "https://library.example";
pub const AUDIENCE: &str = "library-clients";

/// Cheap Argon2 parameters and a policy that accepts "correct-pw"
pub fn test_password_config() -> PasswordConfig {
    PasswordConfig {
        min_length: 6,
        require_uppercase: false,
        require_lowercase: true,
        require_numbers: false,
        require_special: false,
        min_unique_chars: 1,
        argon2_memory_cost: 4096,
        argon2_time_cost: 1,
        argon2_parallelism: 1,
    }
}

pub fn test_jwt_config() -> JwtConfig {
    JwtConfig {
        issuer: ISSUER.to_string(),
        audience: AUDIENCE.to_string(),
        signing_key: Some(SIGNING_KEY.to_string()),
    }
}

pub struct Harness {
    pub session: CredentialSession,
    pub store: Arc<InMemoryUserStore>,
    pub clock: Arc<ManualClock>,
}

pub fn harness() -> Harness {
    let store = Arc::new(InMemoryUserStore::new(&test_password_config()).unwrap());
    let clock = Arc::new(ManualClock::starting_now());
    let issuer = AccessTokenIssuer::new(&test_jwt_config()).unwrap();

    let session = CredentialSession::new(
        store.clone(),
        store.clone(),
        store.clone(),
        issuer,
        clock.clone(),
        test_password_config(),
    );

    Harness {
        session,
        store,
        clock,
    }
}

/// Create a user directly in the store and give it `roles`, creating them as needed
pub async fn seed_user(h: &Harness, username: &str, secret: &str, roles: &[&str]) -> Identity {
    let identity = h
        .store
        .create_identity(NewIdentity {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            secret: secret.to_string(),
        })
        .await
        .unwrap();

    for role in roles {
        h.store.create(role).await.unwrap();
        h.store.assign(&identity.id, role).await.unwrap();
    }

    identity
}
