//! End-to-end behaviour of CredentialSession over the in-memory store

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use credentials_core::{
    AccessTokenIssuer, Clock, CredentialSession, CredentialStore, Error, Identity, InMemoryUserStore,
    ManualClock, NewIdentity, RenewalTokenStore, RoleRegistry,
};
use tokio::sync::Notify;

use common::{harness, seed_user, test_jwt_config, test_password_config};

#[tokio::test]
async fn test_login_member_scenario() {
    let h = harness();
    seed_user(&h, "alice", "correct-pw", &["Member"]).await;

    let outcome = h.session.login("alice", "correct-pw").await.unwrap();

    assert_eq!(outcome.role.as_deref(), Some("Member"));
    assert_eq!(outcome.identity.username, "alice");
    assert_eq!(
        outcome.access_token.expires_at,
        h.clock.now().trunc_subsecs(0) + Duration::minutes(10)
    );

    let claims = h.session.issuer().verify(&outcome.access_token.token).unwrap();
    assert_eq!(claims.name, "alice");
    assert_eq!(claims.email, "alice@example.com");
    assert_eq!(claims.role, vec!["Member"]);
    assert_eq!(claims.iss, common::ISSUER);
    assert_eq!(claims.aud, common::AUDIENCE);
}

#[tokio::test]
async fn test_claims_follow_registry_at_issuance() {
    let h = harness();
    let alice = seed_user(&h, "alice", "correct-pw", &["Member", "Admin"]).await;

    let login = h.session.login("alice", "correct-pw").await.unwrap();
    let claims = h.session.issuer().verify(&login.access_token.token).unwrap();
    let registry: Vec<String> = h.store.roles_of(&alice).await.unwrap().into_iter().collect();
    assert_eq!(claims.role, registry);

    h.store.create("Librarian").await.unwrap();
    h.store.assign(&alice.id, "Librarian").await.unwrap();

    let renewed = h.session.renew(&login.renewal_token.value).await.unwrap();
    let claims = h.session.issuer().verify(&renewed.access_token.token).unwrap();
    assert_eq!(claims.role, vec!["Admin", "Librarian", "Member"]);
}

#[tokio::test]
async fn test_login_rejections() {
    let h = harness();
    seed_user(&h, "alice", "correct-pw", &["Member"]).await;

    assert!(matches!(
        h.session.login("alice", "wrong-pw").await,
        Err(Error::InvalidCredentials)
    ));
    assert!(matches!(
        h.session.login("mallory", "correct-pw").await,
        Err(Error::InvalidCredentials)
    ));

    match h.session.login("", "").await {
        Err(Error::Validation(msg)) => assert_eq!(msg, "Invalid login attempt."),
        other => panic!("expected validation failure, got {:?}", other),
    }

    // nothing was issued
    let alice = h.store.find_by_username("alice").await.unwrap().unwrap();
    assert!(h.store.get(&alice.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_repeated_login_reuses_renewal_token_until_expiry() {
    let h = harness();
    seed_user(&h, "alice", "correct-pw", &["Member"]).await;

    let first = h.session.login("alice", "correct-pw").await.unwrap();
    let second = h.session.login("alice", "correct-pw").await.unwrap();
    assert_eq!(first.renewal_token.value, second.renewal_token.value);
    assert_ne!(first.access_token.token, second.access_token.token);

    h.clock.advance(Duration::days(2));
    let third = h.session.login("alice", "correct-pw").await.unwrap();
    assert_ne!(third.renewal_token.value, first.renewal_token.value);
}

#[tokio::test]
async fn test_renew_rotates_and_spends_old_value() {
    let h = harness();
    seed_user(&h, "alice", "correct-pw", &["Member"]).await;
    let login = h.session.login("alice", "correct-pw").await.unwrap();

    let renewed = h.session.renew(&login.renewal_token.value).await.unwrap();
    assert_ne!(renewed.renewal_token.value, login.renewal_token.value);

    let old_claims = h.session.issuer().verify(&login.access_token.token).unwrap();
    let new_claims = h.session.issuer().verify(&renewed.access_token.token).unwrap();
    assert_ne!(old_claims.jti, new_claims.jti);

    assert!(matches!(
        h.session.renew(&login.renewal_token.value).await,
        Err(Error::InvalidOrExpiredRefreshToken)
    ));
}

#[tokio::test]
async fn test_renew_chain() {
    let h = harness();
    seed_user(&h, "alice", "correct-pw", &["Member"]).await;
    let mut value = h.session.login("alice", "correct-pw").await.unwrap().renewal_token.value;

    for _ in 0..5 {
        h.clock.advance(Duration::hours(1));
        let renewed = h.session.renew(&value).await.unwrap();
        assert_ne!(renewed.renewal_token.value, value);
        assert_eq!(
            renewed.renewal_token.expires_at,
            h.clock.now() + Duration::days(2)
        );
        value = renewed.renewal_token.value;
    }
}

#[tokio::test]
async fn test_renew_unknown_or_expired_value_fails() {
    let h = harness();
    seed_user(&h, "alice", "correct-pw", &["Member"]).await;

    let err = h.session.renew("never-issued").await.unwrap_err();
    assert_eq!(err.to_string(), "Invalid or expired refresh token.");

    let login = h.session.login("alice", "correct-pw").await.unwrap();
    h.clock.set(login.renewal_token.expires_at + Duration::seconds(1));
    assert!(matches!(
        h.session.renew(&login.renewal_token.value).await,
        Err(Error::InvalidOrExpiredRefreshToken)
    ));

    match h.session.renew("  ").await {
        Err(Error::Validation(msg)) => assert_eq!(msg, "Invalid refresh token."),
        other => panic!("expected validation failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_terminate_is_idempotent_and_keeps_access_tokens() {
    let h = harness();
    let alice = seed_user(&h, "alice", "correct-pw", &["Member"]).await;
    let login = h.session.login("alice", "correct-pw").await.unwrap();

    h.session.terminate(&alice.id).await.unwrap();
    h.session.terminate(&alice.id).await.unwrap();

    assert!(h.store.get(&alice.id).await.unwrap().is_none());
    assert!(h.session.renew(&login.renewal_token.value).await.is_err());
    // already issued access tokens run out on their own
    assert!(h.session.issuer().verify(&login.access_token.token).is_ok());
}

#[tokio::test]
async fn test_logout_by_email() {
    let h = harness();
    let alice = seed_user(&h, "alice", "correct-pw", &["Member"]).await;
    h.session.login("alice", "correct-pw").await.unwrap();

    h.session.logout("ALICE@example.com").await.unwrap();
    assert!(h.store.get(&alice.id).await.unwrap().is_none());

    h.session.logout("nobody@example.com").await.unwrap();
}

#[tokio::test]
async fn test_register_then_login() {
    let h = harness();
    h.session.create_role("Member").await.unwrap();

    let identity = h
        .session
        .register(
            NewIdentity {
                username: "bob".to_string(),
                email: "bob@example.com".to_string(),
                secret: "bobs-secret".to_string(),
            },
            "Member",
        )
        .await
        .unwrap();

    let login = h.session.login("bob", "bobs-secret").await.unwrap();
    assert_eq!(login.identity, identity);
    assert_eq!(login.role.as_deref(), Some("Member"));
}

#[tokio::test]
async fn test_register_rolls_back_when_role_assignment_fails() {
    let h = harness();
    seed_user(&h, "alice", "correct-pw", &["Member"]).await;
    let before = h.store.identity_count();

    let err = h
        .session
        .register(
            NewIdentity {
                username: "carol".to_string(),
                email: "carol@example.com".to_string(),
                secret: "carols-secret".to_string(),
            },
            "Ghost",
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::RoleAssignment(_)));
    assert!(err
        .to_string()
        .starts_with("User registered but failed to assign role: "));
    assert_eq!(h.store.identity_count(), before);
    assert!(h.store.find_by_username("carol").await.unwrap().is_none());
    assert!(h.store.find_by_email("carol@example.com").await.unwrap().is_none());
}

#[tokio::test]
async fn test_register_rejections_leave_nothing_behind() {
    let h = harness();
    seed_user(&h, "alice", "correct-pw", &["Member"]).await;

    let duplicate = h
        .session
        .register(
            NewIdentity {
                username: "Alice".to_string(),
                email: "alice2@example.com".to_string(),
                secret: "another-pw".to_string(),
            },
            "Member",
        )
        .await;
    match duplicate {
        Err(Error::IdentityRejected(msg)) => assert_eq!(msg, "Username 'Alice' is already taken."),
        other => panic!("expected IdentityRejected, got {:?}", other),
    }

    let weak = h
        .session
        .register(
            NewIdentity {
                username: "dave".to_string(),
                email: "dave@example.com".to_string(),
                secret: "abc".to_string(),
            },
            "Member",
        )
        .await;
    match weak {
        Err(Error::IdentityRejected(msg)) => {
            assert_eq!(msg, "Passwords must be at least 6 characters.")
        }
        other => panic!("expected IdentityRejected, got {:?}", other),
    }

    assert!(matches!(
        h.session
            .register(
                NewIdentity {
                    username: "erin".to_string(),
                    email: "not-an-email".to_string(),
                    secret: "erins-secret".to_string(),
                },
                "Member",
            )
            .await,
        Err(Error::IdentityRejected(_))
    ));

    assert_eq!(h.store.identity_count(), 1);
}

#[tokio::test]
async fn test_create_role_twice_leaves_one_role() {
    let h = harness();
    h.session.create_role("Member").await.unwrap();
    h.session.create_role("Member").await.unwrap();

    let names = h.store.role_names().await.unwrap();
    assert_eq!(names, vec!["Member"]);
}

#[tokio::test]
async fn test_create_role_accepts_any_name() {
    let h = harness();
    for name in ["Bibliothécaire", "1stReaders", "Admin/Ops"] {
        h.session.create_role(name).await.unwrap();
        h.session.create_role(name).await.unwrap();
    }

    let names = h.store.role_names().await.unwrap();
    assert_eq!(names, vec!["1stReaders", "Admin/Ops", "Bibliothécaire"]);

    let alice = seed_user(&h, "alice", "correct-pw", &[]).await;
    h.store.assign(&alice.id, "Bibliothécaire").await.unwrap();
    let login = h.session.login("alice", "correct-pw").await.unwrap();
    assert_eq!(login.role.as_deref(), Some("Bibliothécaire"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_logins_for_one_user_share_the_slot() {
    let h = harness();
    let alice = seed_user(&h, "alice", "correct-pw", &["Member"]).await;

    let logins: Vec<_> = (0..6)
        .map(|_| {
            let session = h.session.clone();
            tokio::spawn(async move { session.login("alice", "correct-pw").await })
        })
        .collect();

    let outcomes: Vec<_> = futures::future::join_all(logins)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let stored = h.store.get(&alice.id).await.unwrap().unwrap();
    assert!(outcomes.iter().all(|o| o.renewal_token.value == stored.value));
}

/// Role registry whose `assign` waits for `release` and then fails or delegates
struct GatedRoles {
    inner: Arc<InMemoryUserStore>,
    release: Arc<Notify>,
    fail: bool,
}

#[async_trait]
impl RoleRegistry for GatedRoles {
    async fn exists(&self, name: &str) -> credentials_core::Result<bool> {
        self.inner.exists(name).await
    }

    async fn create(&self, name: &str) -> credentials_core::Result<()> {
        self.inner.create(name).await
    }

    async fn assign(&self, user_id: &str, role: &str) -> credentials_core::Result<()> {
        self.release.notified().await;
        if self.fail {
            return Err(Error::RoleAssignment(format!("Role {} does not exist.", role)));
        }
        self.inner.assign(user_id, role).await
    }

    async fn roles_of(&self, identity: &Identity) -> credentials_core::Result<BTreeSet<String>> {
        self.inner.roles_of(identity).await
    }

    async fn role_names(&self) -> credentials_core::Result<Vec<String>> {
        self.inner.role_names().await
    }
}

fn gated_session(fail: bool) -> (CredentialSession, Arc<InMemoryUserStore>, Arc<Notify>) {
    let store = Arc::new(InMemoryUserStore::new(&test_password_config()).unwrap());
    let release = Arc::new(Notify::new());
    let roles = Arc::new(GatedRoles {
        inner: store.clone(),
        release: release.clone(),
        fail,
    });
    let session = CredentialSession::new(
        store.clone(),
        roles,
        store.clone(),
        AccessTokenIssuer::new(&test_jwt_config()).unwrap(),
        Arc::new(ManualClock::starting_now()),
        test_password_config(),
    );
    (session, store, release)
}

fn carol() -> NewIdentity {
    NewIdentity {
        username: "carol".to_string(),
        email: "carol@example.com".to_string(),
        secret: "carols-secret".to_string(),
    }
}

async fn wait_for_identity_count(store: &InMemoryUserStore, expected: usize) {
    for _ in 0..200 {
        if store.identity_count() == expected {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!(
        "identity count stayed at {} instead of {}",
        store.identity_count(),
        expected
    );
}

#[tokio::test]
async fn test_abandoned_register_still_rolls_back() {
    let (session, store, release) = gated_session(true);
    store.create("Member").await.unwrap();

    let abandoned = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        session.register(carol(), "Member"),
    )
    .await;
    assert!(abandoned.is_err());
    wait_for_identity_count(&store, 1).await;

    // the caller is gone; the assignment now fails and the rollback must still run
    release.notify_one();
    wait_for_identity_count(&store, 0).await;
    assert!(store.find_by_username("carol").await.unwrap().is_none());
}

#[tokio::test]
async fn test_abandoned_register_completes_with_role() {
    let (session, store, release) = gated_session(false);
    store.create("Member").await.unwrap();

    let abandoned = tokio::time::timeout(
        std::time::Duration::from_millis(100),
        session.register(carol(), "Member"),
    )
    .await;
    assert!(abandoned.is_err());

    release.notify_one();
    let mut roles = BTreeSet::new();
    for _ in 0..200 {
        if let Some(carol) = store.find_by_username("carol").await.unwrap() {
            roles = store.roles_of(&carol).await.unwrap();
            if !roles.is_empty() {
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(roles.into_iter().collect::<Vec<_>>(), vec!["Member"]);
}

/// Credential store that cannot delete identities
struct UndeletableStore {
    inner: Arc<InMemoryUserStore>,
}

#[async_trait]
impl CredentialStore for UndeletableStore {
    async fn create_identity(&self, request: NewIdentity) -> credentials_core::Result<Identity> {
        self.inner.create_identity(request).await
    }

    async fn delete_identity(&self, _user_id: &str) -> credentials_core::Result<()> {
        Err(Error::Storage("database is locked".to_string()))
    }

    async fn find_by_id(&self, user_id: &str) -> credentials_core::Result<Option<Identity>> {
        self.inner.find_by_id(user_id).await
    }

    async fn find_by_username(&self, username: &str) -> credentials_core::Result<Option<Identity>> {
        self.inner.find_by_username(username).await
    }

    async fn find_by_email(&self, email: &str) -> credentials_core::Result<Option<Identity>> {
        self.inner.find_by_email(email).await
    }

    async fn verify_secret(&self, username: &str, secret: &str) -> credentials_core::Result<Option<Identity>> {
        self.inner.verify_secret(username, secret).await
    }

    async fn find_by_renewal_value(
        &self,
        value: &str,
        now: DateTime<Utc>,
    ) -> credentials_core::Result<Option<Identity>> {
        self.inner.find_by_renewal_value(value, now).await
    }
}

#[tokio::test]
async fn test_failed_rollback_keeps_assignment_reason() {
    let store = Arc::new(InMemoryUserStore::new(&test_password_config()).unwrap());
    let session = CredentialSession::new(
        Arc::new(UndeletableStore {
            inner: store.clone(),
        }),
        store.clone(),
        store.clone(),
        AccessTokenIssuer::new(&test_jwt_config()).unwrap(),
        Arc::new(ManualClock::starting_now()),
        test_password_config(),
    );

    let err = session.register(carol(), "Ghost").await.unwrap_err();

    assert!(matches!(err, Error::RoleAssignment(_)));
    assert_eq!(
        err.to_string(),
        "User registered but failed to assign role: Role Ghost does not exist. \
         Removing the user also failed: Storage error: database is locked"
    );
}
