//! Credential session orchestration
//!
//! Ties the stores, the claims composer, the token issuer and the renewal
//! rotator together into login, renewal, termination and registration.
//!
//! A client session moves `Anonymous -> Authenticated -> (Renewed)* -> Terminated`:
//! [`CredentialSession::login`] authenticates, [`CredentialSession::renew`]
//! may be called any number of times while the renewal token is live, and
//! [`CredentialSession::terminate`] empties the renewal slot. Access tokens
//! already handed out stay valid until they expire on their own.

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::claims::ClaimsComposer;
use crate::clock::Clock;
use crate::config::PasswordConfig;
use crate::jwt::AccessTokenIssuer;
use crate::renewal::RenewalTokenRotator;
use crate::store::{CredentialStore, RenewalTokenStore, RoleRegistry};
use crate::types::{AccessToken, Identity, NewIdentity, RenewalToken};
use crate::validation::{self, PasswordValidator};
use crate::{Error, Result};

/// Successful login
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub identity: Identity,
    pub access_token: AccessToken,
    pub renewal_token: RenewalToken,
    /// First role the registry reported, if any
    pub role: Option<String>,
}

/// Successful renewal
#[derive(Debug, Clone)]
pub struct RenewalOutcome {
    pub identity: Identity,
    pub access_token: AccessToken,
    pub renewal_token: RenewalToken,
}

struct Inner {
    credentials: Arc<dyn CredentialStore>,
    roles: Arc<dyn RoleRegistry>,
    composer: ClaimsComposer,
    issuer: AccessTokenIssuer,
    rotator: RenewalTokenRotator,
    clock: Arc<dyn Clock>,
    password_validator: PasswordValidator,
}

/// Login, renewal and session termination over pluggable stores.
///
/// Cheap to clone; clones share the same stores and issuer.
#[derive(Clone)]
pub struct CredentialSession {
    inner: Arc<Inner>,
}

impl CredentialSession {
    pub fn new(
        credentials: Arc<dyn CredentialStore>,
        roles: Arc<dyn RoleRegistry>,
        renewal_store: Arc<dyn RenewalTokenStore>,
        issuer: AccessTokenIssuer,
        clock: Arc<dyn Clock>,
        password_policy: PasswordConfig,
    ) -> Self {
        let rotator = RenewalTokenRotator::new(renewal_store, credentials.clone(), clock.clone());

        Self {
            inner: Arc::new(Inner {
                credentials,
                roles,
                composer: ClaimsComposer::new(),
                issuer,
                rotator,
                clock,
                password_validator: PasswordValidator::new(password_policy),
            }),
        }
    }

    pub fn issuer(&self) -> &AccessTokenIssuer {
        &self.inner.issuer
    }

    pub fn credentials(&self) -> &Arc<dyn CredentialStore> {
        &self.inner.credentials
    }

    pub fn roles(&self) -> &Arc<dyn RoleRegistry> {
        &self.inner.roles
    }

    /// Roles, claims and a signed access token for `identity` as of now
    async fn issue_access_token(&self, identity: &Identity) -> Result<(AccessToken, Option<String>)> {
        let roles = self.inner.roles.roles_of(identity).await?;
        let claims = self.inner.composer.compose(identity, &roles);
        let token = self.inner.issuer.issue(&claims, self.inner.clock.now())?;
        Ok((token, roles.into_iter().next()))
    }

    /// Authenticate with username and secret
    pub async fn login(&self, username: &str, secret: &str) -> Result<LoginOutcome> {
        if username.trim().is_empty() || secret.is_empty() {
            return Err(Error::Validation("Invalid login attempt.".to_string()));
        }

        let Some(identity) = self.inner.credentials.verify_secret(username, secret).await? else {
            warn!(username, "rejected login");
            return Err(Error::InvalidCredentials);
        };

        // Past verification the request runs to completion even if the caller
        // goes away, so a persisted renewal token is never left half-issued.
        let session = self.clone();
        tokio::spawn(async move { session.complete_login(identity).await }).await?
    }

    async fn complete_login(&self, identity: Identity) -> Result<LoginOutcome> {
        let (access_token, role) = self.issue_access_token(&identity).await?;
        let renewal_token = self.inner.rotator.obtain_for_login(&identity.id).await?;

        info!(user_id = %identity.id, username = %identity.username, "login succeeded");
        Ok(LoginOutcome {
            identity,
            access_token,
            renewal_token,
            role,
        })
    }

    /// Exchange a renewal value for a new access token and a new renewal token
    pub async fn renew(&self, presented: &str) -> Result<RenewalOutcome> {
        if presented.trim().is_empty() {
            return Err(Error::Validation("Invalid refresh token.".to_string()));
        }

        let session = self.clone();
        let presented = presented.to_string();
        tokio::spawn(async move { session.complete_renewal(&presented).await }).await?
    }

    async fn complete_renewal(&self, presented: &str) -> Result<RenewalOutcome> {
        let (identity, renewal_token) = self.inner.rotator.rotate(presented).await?;
        let (access_token, _) = self.issue_access_token(&identity).await?;

        info!(user_id = %identity.id, "renewal succeeded");
        Ok(RenewalOutcome {
            identity,
            access_token,
            renewal_token,
        })
    }

    /// Drop the user's renewal token. Terminating twice is fine.
    pub async fn terminate(&self, user_id: &str) -> Result<()> {
        self.inner.rotator.revoke(user_id).await?;
        info!(user_id, "session terminated");
        Ok(())
    }

    /// Terminate the session of the account registered under `email`.
    /// Unknown addresses succeed without effect.
    pub async fn logout(&self, email: &str) -> Result<()> {
        match self.inner.credentials.find_by_email(email).await? {
            Some(identity) => self.terminate(&identity.id).await,
            None => Ok(()),
        }
    }

    /// Create a role unless it already exists
    pub async fn create_role(&self, name: &str) -> Result<()> {
        if !self.inner.roles.exists(name).await? {
            self.inner.roles.create(name).await?;
            info!(role = name, "role created");
        }
        Ok(())
    }

    /// Create an identity and give it `role`, all or nothing
    pub async fn register(&self, request: NewIdentity, role: &str) -> Result<Identity> {
        validation::validate_username(&request.username)
            .map_err(|e| Error::IdentityRejected(validation::error_message(&e)))?;
        validation::validate_email(&request.email)
            .map_err(|e| Error::IdentityRejected(validation::error_message(&e)))?;
        self.inner
            .password_validator
            .validate(&request.secret)
            .map_err(|errors| Error::IdentityRejected(validation::describe_password_errors(&errors)))?;

        // Creation and role assignment finish together even if the caller goes away
        let session = self.clone();
        let role = role.to_string();
        tokio::spawn(async move { session.complete_registration(request, &role).await }).await?
    }

    async fn complete_registration(&self, request: NewIdentity, role: &str) -> Result<Identity> {
        let identity = self.inner.credentials.create_identity(request).await?;

        if let Err(err) = self.inner.roles.assign(&identity.id, role).await {
            let reason = match err {
                Error::RoleAssignment(reason) => reason,
                other => other.to_string(),
            };
            warn!(user_id = %identity.id, role, error = %reason, "role assignment failed, removing identity");

            if let Err(cleanup) = self.inner.credentials.delete_identity(&identity.id).await {
                error!(
                    user_id = %identity.id,
                    role,
                    error = %reason,
                    cleanup_error = %cleanup,
                    "could not remove identity after failed role assignment"
                );
                return Err(Error::RoleAssignment(format!(
                    "{} Removing the user also failed: {}",
                    reason, cleanup
                )));
            }

            return Err(Error::RoleAssignment(reason));
        }

        info!(user_id = %identity.id, username = %identity.username, role, "user registered");
        Ok(identity)
    }
}
