//! Access token issuance
//!
//! Tokens are compact JWTs signed with HMAC-SHA-256 over the shared secret
//! from `jwt.signing_key`. The key is checked once when the issuer is built,
//! so a missing key stops the process at startup instead of failing requests.

use chrono::{DateTime, SubsecRound, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::claims::ClaimSet;
use crate::types::{access_token_ttl, AccessToken};
use crate::{Error, Result};

/// Smallest HMAC-SHA-256 key accepted, in bytes
pub const MIN_SIGNING_KEY_BYTES: usize = 32;

/// JWT configuration
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    #[serde(alias = "Issuer")]
    pub issuer: String,
    #[serde(alias = "Audience")]
    pub audience: String,
    #[serde(alias = "SigningKey")]
    pub signing_key: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            issuer: "https://credentials.local".to_string(),
            audience: "credentials-clients".to_string(),
            signing_key: None,
        }
    }
}

impl std::fmt::Debug for JwtConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtConfig")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Claims carried by an issued access token, as read back by [`AccessTokenIssuer::verify`]
#[derive(Debug, Clone, Deserialize)]
pub struct AccessClaims {
    pub iss: String,
    pub aud: String,
    pub sub: String,
    pub name: String,
    pub email: String,
    pub jti: String,
    #[serde(default, deserialize_with = "one_or_many")]
    pub role: Vec<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(role) => vec![role],
        OneOrMany::Many(roles) => roles,
    })
}

/// Signs bounded-lifetime access tokens
pub struct AccessTokenIssuer {
    issuer: String,
    audience: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    header: Header,
}

impl AccessTokenIssuer {
    pub fn new(config: &JwtConfig) -> Result<Self> {
        // The key signs exactly as configured; trimming only decides blank and short keys
        let signing_key = config
            .signing_key
            .as_deref()
            .filter(|key| !key.trim().is_empty())
            .ok_or(Error::ConfigurationMissing("jwt.signing_key"))?;

        let significant = signing_key.trim().len();
        if significant < MIN_SIGNING_KEY_BYTES {
            return Err(Error::Config(format!(
                "jwt.signing_key must be at least {} bytes for HS256, got {}",
                MIN_SIGNING_KEY_BYTES, significant
            )));
        }
        if config.issuer.trim().is_empty() {
            return Err(Error::ConfigurationMissing("jwt.issuer"));
        }
        if config.audience.trim().is_empty() {
            return Err(Error::ConfigurationMissing("jwt.audience"));
        }

        Ok(Self {
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            encoding_key: EncodingKey::from_secret(signing_key.as_bytes()),
            decoding_key: DecodingKey::from_secret(signing_key.as_bytes()),
            header: Header::new(Algorithm::HS256),
        })
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn audience(&self) -> &str {
        &self.audience
    }

    /// Sign `claims` into a token valid from `now` for ten minutes
    pub fn issue(&self, claims: &ClaimSet, now: DateTime<Utc>) -> Result<AccessToken> {
        // JWT times have whole-second resolution
        let issued_at = now.trunc_subsecs(0);
        let expires_at = issued_at + access_token_ttl();

        let mut payload = claims.to_payload();
        payload.insert("iss".to_string(), Value::String(self.issuer.clone()));
        payload.insert("aud".to_string(), Value::String(self.audience.clone()));
        payload.insert("iat".to_string(), Value::from(issued_at.timestamp()));
        payload.insert("nbf".to_string(), Value::from(issued_at.timestamp()));
        payload.insert("exp".to_string(), Value::from(expires_at.timestamp()));

        let token = encode(&self.header, &payload, &self.encoding_key)?;

        Ok(AccessToken {
            token,
            issued_at,
            expires_at,
        })
    }

    /// Check signature, issuer, audience and lifetime of a token from this issuer
    pub fn verify(&self, token: &str) -> Result<AccessClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let data = decode::<AccessClaims>(token, &self.decoding_key, &validation)?;
        Ok(data.claims)
    }
}
