//! Claim set composition
//!
//! A [`ClaimSet`] is the ordered list of `(type, value)` pairs that describe
//! one identity at one instant. It is built fresh for every issuance and is
//! never persisted.

use std::collections::BTreeSet;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClaimType {
    Subject,
    Name,
    Email,
    TokenId,
    Role,
}

impl ClaimType {
    /// Registered JWT claim name
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimType::Subject => "sub",
            ClaimType::Name => "name",
            ClaimType::Email => "email",
            ClaimType::TokenId => "jti",
            ClaimType::Role => "role",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub kind: ClaimType,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimSet {
    claims: Vec<Claim>,
}

impl ClaimSet {
    pub fn push(&mut self, kind: ClaimType, value: impl Into<String>) {
        self.claims.push(Claim {
            kind,
            value: value.into(),
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &Claim> {
        self.claims.iter()
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }

    /// First value of the given type
    pub fn first(&self, kind: ClaimType) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.kind == kind)
            .map(|c| c.value.as_str())
    }

    /// All values of the given type, in insertion order
    pub fn values(&self, kind: ClaimType) -> Vec<&str> {
        self.claims
            .iter()
            .filter(|c| c.kind == kind)
            .map(|c| c.value.as_str())
            .collect()
    }

    pub fn token_id(&self) -> Option<&str> {
        self.first(ClaimType::TokenId)
    }

    pub fn roles(&self) -> Vec<&str> {
        self.values(ClaimType::Role)
    }

    /// Render as a JWT payload object.
    ///
    /// A claim type seen once maps to a string; repeated types map to an array
    /// in insertion order.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();

        for claim in &self.claims {
            let key = claim.kind.as_str();
            let value = Value::String(claim.value.clone());

            match payload.get_mut(key) {
                None => {
                    payload.insert(key.to_string(), value);
                }
                Some(Value::Array(existing)) => existing.push(value),
                Some(existing) => {
                    let first = existing.take();
                    *existing = Value::Array(vec![first, value]);
                }
            }
        }

        payload
    }
}

/// Builds the canonical claim set for a verified identity
#[derive(Debug, Default, Clone, Copy)]
pub struct ClaimsComposer;

impl ClaimsComposer {
    pub fn new() -> Self {
        Self
    }

    pub fn compose(&self, identity: &Identity, roles: &BTreeSet<String>) -> ClaimSet {
        let mut claims = ClaimSet::default();
        claims.push(ClaimType::Subject, identity.id.as_str());
        claims.push(ClaimType::Name, identity.username.as_str());
        claims.push(ClaimType::Email, identity.email.as_str());
        claims.push(ClaimType::TokenId, Uuid::new_v4().to_string());

        for role in roles {
            claims.push(ClaimType::Role, role.as_str());
        }

        claims
    }
}
