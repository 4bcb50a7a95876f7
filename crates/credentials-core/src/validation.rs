//! Input validation for registration

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

use crate::config::PasswordConfig;

// Same character set ASP.NET-style identity stores accept by default
static USERNAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9\-._@+]{1,256}$").expect("static regex"));
static EMAIL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"));

/// Password validator
pub struct PasswordValidator {
    policy: PasswordConfig,
}

impl PasswordValidator {
    pub fn new(policy: PasswordConfig) -> Self {
        Self { policy }
    }

    pub fn with_default_policy() -> Self {
        Self::new(PasswordConfig::default())
    }

    /// Check a password, reporting every unmet rule at once
    pub fn validate(&self, password: &str) -> Result<(), Vec<PasswordError>> {
        let mut errors = Vec::new();

        if password.chars().count() < self.policy.min_length {
            errors.push(PasswordError::TooShort(self.policy.min_length));
        }

        let has_upper = password.chars().any(|c| c.is_uppercase());
        let has_lower = password.chars().any(|c| c.is_lowercase());
        let has_digit = password.chars().any(|c| c.is_ascii_digit());
        let has_special = password.chars().any(|c| !c.is_alphanumeric());

        if self.policy.require_special && !has_special {
            errors.push(PasswordError::MissingSpecial);
        }
        if self.policy.require_numbers && !has_digit {
            errors.push(PasswordError::MissingNumber);
        }
        if self.policy.require_lowercase && !has_lower {
            errors.push(PasswordError::MissingLowercase);
        }
        if self.policy.require_uppercase && !has_upper {
            errors.push(PasswordError::MissingUppercase);
        }

        let unique_chars: HashSet<char> = password.chars().collect();
        if unique_chars.len() < self.policy.min_unique_chars {
            errors.push(PasswordError::NotEnoughUniqueChars(self.policy.min_unique_chars));
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PasswordError {
    #[error("Passwords must be at least {0} characters.")]
    TooShort(usize),

    #[error("Passwords must have at least one uppercase ('A'-'Z').")]
    MissingUppercase,

    #[error("Passwords must have at least one lowercase ('a'-'z').")]
    MissingLowercase,

    #[error("Passwords must have at least one digit ('0'-'9').")]
    MissingNumber,

    #[error("Passwords must have at least one non alphanumeric character.")]
    MissingSpecial,

    #[error("Passwords must use at least {0} different characters.")]
    NotEnoughUniqueChars(usize),
}

/// Join password errors into one client-facing message
pub fn describe_password_errors(errors: &[PasswordError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validate username format
pub fn validate_username(username: &str) -> Result<(), ValidationError> {
    if !USERNAME_REGEX.is_match(username) {
        return Err(ValidationError::new("invalid_username_format")
            .with_message(format!("Username '{}' is invalid, can only contain letters or digits.", username).into()));
    }
    Ok(())
}

/// Validate email format
pub fn validate_email(email: &str) -> Result<(), ValidationError> {
    if !EMAIL_REGEX.is_match(email) {
        return Err(ValidationError::new("invalid_email_format")
            .with_message(format!("Email '{}' is invalid.", email).into()));
    }

    if email.contains('<') || email.contains('>') || email.contains('"') || email.contains('\'') {
        return Err(ValidationError::new("email_contains_dangerous_chars")
            .with_message(format!("Email '{}' is invalid.", email).into()));
    }

    Ok(())
}

/// Message to surface for a validator error, falling back to its code
pub fn error_message(error: &ValidationError) -> String {
    error
        .message
        .as_ref()
        .map(|m| m.to_string())
        .unwrap_or_else(|| error.code.to_string())
}
