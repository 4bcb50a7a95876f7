//! Request and response bodies of the `/auth` API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const STATUS_SUCCESS: &str = "Success";
pub const STATUS_ERROR: &str = "Error";

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "The UserName field is required."))]
    pub user_name: String,

    #[serde(default)]
    #[validate(email(message = "The Email field is not a valid e-mail address."))]
    pub email: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "The Password field is required."))]
    pub password: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "The Role field is required."))]
    pub role: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "The UserName field is required."))]
    pub user_name: String,

    #[serde(default)]
    #[validate(length(min = 1, message = "The Password field is required."))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoleRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "The RoleName field is required."))]
    pub role_name: String,
}

/// Checked by the session itself, which reports "Invalid refresh token."
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LogoutRequest {
    #[serde(default)]
    #[validate(email(message = "The Email field is not a valid e-mail address."))]
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub status: String,
    pub message: String,
}

impl StatusResponse {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_SUCCESS.to_string(),
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: STATUS_ERROR.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub status: String,
    pub token: String,
    pub refresh_token: String,
    pub expired_on: DateTime<Utc>,
    pub user_name: String,
    pub email: String,
    pub role: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub status: String,
    pub token: String,
    pub refresh_token: String,
    pub expired_on: DateTime<Utc>,
}
