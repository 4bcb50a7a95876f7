//! REST API for credentials-core
//!
//! Every endpoint takes and returns JSON. Success is 200; any failure,
//! including undecodable bodies, is 400 with `{"status":"Error","message":…}`.

pub mod models;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use validator::{Validate, ValidationErrors};

use crate::validation;
use crate::{CredentialSession, Error, NewIdentity};
use models::*;

/// Create the REST API router
pub fn create_router(session: CredentialSession) -> Router {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/role", post(create_role))
        .route("/auth/refresh-token", post(refresh_token))
        .route("/auth/logout", post(logout))
        .layer(TraceLayer::new_for_http())
        .with_state(session)
}

/// A failed request, rendered as 400 with an error status body
#[derive(Debug)]
pub struct ApiError {
    message: String,
}

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        if err.is_client_error() || matches!(err, Error::RenewalConflict) {
            return Self::new(err.to_string());
        }
        // Keep store and signing internals out of responses
        tracing::error!(error = %err, "request failed");
        Self::new("The request could not be completed.")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(rejection.body_text())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .values()
            .flat_map(|field| field.iter().map(validation::error_message))
            .collect();
        messages.sort();
        messages.dedup();
        Self::new(messages.join(" "))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, Json(StatusResponse::error(self.message))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

async fn register(
    State(session): State<CredentialSession>,
    payload: Result<Json<RegisterRequest>, JsonRejection>,
) -> ApiResult<StatusResponse> {
    let Json(request) = payload?;
    request.validate()?;

    session
        .register(
            NewIdentity {
                username: request.user_name,
                email: request.email,
                secret: request.password,
            },
            &request.role,
        )
        .await?;

    Ok(Json(StatusResponse::success("User registered successfully.")))
}

async fn login(
    State(session): State<CredentialSession>,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<LoginResponse> {
    let Json(request) = payload?;
    request.validate()?;

    let outcome = session.login(&request.user_name, &request.password).await?;

    Ok(Json(LoginResponse {
        status: STATUS_SUCCESS.to_string(),
        token: outcome.access_token.token,
        refresh_token: outcome.renewal_token.value,
        expired_on: outcome.access_token.expires_at,
        user_name: outcome.identity.username,
        email: outcome.identity.email,
        role: outcome.role,
    }))
}

async fn create_role(
    State(session): State<CredentialSession>,
    payload: Result<Json<CreateRoleRequest>, JsonRejection>,
) -> ApiResult<StatusResponse> {
    let Json(request) = payload?;
    request.validate()?;

    session.create_role(&request.role_name).await?;
    Ok(Json(StatusResponse::success("Role created successfully!")))
}

async fn refresh_token(
    State(session): State<CredentialSession>,
    payload: Result<Json<RefreshTokenRequest>, JsonRejection>,
) -> ApiResult<RefreshTokenResponse> {
    let Json(request) = payload?;

    let outcome = session.renew(&request.refresh_token).await?;

    Ok(Json(RefreshTokenResponse {
        status: STATUS_SUCCESS.to_string(),
        token: outcome.access_token.token,
        refresh_token: outcome.renewal_token.value,
        expired_on: outcome.access_token.expires_at,
    }))
}

async fn logout(
    State(session): State<CredentialSession>,
    payload: Result<Json<LogoutRequest>, JsonRejection>,
) -> ApiResult<StatusResponse> {
    let Json(request) = payload?;
    request.validate()?;

    session.logout(&request.email).await?;
    Ok(Json(StatusResponse::success("Success Logout")))
}
