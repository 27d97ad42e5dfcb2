use axum::{
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use utoipa::ToSchema;

use crate::{
    authority::{AuthError, Identity, TokenAuthority},
    token::Role,
};

/// Message for every refused protected call, whatever the reason.
pub const NOT_AUTHORIZED: &str = "Not authorized, login again";

/// Body shared by every endpoint.
#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<Identity>,
}

impl ApiResponse {
    #[must_use]
    pub fn token(token: String) -> Self {
        Self {
            success: true,
            token: Some(token),
            message: None,
            identity: None,
        }
    }

    #[must_use]
    pub fn identity(identity: Identity) -> Self {
        Self {
            success: true,
            token: None,
            message: None,
            identity: Some(identity),
        }
    }

    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            token: None,
            message: Some(message.into()),
            identity: None,
        }
    }

    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            token: None,
            message: Some(message.into()),
            identity: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn not_authorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, NOT_AUTHORIZED)
    }

    #[must_use]
    pub fn missing_payload() -> Self {
        Self::new(StatusCode::BAD_REQUEST, "Missing payload")
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredential => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
            AuthError::InvalidRegistration(_) => Self::new(StatusCode::BAD_REQUEST, err.to_string()),
            AuthError::SubjectExists => Self::new(StatusCode::CONFLICT, err.to_string()),
            AuthError::Internal(_) => {
                warn!("Internal authority error: {err}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
            }
            AuthError::MalformedToken
            | AuthError::SignatureMismatch
            | AuthError::RoleMismatch
            | AuthError::SubjectNotFound => Self::not_authorized(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::failure(self.message))).into_response()
    }
}

/// Validate the token carried in `role`'s header.
///
/// # Errors
/// Returns a uniform `401` when the header is missing or the token is refused.
pub fn require_role(
    headers: &HeaderMap,
    authority: &TokenAuthority,
    role: Role,
) -> Result<Identity, ApiError> {
    let Some(token) = headers
        .get(role.header_name())
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
    else {
        debug!(role = %role, "Missing token header");
        return Err(ApiError::not_authorized());
    };
    authority.validate(token, role).map_err(|err| {
        debug!(role = %role, "Token refused: {err}");
        ApiError::from(err)
    })
}
