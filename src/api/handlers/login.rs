use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use secrecy::SecretString;
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::instrument;
use utoipa::ToSchema;

use super::response::{ApiError, ApiResponse};
use crate::{
    authority::{Credential, TokenAuthority},
    token::Role,
};

#[derive(ToSchema, Deserialize)]
pub struct LoginRequest {
    email: String,
    #[schema(value_type = String, format = Password)]
    password: SecretString,
}

impl fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginRequest")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[utoipa::path(
    post,
    path = "/api/{role}/login",
    params(("role" = Role, Path, description = "Role slot to authenticate")),
    request_body = LoginRequest,
    responses (
        (status = 200, description = "Token issued", body = ApiResponse, content_type = "application/json"),
        (status = 400, description = "Missing payload", body = ApiResponse),
        (status = 401, description = "Invalid credentials", body = ApiResponse),
    ),
    tag = "session"
)]
#[instrument(skip(authority, payload), fields(role = %role))]
pub async fn login(
    Extension(role): Extension<Role>,
    Extension(authority): Extension<Arc<TokenAuthority>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::missing_payload());
    };
    let credential = Credential {
        email: request.email,
        password: request.password,
    };
    let token = authority.authenticate(role, &credential)?;
    Ok((StatusCode::OK, Json(ApiResponse::token(token))))
}
