use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use secrecy::SecretString;
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::instrument;
use utoipa::ToSchema;

use super::response::{ApiError, ApiResponse};
use crate::authority::{Registration, TokenAuthority};

#[derive(ToSchema, Deserialize)]
pub struct RegisterRequest {
    name: String,
    email: String,
    #[schema(value_type = String, format = Password)]
    password: SecretString,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

#[utoipa::path(
    post,
    path = "/api/user/register",
    request_body = RegisterRequest,
    responses (
        (status = 201, description = "Patient account created, token issued", body = ApiResponse, content_type = "application/json"),
        (status = 400, description = "Missing or invalid fields", body = ApiResponse),
        (status = 409, description = "An account with this email already exists", body = ApiResponse),
    ),
    tag = "register"
)]
#[instrument(skip(authority, payload))]
pub async fn register(
    Extension(authority): Extension<Arc<TokenAuthority>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(Json(request)) = payload else {
        return Err(ApiError::missing_payload());
    };
    let registration = Registration {
        name: request.name,
        email: request.email,
        password: request.password,
    };
    let token = authority.register_user(&registration)?;
    Ok((StatusCode::CREATED, Json(ApiResponse::token(token))))
}
