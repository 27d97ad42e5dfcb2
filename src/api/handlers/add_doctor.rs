use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use secrecy::SecretString;
use serde::Deserialize;
use std::{fmt, sync::Arc};
use tracing::{info, instrument};
use utoipa::ToSchema;

use super::response::{require_role, ApiError, ApiResponse};
use crate::{
    authority::{Registration, TokenAuthority},
    token::Role,
};

#[derive(ToSchema, Deserialize)]
pub struct AddDoctorRequest {
    name: String,
    email: String,
    #[schema(value_type = String, format = Password)]
    password: SecretString,
}

impl fmt::Debug for AddDoctorRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddDoctorRequest")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Operator-only enrollment of a clinician account.
#[utoipa::path(
    post,
    path = "/api/admin/add-doctor",
    request_body = AddDoctorRequest,
    params(("atoken" = String, Header, description = "Admin token")),
    responses (
        (status = 201, description = "Doctor added", body = ApiResponse, content_type = "application/json"),
        (status = 400, description = "Missing or invalid fields", body = ApiResponse),
        (status = 401, description = "Missing or refused admin token", body = ApiResponse),
        (status = 409, description = "A doctor with this email already exists", body = ApiResponse),
    ),
    tag = "admin"
)]
#[instrument(skip(authority, headers, payload))]
pub async fn add_doctor(
    Extension(authority): Extension<Arc<TokenAuthority>>,
    headers: HeaderMap,
    payload: Option<Json<AddDoctorRequest>>,
) -> Result<impl IntoResponse, ApiError> {
    let operator = require_role(&headers, &authority, Role::Admin)?;
    let Some(Json(request)) = payload else {
        return Err(ApiError::missing_payload());
    };
    let registration = Registration {
        name: request.name,
        email: request.email,
        password: request.password,
    };
    let id = authority.add_doctor(&registration)?;
    info!(operator = %operator.subject, doctor = %id, "Doctor enrolled");
    Ok((StatusCode::CREATED, Json(ApiResponse::message("Doctor added"))))
}
