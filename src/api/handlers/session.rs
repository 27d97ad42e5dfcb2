use axum::{extract::Extension, http::HeaderMap, Json};
use std::sync::Arc;
use tracing::instrument;

use super::response::{require_role, ApiError, ApiResponse};
use crate::{authority::TokenAuthority, token::Role};

/// Smallest protected call: echoes who the presented token speaks for.
#[utoipa::path(
    get,
    path = "/api/{role}/session",
    params(
        ("role" = Role, Path, description = "Role slot the token belongs to"),
    ),
    responses (
        (status = 200, description = "Token accepted", body = ApiResponse, content_type = "application/json"),
        (status = 401, description = "Missing or refused token", body = ApiResponse),
    ),
    tag = "session"
)]
#[instrument(skip(authority, headers), fields(role = %role))]
pub async fn session(
    Extension(role): Extension<Role>,
    Extension(authority): Extension<Arc<TokenAuthority>>,
    headers: HeaderMap,
) -> Result<Json<ApiResponse>, ApiError> {
    let identity = require_role(&headers, &authority, role)?;
    Ok(Json(ApiResponse::identity(identity)))
}
