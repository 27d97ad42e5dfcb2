use axum::response::IntoResponse;

pub async fn root() -> impl IntoResponse {
    "API Working"
}
