//! HTTP surface of the token authority.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{Extension, MatchedPath},
    http::{header::CONTENT_TYPE, HeaderName, HeaderValue, Method, Request},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;

use crate::{authority::TokenAuthority, token::Role};

pub mod handlers;
mod openapi;

pub use openapi::openapi;

use handlers::{add_doctor, health, login, register, root, session};

/// Build the application with every route and layer, ready to serve.
#[must_use]
pub fn router(authority: Arc<TokenAuthority>, cors: CorsLayer) -> Router {
    let mut app = Router::new()
        .route("/", get(root::root))
        .route("/health", get(health::health).options(health::health))
        .route("/openapi.json", get(|| async { Json(openapi()) }))
        .route("/api/user/register", post(register::register))
        .route("/api/admin/add-doctor", post(add_doctor::add_doctor));

    for role in Role::ALL {
        app = app
            .route(
                &format!("/api/{role}/login"),
                post(login::login).layer(Extension(role)),
            )
            .route(
                &format!("/api/{role}/session"),
                get(session::session).layer(Extension(role)),
            );
    }

    app.layer(
        ServiceBuilder::new()
            .layer(SetRequestHeaderLayer::if_not_present(
                HeaderName::from_static("x-request-id"),
                |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
            ))
            .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                "x-request-id",
            )))
            .layer(TraceLayer::new_for_http().make_span_with(make_span))
            .layer(cors)
            .layer(Extension(authority)),
    )
}

/// CORS policy for the patient portal and console origins. Protected calls
/// carry role headers, so those are allowed alongside `content-type`.
///
/// # Errors
/// Returns an error if an origin has no host.
pub fn cors(origins: &[Url]) -> Result<CorsLayer> {
    let origins = origins
        .iter()
        .map(origin_header)
        .collect::<Result<Vec<_>>>()?;
    let mut allowed_headers = vec![CONTENT_TYPE];
    allowed_headers.extend(Role::ALL.map(|role| HeaderName::from_static(role.header_name())));
    Ok(CorsLayer::new()
        .allow_headers(allowed_headers)
        .allow_methods([Method::GET, Method::POST])
        .allow_origin(AllowOrigin::list(origins)))
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(port: u16, authority: Arc<TokenAuthority>, origins: &[Url]) -> Result<()> {
    let app = router(authority, cors(origins)?);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {err}");
            }
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

fn origin_header(url: &Url) -> Result<HeaderValue> {
    let host = url
        .host_str()
        .ok_or_else(|| anyhow!("Origin URL must include a valid host: {url}"))?;
    let port = url
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    let origin = format!("{}://{}{}", url.scheme(), host, port);
    HeaderValue::from_str(&origin).context("Failed to build origin header")
}
