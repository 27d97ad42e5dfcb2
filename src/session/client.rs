//! Transport from a tab to the token authority.

use reqwest::{Client, StatusCode};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::future::{self, Future};
use thiserror::Error;
use tracing::{info_span, instrument, Instrument};
use url::Url;

use super::store::StoreError;
use crate::{
    api::handlers::response::NOT_AUTHORIZED,
    authority::{AuthError, Credential, Identity, Registration, TokenAuthority},
    token::Role,
    APP_USER_AGENT,
};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Login or registration refused; the slot is untouched.
    #[error("{0}")]
    Credential(String),
    /// The authority refused the presented token; the slot must be cleared.
    #[error("session rejected: {0}")]
    Rejected(String),
    #[error("authority unreachable: {0}")]
    Transport(String),
    #[error("no active {0} session")]
    NotAuthenticated(Role),
    #[error("{0} session changed while the request was in flight")]
    Superseded(Role),
    #[error("{0} sessions are not held by this origin")]
    NotServed(Role),
    #[error("authority returned an unusable token")]
    MalformedToken,
    #[error("session store: {0}")]
    Store(String),
}

impl From<StoreError> for CallError {
    fn from(err: StoreError) -> Self {
        Self::Store(err.to_string())
    }
}

impl From<AuthError> for CallError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredential
            | AuthError::InvalidRegistration(_)
            | AuthError::SubjectExists => Self::Credential(err.to_string()),
            AuthError::Internal(_) => Self::Transport(err.to_string()),
            AuthError::MalformedToken
            | AuthError::SignatureMismatch
            | AuthError::RoleMismatch
            | AuthError::SubjectNotFound => Self::Rejected(err.to_string()),
        }
    }
}

/// Exchanges a credential for a session token.
pub trait Authenticate {
    fn authenticate(
        &self,
        role: Role,
        credential: &Credential,
    ) -> impl Future<Output = Result<String, CallError>> + Send;
}

/// In-process authority, used when the console and authority share a binary
/// and by tests.
impl Authenticate for TokenAuthority {
    fn authenticate(
        &self,
        role: Role,
        credential: &Credential,
    ) -> impl Future<Output = Result<String, CallError>> + Send {
        future::ready(Self::authenticate(self, role, credential).map_err(CallError::from))
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    success: bool,
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    identity: Option<Identity>,
}

impl Envelope {
    fn message(&self) -> String {
        self.message
            .clone()
            .unwrap_or_else(|| "request failed".to_string())
    }
}

/// Authority reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    base: Url,
    client: Client,
}

impl HttpAuthority {
    /// # Errors
    /// Returns [`CallError::Transport`] if the HTTP client cannot be built.
    pub fn new(base: Url) -> Result<Self, CallError> {
        let client = Client::builder()
            .user_agent(APP_USER_AGENT)
            .build()
            .map_err(|err| CallError::Transport(err.to_string()))?;
        Ok(Self { base, client })
    }

    fn endpoint(&self, path: &str) -> Result<Url, CallError> {
        self.base
            .join(path)
            .map_err(|err| CallError::Transport(err.to_string()))
    }

    /// `POST /api/<role>/login`.
    ///
    /// # Errors
    /// Returns [`CallError::Credential`] when the authority refuses the
    /// credential.
    #[instrument(skip(self, credential), fields(role = %role))]
    pub async fn login(&self, role: Role, credential: &Credential) -> Result<String, CallError> {
        let url = self.endpoint(&format!("/api/{role}/login"))?;
        let body = json!({
            "email": credential.email,
            "password": credential.password.expose_secret(),
        });
        let span = info_span!("authority.login", http.method = "POST", url = %url);
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .instrument(span)
            .await
            .map_err(transport)?;
        token_from(read_envelope(response).await?)
    }

    /// `POST /api/user/register`.
    ///
    /// # Errors
    /// Returns [`CallError::Credential`] for invalid or duplicate registrations.
    #[instrument(skip(self, registration))]
    pub async fn register(&self, registration: &Registration) -> Result<String, CallError> {
        let url = self.endpoint("/api/user/register")?;
        let body = json!({
            "name": registration.name,
            "email": registration.email,
            "password": registration.password.expose_secret(),
        });
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        token_from(read_envelope(response).await?)
    }

    /// `GET /api/<role>/session`: the cheapest protected call, used to
    /// confirm a token is still accepted.
    ///
    /// # Errors
    /// Returns [`CallError::Rejected`] on `401`.
    pub async fn session(&self, role: Role, token: &str) -> Result<Identity, CallError> {
        let envelope: Envelope = self
            .get_protected(role, &format!("/api/{role}/session"), token)
            .await?;
        envelope
            .identity
            .ok_or_else(|| CallError::Transport("session response without identity".to_string()))
    }

    /// Any protected `GET`, carrying the token in the role's header.
    ///
    /// # Errors
    /// Returns [`CallError::Rejected`] on `401`, [`CallError::Transport`] for
    /// anything else that is not a success.
    #[instrument(skip(self, token), fields(role = %role))]
    pub async fn get_protected<T: DeserializeOwned>(
        &self,
        role: Role,
        path: &str,
        token: &str,
    ) -> Result<T, CallError> {
        let url = self.endpoint(path)?;
        let span = info_span!("authority.protected", http.method = "GET", url = %url);
        let response = self
            .client
            .get(url)
            .header(role.header_name(), token)
            .send()
            .instrument(span)
            .await
            .map_err(transport)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            // The status decides; the body is only a hint and may not be ours.
            let message = response
                .json::<Envelope>()
                .await
                .ok()
                .and_then(|envelope| envelope.message)
                .unwrap_or_else(|| NOT_AUTHORIZED.to_string());
            return Err(CallError::Rejected(message));
        }
        if !status.is_success() {
            return Err(CallError::Transport(format!("unexpected status {status}")));
        }
        response.json().await.map_err(transport)
    }
}

impl Authenticate for HttpAuthority {
    fn authenticate(
        &self,
        role: Role,
        credential: &Credential,
    ) -> impl Future<Output = Result<String, CallError>> + Send {
        self.login(role, credential)
    }
}

async fn read_envelope(response: reqwest::Response) -> Result<Envelope, CallError> {
    let status = response.status();
    if status.is_server_error() {
        return Err(CallError::Transport(format!("unexpected status {status}")));
    }
    response.json().await.map_err(transport)
}

fn token_from(envelope: Envelope) -> Result<String, CallError> {
    if !envelope.success {
        return Err(CallError::Credential(envelope.message()));
    }
    envelope.token.ok_or(CallError::MalformedToken)
}

#[allow(clippy::needless_pass_by_value)]
fn transport(err: reqwest::Error) -> CallError {
    CallError::Transport(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_errors_map_to_call_errors() {
        assert!(matches!(
            CallError::from(AuthError::InvalidCredential),
            CallError::Credential(_)
        ));
        assert!(matches!(
            CallError::from(AuthError::SubjectNotFound),
            CallError::Rejected(_)
        ));
        assert!(matches!(
            CallError::from(AuthError::Internal("boom".into())),
            CallError::Transport(_)
        ));
    }

    #[test]
    fn envelope_without_token_is_malformed() {
        let envelope: Envelope = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert_eq!(token_from(envelope), Err(CallError::MalformedToken));

        let envelope: Envelope =
            serde_json::from_str(r#"{"success":false,"message":"Invalid credentials"}"#).unwrap();
        assert_eq!(
            token_from(envelope),
            Err(CallError::Credential("Invalid credentials".to_string()))
        );
    }

    async fn serve(app: axum::Router) -> Result<Url, Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move { axum::serve(listener, app).await });
        Ok(Url::parse(&format!("http://{addr}"))?)
    }

    #[tokio::test]
    async fn any_401_is_a_rejection() -> Result<(), Box<dyn std::error::Error>> {
        use axum::{http::StatusCode as Status, routing::get};

        let app = axum::Router::new()
            .route(
                "/api/user/session",
                get(|| async { (Status::UNAUTHORIZED, "Unauthorized") }),
            )
            .route("/api/admin/session", get(|| async { Status::UNAUTHORIZED }));
        let remote = HttpAuthority::new(serve(app).await?)?;

        assert_eq!(
            remote.session(Role::User, "tok").await,
            Err(CallError::Rejected(NOT_AUTHORIZED.to_string()))
        );
        assert_eq!(
            remote.session(Role::Admin, "tok").await,
            Err(CallError::Rejected(NOT_AUTHORIZED.to_string()))
        );
        Ok(())
    }

    #[test]
    fn endpoint_joins_base() {
        let authority = HttpAuthority::new(Url::parse("http://127.0.0.1:8080").unwrap()).unwrap();
        assert_eq!(
            authority.endpoint("/api/doctor/login").unwrap().as_str(),
            "http://127.0.0.1:8080/api/doctor/login"
        );
    }
}
