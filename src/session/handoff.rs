//! One-time transfer of a session token to another origin through the URL.
//!
//! The sending side builds `<destination>/?token=<token>&type=<role>`. The
//! receiving side consumes that URL exactly once per page load: it stores the
//! token, publishes it to the context and rewrites history so the token is not
//! left in the address bar or the back stack.

use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    context::{SessionContext, SessionToken},
    guard::home_path,
    history::BrowserHistory,
    origin::OriginKind,
};
use crate::token::Role;

pub const TOKEN_PARAM: &str = "token";
pub const ROLE_PARAM: &str = "type";

#[derive(Clone, PartialEq, Eq)]
pub struct HandoffEnvelope {
    pub token: String,
    pub role: Role,
}

impl fmt::Debug for HandoffEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoffEnvelope")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandoffError {
    #[error("handoff is missing the `{0}` parameter")]
    MissingParameter(&'static str),
    #[error("handoff names an unknown role: {0}")]
    UnknownRole(String),
    #[error("{0} sessions are not held by this origin")]
    NotServed(Role),
    #[error("handoff token is malformed")]
    MalformedToken,
    #[error("handoff token was issued for {claimed}, not {declared}")]
    RoleMismatch { claimed: Role, declared: Role },
    #[error("could not store handoff token: {0}")]
    Store(String),
}

/// Handoff URL for `envelope` at `destination`'s root.
#[must_use]
pub fn encode(destination: &Url, envelope: &HandoffEnvelope) -> Url {
    let mut url = destination.clone();
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut()
        .append_pair(TOKEN_PARAM, &envelope.token)
        .append_pair(ROLE_PARAM, envelope.role.as_str());
    url
}

/// Read a handoff envelope from `url`. `Ok(None)` means the URL carries no
/// handoff at all.
///
/// # Errors
/// Returns an error if only one parameter is present, either is empty or the
/// role is unknown.
pub fn parse(url: &Url) -> Result<Option<HandoffEnvelope>, HandoffError> {
    let mut token = None;
    let mut role = None;
    for (key, value) in url.query_pairs() {
        match &*key {
            TOKEN_PARAM => token = Some(value.into_owned()),
            ROLE_PARAM => role = Some(value.into_owned()),
            _ => {}
        }
    }
    match (token, role) {
        (None, None) => Ok(None),
        (None, Some(_)) => Err(HandoffError::MissingParameter(TOKEN_PARAM)),
        (Some(_), None) => Err(HandoffError::MissingParameter(ROLE_PARAM)),
        (Some(token), Some(role)) => {
            if token.trim().is_empty() {
                return Err(HandoffError::MissingParameter(TOKEN_PARAM));
            }
            let role = role
                .parse::<Role>()
                .map_err(|_| HandoffError::UnknownRole(role))?;
            Ok(Some(HandoffEnvelope { token, role }))
        }
    }
}

/// `url` without the handoff parameters. Other query parameters survive.
#[must_use]
pub fn strip(url: &Url) -> Url {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| *key != TOKEN_PARAM && *key != ROLE_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    let mut stripped = url.clone();
    if kept.is_empty() {
        stripped.set_query(None);
    } else {
        stripped.query_pairs_mut().clear().extend_pairs(kept);
    }
    stripped
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffOutcome {
    /// No handoff parameters on the page URL.
    Absent,
    /// Token stored and published; history now points at `home`.
    Consumed { role: Role, home: &'static str },
    /// The decoder already ran for this page load.
    AlreadyRan,
    /// Parameters were present but unusable. The existing session is
    /// untouched; the parameters are still removed from history.
    Ignored(HandoffError),
}

/// Receiving side of a handoff, armed once per page load.
#[derive(Debug)]
pub struct HandoffDecoder {
    origin: OriginKind,
    ran: AtomicBool,
}

impl HandoffDecoder {
    #[must_use]
    pub const fn new(origin: OriginKind) -> Self {
        Self {
            origin,
            ran: AtomicBool::new(false),
        }
    }

    /// Consume the handoff on the current history entry, if any. Only the
    /// first call per decoder does anything.
    pub fn run(&self, history: &mut BrowserHistory, context: &SessionContext) -> HandoffOutcome {
        if self.ran.swap(true, Ordering::AcqRel) {
            debug!("Handoff decoder already ran for this page load");
            return HandoffOutcome::AlreadyRan;
        }

        let envelope = match parse(history.current()) {
            Ok(None) => return HandoffOutcome::Absent,
            Ok(Some(envelope)) => envelope,
            Err(err) => return self.ignore(history, err),
        };

        let role = envelope.role;
        if !self.origin.serves(role) {
            return self.ignore(history, HandoffError::NotServed(role));
        }
        let token = match SessionToken::parse(&envelope.token) {
            Ok(token) if token.role() == role => token,
            Ok(token) => {
                let err = HandoffError::RoleMismatch {
                    claimed: token.role(),
                    declared: role,
                };
                return self.ignore(history, err);
            }
            Err(_) => return self.ignore(history, HandoffError::MalformedToken),
        };
        if let Err(err) = context.handoff_consumed(token) {
            return self.ignore(history, HandoffError::Store(err.to_string()));
        }

        let home = home_path(role);
        history.replace(history.resolve(home));
        info!(role = %role, home, "Consumed handoff");
        HandoffOutcome::Consumed { role, home }
    }

    fn ignore(&self, history: &mut BrowserHistory, err: HandoffError) -> HandoffOutcome {
        warn!(origin = ?self.origin, error = %err, "Ignoring handoff");
        history.replace(strip(history.current()));
        HandoffOutcome::Ignored(err)
    }
}
