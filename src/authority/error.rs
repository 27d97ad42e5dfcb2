use crate::token::TokenError;
use thiserror::Error;

/// Every failure the authority can report. Handlers turn these into the
/// uniform `{success:false, message}` body.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid credentials")]
    InvalidCredential,
    #[error("Malformed token")]
    MalformedToken,
    #[error("Token signature mismatch")]
    SignatureMismatch,
    #[error("Token role does not match this endpoint")]
    RoleMismatch,
    #[error("Subject not found")]
    SubjectNotFound,
    #[error("Invalid registration: {0}")]
    InvalidRegistration(String),
    #[error("An account with this email already exists")]
    SubjectExists,
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Errors that end the session of the slot that presented the token.
    #[must_use]
    pub const fn ends_session(&self) -> bool {
        matches!(
            self,
            Self::MalformedToken | Self::SignatureMismatch | Self::RoleMismatch | Self::SubjectNotFound
        )
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::SignatureMismatch => Self::SignatureMismatch,
            TokenError::Malformed | TokenError::UnknownRole(_) => Self::MalformedToken,
            TokenError::Signing => Self::Internal(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_errors_map_to_auth_errors() {
        assert_eq!(
            AuthError::from(TokenError::SignatureMismatch),
            AuthError::SignatureMismatch
        );
        assert_eq!(AuthError::from(TokenError::Malformed), AuthError::MalformedToken);
        assert!(matches!(
            AuthError::from(TokenError::Signing),
            AuthError::Internal(_)
        ));
    }

    #[test]
    fn only_token_failures_end_the_session() {
        assert!(AuthError::RoleMismatch.ends_session());
        assert!(AuthError::SubjectNotFound.ends_session());
        assert!(!AuthError::InvalidCredential.ends_session());
        assert!(!AuthError::SubjectExists.ends_session());
    }
}
