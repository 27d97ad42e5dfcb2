//! Session token format shared by the authority and the client half.
//!
//! A session token is an HS256 JWT whose claims bind the role slot, the
//! subject and the issued-at time. Tokens never expire; they die when a
//! client clears them or when the authority stops accepting them.

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use utoipa::ToSchema;

/// Identity category an origin can hold a session for.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
    Doctor,
}

impl Role {
    pub const ALL: [Self; 3] = [Self::User, Self::Admin, Self::Doctor];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Admin => "admin",
            Self::Doctor => "doctor",
        }
    }

    /// Durable storage key for this slot. Matches the keys the deployed
    /// frontends already write.
    #[must_use]
    pub const fn storage_key(self) -> &'static str {
        match self {
            Self::User => "token",
            Self::Admin => "aToken",
            Self::Doctor => "dToken",
        }
    }

    /// Request header carrying the bearer token on protected calls.
    #[must_use]
    pub const fn header_name(self) -> &'static str {
        match self {
            Self::User => "token",
            Self::Admin => "atoken",
            Self::Doctor => "dtoken",
        }
    }

    #[must_use]
    pub fn from_storage_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|role| role.storage_key() == key)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = TokenError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "user" => Ok(Self::User),
            "admin" => Ok(Self::Admin),
            "doctor" => Ok(Self::Doctor),
            other => Err(TokenError::UnknownRole(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    /// Unique per issuance, so two tokens minted in the same second differ.
    pub jti: String,
}

impl Claims {
    #[must_use]
    pub fn new(role: Role, subject: impl Into<String>, issued_at: i64) -> Self {
        Self {
            sub: subject.into(),
            role,
            iat: issued_at,
            jti: ulid::Ulid::new().to_string(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("malformed token")]
    Malformed,
    #[error("token signature mismatch")]
    SignatureMismatch,
    #[error("unknown role: {0}")]
    UnknownRole(String),
    #[error("failed to sign token")]
    Signing,
}

/// Sign claims with the authority secret.
///
/// # Errors
/// Returns [`TokenError::Signing`] if the claims cannot be encoded.
pub fn sign(claims: &Claims, secret: &[u8]) -> Result<String, TokenError> {
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|_| TokenError::Signing)
}

/// Verify the signature and decode the claims.
///
/// # Errors
/// Returns [`TokenError::SignatureMismatch`] when the token was signed with
/// another secret and [`TokenError::Malformed`] for anything that is not a
/// well-formed HS256 token.
pub fn verify(token: &str, secret: &[u8]) -> Result<Claims, TokenError> {
    decode::<Claims>(token, &DecodingKey::from_secret(secret), &validation())
        .map(|data| data.claims)
        .map_err(|err| match err.kind() {
            ErrorKind::InvalidSignature => TokenError::SignatureMismatch,
            _ => TokenError::Malformed,
        })
}

/// Decode the claims without checking the signature.
///
/// Clients do not hold the secret; they only need the role and issued-at to
/// place a token in the right slot. Trust is established by the authority on
/// the first protected call.
///
/// # Errors
/// Returns [`TokenError::Malformed`] if the token is not a decodable JWT.
pub fn peek(token: &str) -> Result<Claims, TokenError> {
    let mut validation = validation();
    validation.insecure_disable_signature_validation();
    decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(|_| TokenError::Malformed)
}

fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_exp = false;
    validation
}

/// Seconds since the unix epoch, saturating to zero on a clock before 1970.
#[must_use]
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn sign_and_verify() -> Result<(), TokenError> {
        let claims = Claims::new(Role::Doctor, "doc-1", 1_700_000_000);
        let token = sign(&claims, SECRET)?;
        assert_eq!(verify(&token, SECRET)?, claims);
        Ok(())
    }

    #[test]
    fn verify_rejects_other_secret() -> Result<(), TokenError> {
        let token = sign(&Claims::new(Role::Admin, "ops", 1), SECRET)?;
        assert_eq!(verify(&token, b"other"), Err(TokenError::SignatureMismatch));
        Ok(())
    }

    #[test]
    fn verify_rejects_garbage() {
        assert_eq!(verify("not-a-token", SECRET), Err(TokenError::Malformed));
        assert_eq!(verify("", SECRET), Err(TokenError::Malformed));
    }

    #[test]
    fn peek_reads_claims_without_secret() -> Result<(), TokenError> {
        let claims = Claims::new(Role::User, "patient-7", 42);
        let token = sign(&claims, SECRET)?;
        assert_eq!(peek(&token)?, claims);
        assert_eq!(peek("a.b"), Err(TokenError::Malformed));
        Ok(())
    }

    #[test]
    fn claims_have_distinct_ids() {
        let a = Claims::new(Role::User, "same", 10);
        let b = Claims::new(Role::User, "same", 10);
        assert_ne!(a.jti, b.jti);
    }

    #[test]
    fn role_names_and_keys() {
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
            assert_eq!(Role::from_storage_key(role.storage_key()), Some(role));
        }
        assert_eq!(Role::Admin.storage_key(), "aToken");
        assert_eq!(Role::Doctor.header_name(), "dtoken");
        assert!("nurse".parse::<Role>().is_err());
    }
}
