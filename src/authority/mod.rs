//! Token Authority: authenticates credentials per role, issues signed session
//! tokens and validates them on every protected call. No session record is
//! kept; the only state consulted is the subject directory.

pub mod directory;
mod error;
pub mod password;

pub use directory::{InMemoryDirectory, Subject, SubjectDirectory};
pub use error::AuthError;

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::token::{self, Claims, Role};
use directory::normalize_email;

const MIN_PASSWORD_LENGTH: usize = 8;

/// Identifier and secret submitted for one role. Never persisted.
#[derive(Clone)]
pub struct Credential {
    pub email: String,
    pub password: SecretString,
}

impl Credential {
    #[must_use]
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: SecretString::from(password.into()),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Who a validated token speaks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Identity {
    pub role: Role,
    pub subject: String,
    pub issued_at: i64,
}

/// Account creation payload, for patient signup and doctor enrollment.
#[derive(Clone)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: SecretString,
}

/// The single operator allowed to hold the `admin` slot.
#[derive(Clone)]
pub struct Operator {
    email: String,
    password: SecretString,
}

impl Operator {
    #[must_use]
    pub fn new(email: &str, password: SecretString) -> Self {
        Self {
            email: normalize_email(email),
            password,
        }
    }

    fn matches(&self, credential: &Credential) -> bool {
        normalize_email(&credential.email) == self.email
            && credential.password.expose_secret() == self.password.expose_secret()
    }
}

impl fmt::Debug for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

pub struct TokenAuthority {
    secret: SecretString,
    operator: Operator,
    directory: Arc<dyn SubjectDirectory>,
}

impl fmt::Debug for TokenAuthority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenAuthority")
            .field("operator", &self.operator)
            .field("subjects", &self.directory.len())
            .finish_non_exhaustive()
    }
}

impl TokenAuthority {
    #[must_use]
    pub fn new(
        secret: SecretString,
        operator: Operator,
        directory: Arc<dyn SubjectDirectory>,
    ) -> Self {
        Self {
            secret,
            operator,
            directory,
        }
    }

    #[must_use]
    pub fn directory(&self) -> &Arc<dyn SubjectDirectory> {
        &self.directory
    }

    /// Check a credential against the role's identity source and issue a token.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidCredential`] for unknown identifiers and wrong
    /// secrets alike, so callers cannot tell which one failed.
    #[instrument(skip(self, credential), fields(role = %role))]
    pub fn authenticate(&self, role: Role, credential: &Credential) -> Result<String, AuthError> {
        if credential.email.trim().is_empty() || credential.password.expose_secret().is_empty() {
            return Err(AuthError::InvalidCredential);
        }

        let subject = match role {
            Role::Admin => {
                if !self.operator.matches(credential) {
                    debug!("Operator credential rejected");
                    return Err(AuthError::InvalidCredential);
                }
                self.operator.email.clone()
            }
            Role::Doctor | Role::User => {
                let Some(subject) = self.directory.find_by_email(role, &credential.email) else {
                    debug!("No subject for email");
                    return Err(AuthError::InvalidCredential);
                };
                if !password::verify_password(
                    credential.password.expose_secret(),
                    &subject.password_hash,
                ) {
                    debug!("Password rejected");
                    return Err(AuthError::InvalidCredential);
                }
                subject.id
            }
        };

        let token = self.issue(role, &subject)?;
        info!("Issued token");
        Ok(token)
    }

    /// Validate a presented token for an endpoint that requires `required`.
    ///
    /// # Errors
    /// Returns the first failing check: signature, role claim, then subject
    /// eligibility.
    #[instrument(skip(self, token), fields(required = %required))]
    pub fn validate(&self, token: &str, required: Role) -> Result<Identity, AuthError> {
        let claims = token::verify(token, self.secret.expose_secret().as_bytes())?;
        if claims.role != required {
            warn!(claimed = %claims.role, "Token presented to the wrong role");
            return Err(AuthError::RoleMismatch);
        }

        let eligible = match claims.role {
            Role::Admin => claims.sub == self.operator.email,
            Role::Doctor | Role::User => self.directory.find_by_id(claims.role, &claims.sub).is_some(),
        };
        if !eligible {
            warn!("Token subject is no longer eligible");
            return Err(AuthError::SubjectNotFound);
        }

        Ok(Identity {
            role: claims.role,
            subject: claims.sub,
            issued_at: claims.iat,
        })
    }

    /// Create a patient account and return a token for it.
    ///
    /// # Errors
    /// Returns [`AuthError::InvalidRegistration`] for missing or weak fields and
    /// [`AuthError::SubjectExists`] when the email is taken.
    #[instrument(skip(self, registration))]
    pub fn register_user(&self, registration: &Registration) -> Result<String, AuthError> {
        let id = self.enroll(Role::User, registration)?;
        info!(subject = %id, "Registered user");
        self.issue(Role::User, &id)
    }

    /// Enroll a clinician on behalf of the operator. No token is issued; the
    /// doctor logs in with the credential afterwards.
    ///
    /// # Errors
    /// Same as [`Self::register_user`].
    #[instrument(skip(self, registration))]
    pub fn add_doctor(&self, registration: &Registration) -> Result<String, AuthError> {
        let id = self.enroll(Role::Doctor, registration)?;
        info!(subject = %id, "Added doctor");
        Ok(id)
    }

    fn enroll(&self, role: Role, registration: &Registration) -> Result<String, AuthError> {
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(AuthError::InvalidRegistration("name is required".to_string()));
        }
        if !valid_email(&registration.email) {
            return Err(AuthError::InvalidRegistration(
                "please enter a valid email".to_string(),
            ));
        }
        if registration.password.expose_secret().len() < MIN_PASSWORD_LENGTH {
            return Err(AuthError::InvalidRegistration(
                "please enter a strong password".to_string(),
            ));
        }

        let subject = Subject {
            id: Uuid::now_v7().to_string(),
            role,
            name: name.to_string(),
            email: normalize_email(&registration.email),
            password_hash: password::hash_password(registration.password.expose_secret())?,
        };
        let id = subject.id.clone();
        self.directory.insert(subject)?;
        Ok(id)
    }

    fn issue(&self, role: Role, subject: &str) -> Result<String, AuthError> {
        let claims = Claims::new(role, subject, token::unix_now());
        Ok(token::sign(&claims, self.secret.expose_secret().as_bytes())?)
    }
}

/// Lightweight email sanity check used before creating subjects.
#[must_use]
pub fn valid_email(email: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|re| re.is_match(email.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "unit-test-secret";

    fn authority() -> Result<TokenAuthority, AuthError> {
        let directory = InMemoryDirectory::new();
        directory.insert(Subject {
            id: "doc-1".to_string(),
            role: Role::Doctor,
            name: "Dr. Grey".to_string(),
            email: "grey@clinic.org".to_string(),
            password_hash: password::hash_password("scalpel-123")?,
        })?;
        directory.insert(Subject {
            id: "pat-1".to_string(),
            role: Role::User,
            name: "Pat".to_string(),
            email: "pat@example.com".to_string(),
            password_hash: password::hash_password("patient-123")?,
        })?;
        Ok(TokenAuthority::new(
            SecretString::from(SECRET),
            Operator::new("ops@clinic.org", SecretString::from("operator-pw")),
            Arc::new(directory),
        ))
    }

    #[test]
    fn accepted_credentials_validate_to_matching_identity() -> Result<(), AuthError> {
        let authority = authority()?;
        let cases = [
            (Role::Admin, Credential::new("ops@clinic.org", "operator-pw"), "ops@clinic.org"),
            (Role::Doctor, Credential::new("Grey@Clinic.org", "scalpel-123"), "doc-1"),
            (Role::User, Credential::new("pat@example.com", "patient-123"), "pat-1"),
        ];
        for (role, credential, subject) in cases {
            let token = authority.authenticate(role, &credential)?;
            let identity = authority.validate(&token, role)?;
            assert_eq!(identity.role, role);
            assert_eq!(identity.subject, subject);
        }
        Ok(())
    }

    #[test]
    fn rejected_credentials_produce_no_token() -> Result<(), AuthError> {
        let authority = authority()?;
        let cases = [
            (Role::Admin, Credential::new("ops@clinic.org", "nope")),
            (Role::Admin, Credential::new("grey@clinic.org", "scalpel-123")),
            (Role::Doctor, Credential::new("grey@clinic.org", "wrong")),
            (Role::Doctor, Credential::new("pat@example.com", "patient-123")),
            (Role::User, Credential::new("", "")),
            (Role::User, Credential::new("ghost@example.com", "patient-123")),
        ];
        for (role, credential) in cases {
            assert_eq!(
                authority.authenticate(role, &credential),
                Err(AuthError::InvalidCredential),
                "{role} {credential:?}"
            );
        }
        Ok(())
    }

    #[test]
    fn validate_rejects_role_mismatch() -> Result<(), AuthError> {
        let authority = authority()?;
        let token = authority.authenticate(Role::Doctor, &Credential::new("grey@clinic.org", "scalpel-123"))?;
        assert_eq!(authority.validate(&token, Role::Admin), Err(AuthError::RoleMismatch));
        Ok(())
    }

    #[test]
    fn validate_rejects_foreign_signature_and_garbage() -> Result<(), AuthError> {
        let authority = authority()?;
        let forged = token::sign(&Claims::new(Role::Admin, "ops@clinic.org", 1), b"other-secret")
            .map_err(AuthError::from)?;
        assert_eq!(authority.validate(&forged, Role::Admin), Err(AuthError::SignatureMismatch));
        assert_eq!(authority.validate("garbage", Role::Admin), Err(AuthError::MalformedToken));
        Ok(())
    }

    #[test]
    fn validate_rejects_removed_subject() -> Result<(), AuthError> {
        let authority = authority()?;
        let token = authority.authenticate(Role::Doctor, &Credential::new("grey@clinic.org", "scalpel-123"))?;
        assert!(authority.directory().remove(Role::Doctor, "doc-1"));
        assert_eq!(authority.validate(&token, Role::Doctor), Err(AuthError::SubjectNotFound));
        Ok(())
    }

    #[test]
    fn register_user_issues_token() -> Result<(), AuthError> {
        let authority = authority()?;
        let registration = Registration {
            name: "New Patient".to_string(),
            email: "New@Example.com".to_string(),
            password: SecretString::from("long-enough"),
        };
        let token = authority.register_user(&registration)?;
        let identity = authority.validate(&token, Role::User)?;
        assert_eq!(identity.role, Role::User);

        assert_eq!(authority.register_user(&registration), Err(AuthError::SubjectExists));
        let login = authority.authenticate(Role::User, &Credential::new("new@example.com", "long-enough"));
        assert!(login.is_ok());
        Ok(())
    }

    #[test]
    fn register_user_validates_fields() -> Result<(), AuthError> {
        let authority = authority()?;
        let weak = Registration {
            name: "Pat".to_string(),
            email: "pat2@example.com".to_string(),
            password: SecretString::from("short"),
        };
        assert!(matches!(
            authority.register_user(&weak),
            Err(AuthError::InvalidRegistration(_))
        ));
        let bad_email = Registration {
            name: "Pat".to_string(),
            email: "not-an-email".to_string(),
            password: SecretString::from("long-enough"),
        };
        assert!(matches!(
            authority.register_user(&bad_email),
            Err(AuthError::InvalidRegistration(_))
        ));
        Ok(())
    }

    #[test]
    fn add_doctor_enrolls_without_issuing() -> Result<(), AuthError> {
        let authority = authority()?;
        let registration = Registration {
            name: "Dr. Shepherd".to_string(),
            email: "shepherd@clinic.org".to_string(),
            password: SecretString::from("neuro-surgeon"),
        };
        let id = authority.add_doctor(&registration)?;
        assert!(authority.directory().find_by_id(Role::Doctor, &id).is_some());
        assert_eq!(authority.add_doctor(&registration), Err(AuthError::SubjectExists));

        let token = authority.authenticate(
            Role::Doctor,
            &Credential::new("shepherd@clinic.org", "neuro-surgeon"),
        )?;
        assert_eq!(authority.validate(&token, Role::Doctor)?.subject, id);
        // Not a patient account.
        assert_eq!(
            authority.authenticate(Role::User, &Credential::new("shepherd@clinic.org", "neuro-surgeon")),
            Err(AuthError::InvalidCredential)
        );
        Ok(())
    }

    #[test]
    fn credential_debug_redacts_password() {
        let credential = Credential::new("a@b.c", "hunter2");
        assert!(!format!("{credential:?}").contains("hunter2"));
    }
}
