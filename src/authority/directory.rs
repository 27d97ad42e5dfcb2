//! Identity sources for the `doctor` and `user` slots.
//!
//! The admin is a single operator configured on the command line and never
//! lives here. Lookups are the only non-pure part of token validation: a
//! subject removed from the directory invalidates every token minted for it.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::Path,
    sync::{PoisonError, RwLock},
};
use tracing::info;
use uuid::Uuid;

use super::AuthError;
use crate::token::Role;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    pub role: Role,
    pub name: String,
    pub email: String,
    /// Argon2 PHC string.
    pub password_hash: String,
}

pub trait SubjectDirectory: Send + Sync {
    fn find_by_email(&self, role: Role, email: &str) -> Option<Subject>;
    fn find_by_id(&self, role: Role, id: &str) -> Option<Subject>;

    /// # Errors
    /// Returns [`AuthError::SubjectExists`] when the email is already taken for
    /// that role.
    fn insert(&self, subject: Subject) -> Result<(), AuthError>;

    /// Returns `true` if a subject was removed.
    fn remove(&self, role: Role, id: &str) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Trim and lowercase so lookups are case-insensitive.
#[must_use]
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Seed file layout accepted by `--directory`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub doctors: Vec<SeedEntry>,
    #[serde(default)]
    pub users: Vec<SeedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

impl SeedEntry {
    fn into_subject(self, role: Role) -> Subject {
        Subject {
            id: self.id.unwrap_or_else(|| Uuid::now_v7().to_string()),
            role,
            name: self.name,
            email: normalize_email(&self.email),
            password_hash: self.password_hash,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    subjects: RwLock<HashMap<(Role, String), Subject>>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from a parsed seed.
    ///
    /// # Errors
    /// Returns an error if the seed lists the same email twice for one role.
    pub fn from_seed(seed: DirectorySeed) -> Result<Self> {
        let directory = Self::new();
        let entries = seed
            .doctors
            .into_iter()
            .map(|entry| entry.into_subject(Role::Doctor))
            .chain(
                seed.users
                    .into_iter()
                    .map(|entry| entry.into_subject(Role::User)),
            );
        for subject in entries {
            let email = subject.email.clone();
            directory
                .insert(subject)
                .with_context(|| format!("Duplicate directory entry: {email}"))?;
        }
        Ok(directory)
    }

    /// Load a JSON seed file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read directory file: {}", path.display()))?;
        let seed: DirectorySeed = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid directory JSON: {}", path.display()))?;
        let directory = Self::from_seed(seed)?;
        info!(
            "Loaded {} subjects from {}",
            directory.len(),
            path.display()
        );
        Ok(directory)
    }
}

impl SubjectDirectory for InMemoryDirectory {
    fn find_by_email(&self, role: Role, email: &str) -> Option<Subject> {
        let email = normalize_email(email);
        let subjects = self.subjects.read().unwrap_or_else(PoisonError::into_inner);
        subjects
            .values()
            .find(|subject| subject.role == role && subject.email == email)
            .cloned()
    }

    fn find_by_id(&self, role: Role, id: &str) -> Option<Subject> {
        let subjects = self.subjects.read().unwrap_or_else(PoisonError::into_inner);
        subjects.get(&(role, id.to_string())).cloned()
    }

    fn insert(&self, mut subject: Subject) -> Result<(), AuthError> {
        subject.email = normalize_email(&subject.email);
        let mut subjects = self.subjects.write().unwrap_or_else(PoisonError::into_inner);
        let taken = subjects.values().any(|existing| {
            existing.role == subject.role
                && (existing.email == subject.email || existing.id == subject.id)
        });
        if taken {
            return Err(AuthError::SubjectExists);
        }
        subjects.insert((subject.role, subject.id.clone()), subject);
        Ok(())
    }

    fn remove(&self, role: Role, id: &str) -> bool {
        let mut subjects = self.subjects.write().unwrap_or_else(PoisonError::into_inner);
        subjects.remove(&(role, id.to_string())).is_some()
    }

    fn len(&self) -> usize {
        self.subjects
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn subject(role: Role, id: &str, email: &str) -> Subject {
        Subject {
            id: id.to_string(),
            role,
            name: "Test".to_string(),
            email: email.to_string(),
            password_hash: "$argon2id$v=19$m=19456,t=2,p=1$c2FsdA$aGFzaA".to_string(),
        }
    }

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Dr.Who@Clinic.ORG "), "dr.who@clinic.org");
    }

    #[test]
    fn lookups_are_scoped_by_role() -> Result<(), AuthError> {
        let directory = InMemoryDirectory::new();
        directory.insert(subject(Role::Doctor, "d1", "House@clinic.org"))?;

        assert!(directory
            .find_by_email(Role::Doctor, "house@clinic.org")
            .is_some());
        assert!(directory.find_by_email(Role::User, "house@clinic.org").is_none());
        assert!(directory.find_by_id(Role::Doctor, "d1").is_some());
        assert!(directory.find_by_id(Role::User, "d1").is_none());
        Ok(())
    }

    #[test]
    fn insert_rejects_duplicate_email() -> Result<(), AuthError> {
        let directory = InMemoryDirectory::new();
        directory.insert(subject(Role::User, "u1", "pat@example.com"))?;
        assert_eq!(
            directory.insert(subject(Role::User, "u2", "PAT@example.com")),
            Err(AuthError::SubjectExists)
        );
        // Same email under another role is a different identity.
        directory.insert(subject(Role::Doctor, "d1", "pat@example.com"))?;
        assert_eq!(directory.len(), 2);
        Ok(())
    }

    #[test]
    fn remove_subject() -> Result<(), AuthError> {
        let directory = InMemoryDirectory::new();
        directory.insert(subject(Role::Doctor, "d1", "a@b.c"))?;
        assert!(directory.remove(Role::Doctor, "d1"));
        assert!(!directory.remove(Role::Doctor, "d1"));
        assert!(directory.is_empty());
        Ok(())
    }

    #[test]
    fn from_file_reads_seed() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{
                "doctors": [{{"id": "doc-1", "name": "Dr. Grey", "email": "grey@clinic.org", "password_hash": "x"}}],
                "users": [{{"name": "Pat", "email": "Pat@Example.com", "password_hash": "y"}}]
            }}"#
        )?;

        let directory = InMemoryDirectory::from_file(file.path())?;
        assert_eq!(directory.len(), 2);
        assert!(directory.find_by_id(Role::Doctor, "doc-1").is_some());
        let user = directory.find_by_email(Role::User, "pat@example.com");
        assert!(user.is_some_and(|user| !user.id.is_empty()));
        Ok(())
    }

    #[test]
    fn from_seed_rejects_duplicates() {
        let entry = SeedEntry {
            id: None,
            name: "Twin".to_string(),
            email: "twin@example.com".to_string(),
            password_hash: "x".to_string(),
        };
        let seed = DirectorySeed {
            doctors: vec![entry.clone(), entry],
            users: Vec::new(),
        };
        assert!(InMemoryDirectory::from_seed(seed).is_err());
    }
}
