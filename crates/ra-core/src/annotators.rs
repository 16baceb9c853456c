//! Annotator accounts and password verification.

use chrono::{DateTime, Utc};
use ra_local_db::AnnotatorRecord;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::info;

use crate::clock::{from_db, from_db_opt, Clock};
use crate::db::DatabaseManager;
use crate::task::AnnotatorId;

const HASH_SCHEME: &str = "sha256";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Annotator {
    pub id: AnnotatorId,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<AnnotatorRecord> for Annotator {
    type Error = crate::Error;

    fn try_from(record: AnnotatorRecord) -> crate::Result<Self> {
        Ok(Self {
            id: AnnotatorId(record.id),
            username: record.username,
            password_hash: record.password_hash,
            last_heartbeat: from_db_opt(record.last_heartbeat.as_deref())?,
            created_at: from_db(&record.created_at)?,
        })
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Salted hash in the form `sha256$<salt>$<hex digest>`.
pub fn hash_password(password: &str) -> String {
    let salt = uuid::Uuid::new_v4().simple().to_string();
    format!("{}${}${}", HASH_SCHEME, salt, digest(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(HASH_SCHEME), Some(salt), Some(expected)) => digest(salt, password) == expected,
        _ => false,
    }
}

pub struct AnnotatorAccounts {
    db: DatabaseManager,
    clock: Arc<dyn Clock>,
}

impl AnnotatorAccounts {
    pub fn new(db: DatabaseManager, clock: Arc<dyn Clock>) -> Self {
        Self { db, clock }
    }

    pub fn create(&self, username: &str, password: &str) -> crate::Result<AnnotatorId> {
        let username = username.trim();
        if username.is_empty() {
            return Err(crate::Error::validation("Username must not be empty"));
        }
        if password.is_empty() {
            return Err(crate::Error::validation("Password must not be empty"));
        }

        let id = self
            .db
            .create_annotator(username, &hash_password(password), self.clock.now())?
            .ok_or_else(|| {
                crate::Error::validation(format!("Username '{}' is already taken", username))
            })?;
        info!(annotator_id = %id, username, "Annotator created");
        Ok(id)
    }

    /// Check a username and password pair.
    pub fn verify(&self, username: &str, password: &str) -> crate::Result<AnnotatorId> {
        let rejected = || crate::Error::Credentials {
            username: username.to_string(),
        };
        let annotator = self
            .db
            .annotator_by_username(username.trim())?
            .ok_or_else(rejected)?;
        if !verify_password(password, &annotator.password_hash) {
            return Err(rejected());
        }
        Ok(annotator.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_salted() {
        let a = hash_password("granite");
        let b = hash_password("granite");
        assert_ne!(a, b);
        assert!(verify_password("granite", &a));
        assert!(verify_password("granite", &b));
        assert!(!verify_password("basalt", &a));
    }

    #[test]
    fn unknown_hash_formats_never_verify() {
        assert!(!verify_password("granite", "granite"));
        assert!(!verify_password("", "md5$x$y"));
    }
}
