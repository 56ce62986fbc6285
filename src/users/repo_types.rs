use std::fmt;

use serde::Serialize;
use sqlx::FromRow;
use thiserror::Error;
use time::OffsetDateTime;

/// User record in the database.
///
/// `email` is stored trimmed and lower-cased in full (local part included),
/// so it can differ from the address the client submitted. `username` is
/// stored exactly as given.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: i64,                    // assigned by the store
    pub username: String,           // exact-match unique
    pub email: String,              // normalized, unique
    #[serde(skip_serializing)]
    pub password_hash: String,      // Argon2 PHC string, not exposed in JSON
    pub created_at: OffsetDateTime, // set once on insert
}

/// Fields supplied by the directory when inserting a record.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Column guarded by a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueField {
    Username,
    Email,
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::Username => f.write_str("username"),
            UniqueField::Email => f.write_str("email"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {0}")]
    UniqueViolation(UniqueField),
    #[error("store operation timed out")]
    Timeout,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}
