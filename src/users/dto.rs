use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::users::repo_types::User;
use crate::users::services::{DEFAULT_LIMIT, DEFAULT_SKIP};

pub const USERNAME_LEN: (usize, usize) = (3, 50);
pub const EMAIL_MAX_LEN: usize = 254;
pub const PASSWORD_LEN: (usize, usize) = (8, 100);

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Request body for user registration.
#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl CreateUserRequest {
    /// Shape checks only; uniqueness is the directory's job.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        let username_len = self.username.chars().count();
        if username_len < USERNAME_LEN.0 || username_len > USERNAME_LEN.1 {
            errors.push(format!(
                "username must be between {} and {} characters",
                USERNAME_LEN.0, USERNAME_LEN.1
            ));
        }

        let email = self.email.trim();
        if email.chars().count() > EMAIL_MAX_LEN {
            errors.push(format!("email must be at most {EMAIL_MAX_LEN} characters"));
        } else if !is_valid_email(email) {
            errors.push("email is not a valid email address".to_string());
        }

        let password_len = self.password.chars().count();
        if password_len < PASSWORD_LEN.0 || password_len > PASSWORD_LEN.1 {
            errors.push(format!(
                "password must be between {} and {} characters",
                PASSWORD_LEN.0, PASSWORD_LEN.1
            ));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Request body for login.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// Response returned after a successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub user_id: i64,
    pub username: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct UserView {
    pub id: i64,
    pub username: String,
    pub email: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<User> for UserView {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            username: u.username,
            email: u.email,
            created_at: u.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_skip")]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}
fn default_skip() -> i64 {
    DEFAULT_SKIP
}
fn default_limit() -> i64 {
    DEFAULT_LIMIT
}
