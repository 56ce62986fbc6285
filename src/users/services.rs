use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::OnceCell;
use tracing::{error, info, instrument, warn};

use crate::auth::password::CredentialHasher;
use crate::error::DirectoryError;
use crate::users::repo::UserStore;
use crate::users::repo_types::{NewUser, StoreError, User};

pub const DEFAULT_SKIP: i64 = 0;
pub const DEFAULT_LIMIT: i64 = 100;

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);
const DUMMY_PASSWORD: &str = "dummy-password-for-unknown-users";

/// Lower-cases and trims an email so uniqueness is checked on one spelling.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Owns user records and the username/email uniqueness rules.
///
/// Every store call is bounded by the configured timeout. Dropping a
/// pending call (timeout or client disconnect) drops the store future,
/// which for the Postgres store rolls back the open transaction.
pub struct UserDirectory {
    store: Arc<dyn UserStore>,
    hasher: Arc<dyn CredentialHasher>,
    store_timeout: Duration,
    dummy_digest: OnceCell<String>,
}

impl UserDirectory {
    pub fn new(store: Arc<dyn UserStore>, hasher: Arc<dyn CredentialHasher>) -> Self {
        Self {
            store,
            hasher,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            dummy_digest: OnceCell::new(),
        }
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Register a new user.
    ///
    /// Lookups run first to report which identity field collides; the
    /// store's own unique constraint still decides races between
    /// concurrent registrations, and its violation maps to the same errors.
    #[instrument(skip(self, email, password))]
    pub async fn create(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, DirectoryError> {
        let email = normalize_email(email);

        if self.call(self.store.find_by_username(username)).await?.is_some() {
            warn!("username already registered");
            return Err(DirectoryError::DuplicateUsername);
        }
        if self.call(self.store.find_by_email(&email)).await?.is_some() {
            warn!(%email, "email already registered");
            return Err(DirectoryError::DuplicateEmail);
        }

        let password_hash = self.hash(password).await?;

        let new_user = NewUser {
            username: username.to_string(),
            email,
            password_hash,
        };
        let user = self
            .call(self.store.insert(new_user))
            .await
            .map_err(|e| {
                if let StoreError::UniqueViolation(field) = &e {
                    warn!(%field, "unique constraint rejected registration");
                }
                DirectoryError::from(e)
            })?;

        info!(user_id = user.id, username = %user.username, "user registered");
        Ok(user)
    }

    /// Check a username/password pair.
    ///
    /// Unknown usernames and wrong passwords yield the same error, and an
    /// unknown username still pays for one digest verification.
    #[instrument(skip(self, password))]
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<User, DirectoryError> {
        let Some(user) = self.call(self.store.find_by_username(username)).await? else {
            self.verify_dummy(password).await;
            warn!("login unknown username");
            return Err(DirectoryError::InvalidCredentials);
        };

        if !self.verify(password, &user.password_hash).await? {
            warn!(user_id = user.id, "login invalid password");
            return Err(DirectoryError::InvalidCredentials);
        }

        info!(user_id = user.id, "user logged in");
        Ok(user)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<User, DirectoryError> {
        self.call(self.store.find_by_id(id))
            .await?
            .ok_or(DirectoryError::NotFound)
    }

    pub async fn list(&self, skip: i64, limit: i64) -> Result<Vec<User>, DirectoryError> {
        let users = self
            .call(self.store.list_page(skip.max(0), limit.max(0)))
            .await?;
        Ok(users)
    }

    /// Hard delete. Returns whether a record existed.
    #[instrument(skip(self))]
    pub async fn delete(&self, id: i64) -> Result<bool, DirectoryError> {
        let removed = self.call(self.store.delete_by_id(id)).await?;
        if removed {
            info!(user_id = id, "user deleted");
        }
        Ok(removed)
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(res) => {
                if let Err(StoreError::Backend(e)) = &res {
                    error!(error = ?e, "store call failed");
                }
                res
            }
            Err(_) => {
                error!(timeout_ms = self.store_timeout.as_millis() as u64, "store call timed out");
                Err(StoreError::Timeout)
            }
        }
    }

    // Argon2 is CPU bound; keep it off the async workers.
    async fn hash(&self, password: &str) -> Result<String, DirectoryError> {
        let hasher = Arc::clone(&self.hasher);
        let plain = password.to_string();
        tokio::task::spawn_blocking(move || hasher.hash(&plain))
            .await
            .map_err(|e| anyhow!("hash task failed: {e}"))?
            .map_err(|e| DirectoryError::Internal(e.into()))
    }

    async fn verify(&self, password: &str, digest: &str) -> Result<bool, DirectoryError> {
        let hasher = Arc::clone(&self.hasher);
        let plain = password.to_string();
        let digest = digest.to_string();
        let ok = tokio::task::spawn_blocking(move || hasher.verify(&plain, &digest))
            .await
            .map_err(|e| anyhow!("verify task failed: {e}"))?;
        Ok(ok)
    }

    async fn verify_dummy(&self, password: &str) {
        let digest = self
            .dummy_digest
            .get_or_try_init(|| self.hash(DUMMY_PASSWORD))
            .await;
        match digest {
            Ok(digest) => {
                let _ = self.verify(password, digest).await;
            }
            Err(e) => warn!(error = %e, "could not prepare dummy digest"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::Argon2Hasher;
    use crate::config::HashingConfig;
    use crate::users::memory::InMemoryUserStore;
    use async_trait::async_trait;

    fn hasher() -> Arc<dyn CredentialHasher> {
        Arc::new(
            Argon2Hasher::new(&HashingConfig {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            })
            .expect("valid params"),
        )
    }

    fn directory_over(store: Arc<dyn UserStore>) -> UserDirectory {
        UserDirectory::new(store, hasher())
    }

    fn directory() -> UserDirectory {
        directory_over(Arc::new(InMemoryUserStore::new()))
    }

    #[tokio::test]
    async fn registration_and_login_scenario() {
        let dir = directory();

        let alice = dir.create("alice", "a@x.com", "longpassword1").await.unwrap();
        assert_eq!(alice.username, "alice");
        assert_eq!(alice.email, "a@x.com");
        assert_ne!(alice.password_hash, "longpassword1");

        let err = dir.create("alice", "b@x.com", "other pass").await.unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateUsername));

        let err = dir.create("bob", "a@x.com", "other pass").await.unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateEmail));

        let logged_in = dir.authenticate("alice", "longpassword1").await.unwrap();
        assert_eq!(logged_in.id, alice.id);
        assert_eq!(logged_in.email, "a@x.com");

        let err = dir.authenticate("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, DirectoryError::InvalidCredentials));

        let err = dir.get_by_id(9999).await.unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound));

        assert!(!dir.delete(9999).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_user_and_wrong_password_look_the_same() {
        let dir = directory();
        dir.create("carol", "c@x.com", "securepass123").await.unwrap();

        let unknown = dir.authenticate("nobody", "securepass123").await.unwrap_err();
        let wrong = dir.authenticate("carol", "not-her-password").await.unwrap_err();

        assert!(matches!(unknown, DirectoryError::InvalidCredentials));
        assert!(matches!(wrong, DirectoryError::InvalidCredentials));
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn email_is_normalized_before_uniqueness_check() {
        let dir = directory();
        let user = dir
            .create("dave", "  Dave@Example.COM ", "securepass123")
            .await
            .unwrap();
        assert_eq!(user.email, "dave@example.com");

        let err = dir
            .create("dave2", "dave@example.com", "securepass123")
            .await
            .unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateEmail));
    }

    #[tokio::test]
    async fn username_is_case_sensitive() {
        let dir = directory();
        dir.create("erin", "e1@x.com", "securepass123").await.unwrap();
        dir.create("Erin", "e2@x.com", "securepass123").await.unwrap();
        assert!(dir.authenticate("ERIN", "securepass123").await.is_err());
    }

    #[tokio::test]
    async fn delete_then_lookup() {
        let dir = directory();
        let user = dir.create("frank", "f@x.com", "securepass123").await.unwrap();

        assert_eq!(dir.get_by_id(user.id).await.unwrap().username, "frank");
        assert!(dir.delete(user.id).await.unwrap());
        assert!(matches!(
            dir.get_by_id(user.id).await.unwrap_err(),
            DirectoryError::NotFound
        ));
        assert!(dir.authenticate("frank", "securepass123").await.is_err());
    }

    #[tokio::test]
    async fn list_is_stable_and_paginated() {
        let dir = directory();
        for name in ["user1", "user2", "user3"] {
            dir.create(name, &format!("{name}@example.com"), "password123")
                .await
                .unwrap();
        }

        let all = dir.list(DEFAULT_SKIP, DEFAULT_LIMIT).await.unwrap();
        let again = dir.list(DEFAULT_SKIP, DEFAULT_LIMIT).await.unwrap();
        let ids: Vec<i64> = all.iter().map(|u| u.id).collect();
        assert_eq!(ids, again.iter().map(|u| u.id).collect::<Vec<_>>());
        assert_eq!(all.len(), 3);

        let page = dir.list(1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].username, "user2");

        assert!(dir.list(-5, -1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn concurrent_registrations_admit_one_winner() {
        let dir = directory();
        let (a, b) = tokio::join!(
            dir.create("grace", "g1@x.com", "securepass123"),
            dir.create("grace", "g2@x.com", "securepass123"),
        );
        let wins = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(wins, 1);
        let loser = if a.is_err() { a.unwrap_err() } else { b.unwrap_err() };
        assert!(matches!(loser, DirectoryError::DuplicateUsername));
    }

    /// Store whose lookups never see existing rows, as if a concurrent
    /// registration committed between the check and the insert.
    struct StaleReads(InMemoryUserStore);

    #[async_trait]
    impl UserStore for StaleReads {
        async fn find_by_username(&self, _: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn find_by_email(&self, _: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
            self.0.find_by_id(id).await
        }
        async fn list_page(&self, offset: i64, limit: i64) -> Result<Vec<User>, StoreError> {
            self.0.list_page(offset, limit).await
        }
        async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
            self.0.insert(user).await
        }
        async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError> {
            self.0.delete_by_id(id).await
        }
    }

    #[tokio::test]
    async fn store_constraint_backs_up_the_precheck() {
        let dir = directory_over(Arc::new(StaleReads(InMemoryUserStore::new())));
        dir.create("heidi", "h@x.com", "securepass123").await.unwrap();

        let err = dir.create("heidi", "h2@x.com", "securepass123").await.unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateUsername));

        let err = dir.create("ivan", "h@x.com", "securepass123").await.unwrap_err();
        assert!(matches!(err, DirectoryError::DuplicateEmail));
    }

    struct SlowStore;

    #[async_trait]
    impl UserStore for SlowStore {
        async fn find_by_username(&self, _: &str) -> Result<Option<User>, StoreError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(None)
        }
        async fn find_by_email(&self, _: &str) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn find_by_id(&self, _: i64) -> Result<Option<User>, StoreError> {
            Ok(None)
        }
        async fn list_page(&self, _: i64, _: i64) -> Result<Vec<User>, StoreError> {
            Err(StoreError::Backend(anyhow!("connection reset")))
        }
        async fn insert(&self, _: NewUser) -> Result<User, StoreError> {
            Err(StoreError::Backend(anyhow!("unreachable")))
        }
        async fn delete_by_id(&self, _: i64) -> Result<bool, StoreError> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn slow_store_times_out() {
        let dir = directory_over(Arc::new(SlowStore)).with_store_timeout(Duration::from_millis(20));

        let err = dir.create("judy", "j@x.com", "securepass123").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Timeout));

        let err = dir.authenticate("judy", "securepass123").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Timeout));
    }

    #[tokio::test]
    async fn backend_failures_are_internal() {
        let dir = directory_over(Arc::new(SlowStore));
        let err = dir.list(0, 10).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Internal(_)));
    }
}
