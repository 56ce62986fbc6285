use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::users::repo::UserStore;
use crate::users::repo_types::{NewUser, StoreError, UniqueField, User};

#[derive(Debug, Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    by_username: HashMap<String, i64>,
    by_email: HashMap<String, i64>,
}

/// Process-local store used when no database is configured, and in tests.
///
/// Records and both unique indexes live behind one lock, so the uniqueness
/// check and the insert are a single step. Ids are never reused.
#[derive(Debug, Default)]
pub struct InMemoryUserStore {
    tables: RwLock<Tables>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.by_username
            .get(username)
            .and_then(|id| t.users.get(id))
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.by_email.get(email).and_then(|id| t.users.get(id)).cloned())
    }

    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&id).cloned())
    }

    async fn list_page(&self, offset: i64, limit: i64) -> Result<Vec<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.users
            .values()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn insert(&self, user: NewUser) -> Result<User, StoreError> {
        let mut t = self.tables.write().await;

        if t.by_username.contains_key(&user.username) {
            return Err(StoreError::UniqueViolation(UniqueField::Username));
        }
        if t.by_email.contains_key(&user.email) {
            return Err(StoreError::UniqueViolation(UniqueField::Email));
        }

        t.next_id += 1;
        let id = t.next_id;
        let record = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        t.by_username.insert(record.username.clone(), id);
        t.by_email.insert(record.email.clone(), id);
        t.users.insert(id, record.clone());
        Ok(record)
    }

    async fn delete_by_id(&self, id: i64) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        match t.users.remove(&id) {
            Some(user) => {
                t.by_username.remove(&user.username);
                t.by_email.remove(&user.email);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
