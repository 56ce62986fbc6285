use crate::auth::password::{Argon2Hasher, CredentialHasher};
use crate::config::AppConfig;
use crate::db;
use crate::users::memory::InMemoryUserStore;
use crate::users::repo::{PgUserStore, UserStore};
use crate::users::services::UserDirectory;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub directory: Arc<UserDirectory>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let store: Arc<dyn UserStore> = match config.database_url.as_deref() {
            Some(url) => {
                let pool = db::connect(&config, url).await?;
                info!("using postgres user store");
                Arc::new(PgUserStore::new(pool))
            }
            None => {
                warn!("DATABASE_URL not set; users are kept in memory and lost on restart");
                Arc::new(InMemoryUserStore::new())
            }
        };

        let hasher = Arc::new(Argon2Hasher::new(&config.hashing)?) as Arc<dyn CredentialHasher>;
        Ok(Self::from_parts(store, hasher, config))
    }

    pub fn from_parts(
        store: Arc<dyn UserStore>,
        hasher: Arc<dyn CredentialHasher>,
        config: Arc<AppConfig>,
    ) -> Self {
        let directory =
            Arc::new(UserDirectory::new(store, hasher).with_store_timeout(config.store_timeout));
        Self { directory, config }
    }

    /// In-memory state with cheap hashing, for tests.
    #[cfg(test)]
    pub fn fake() -> Self {
        use crate::config::HashingConfig;

        let mut config = AppConfig::from_lookup(|_| None).expect("default config");
        config.hashing = HashingConfig {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        };
        let hasher = Arc::new(Argon2Hasher::new(&config.hashing).expect("valid params"))
            as Arc<dyn CredentialHasher>;
        Self::from_parts(Arc::new(InMemoryUserStore::new()), hasher, Arc::new(config))
    }
}
