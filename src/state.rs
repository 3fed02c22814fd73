use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use crate::auth::repo::{PgUserStore, UserStore};
use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<AppConfig>,
    pub users: Arc<dyn UserStore>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        let users = Arc::new(PgUserStore::new(db.clone())) as Arc<dyn UserStore>;

        Ok(Self { db, config, users })
    }

    pub fn from_parts(db: PgPool, config: Arc<AppConfig>, users: Arc<dyn UserStore>) -> Self {
        Self { db, config, users }
    }
}
