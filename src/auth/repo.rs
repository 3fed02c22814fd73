use async_trait::async_trait;
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::provider::Provider;

/// User record. A row always carries either a password hash (local account)
/// or at least one provider id (federated account); the check constraint in
/// the schema enforces this at creation and no code path removes
/// credentials afterwards.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub username: Option<String>,
    pub name: String,
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub github_id: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub google_id: Option<String>,
    pub github_id: Option<String>,
    pub avatar_url: Option<String>,
}

/// Fields the resolver may change on an existing user. `None` leaves the
/// stored value untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub google_id: Option<String>,
    pub github_id: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Conflict(&'static str),
    #[error("user not found")]
    NotFound,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Persistence port for user records. Uniqueness of `username`, `email` and
/// the provider id slots is enforced among present values only; absent
/// values never collide.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_provider_id(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<User>, StoreError>;
    async fn create(&self, user: NewUser) -> Result<User, StoreError>;
    async fn update(&self, id: Uuid, fields: UserUpdate) -> Result<User, StoreError>;
}

const USER_COLUMNS: &str = "id, username, name, email, password_hash, google_id, github_id, \
                            avatar_url, created_at, updated_at";

pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Translate a unique-index violation into a Conflict naming the field.
fn map_store_error(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            let field = match db_err.constraint() {
                Some("users_username_idx") => "username",
                Some("users_email_idx") => "email",
                Some("users_google_id_idx") => "google account",
                Some("users_github_id_idx") => "github account",
                _ => "record",
            };
            return StoreError::Conflict(field);
        }
    }
    StoreError::Database(e)
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE email = $1"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_provider_id(
        &self,
        provider: Provider,
        external_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let sql = match provider {
            Provider::Google => format!("SELECT {USER_COLUMNS} FROM users WHERE google_id = $1"),
            Provider::Github => format!("SELECT {USER_COLUMNS} FROM users WHERE github_id = $1"),
        };
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(external_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let created = sqlx::query_as::<_, User>(&format!(
            r#"
            INSERT INTO users (username, name, email, password_hash, google_id, github_id, avatar_url)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(&user.username)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.google_id)
        .bind(&user.github_id)
        .bind(&user.avatar_url)
        .fetch_one(&self.db)
        .await
        .map_err(map_store_error)?;
        Ok(created)
    }

    async fn update(&self, id: Uuid, fields: UserUpdate) -> Result<User, StoreError> {
        let updated = sqlx::query_as::<_, User>(&format!(
            r#"
            UPDATE users
            SET google_id  = COALESCE($2, google_id),
                github_id  = COALESCE($3, github_id),
                avatar_url = COALESCE($4, avatar_url),
                updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&fields.google_id)
        .bind(&fields.github_id)
        .bind(&fields.avatar_url)
        .fetch_optional(&self.db)
        .await
        .map_err(map_store_error)?;
        updated.ok_or(StoreError::NotFound)
    }
}
