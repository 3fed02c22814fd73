use serde::Serialize;
use sqlx::{FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct Post {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub image: Option<String>,
    pub author: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Listing row with the author's public fields joined in.
#[derive(Debug, Clone, FromRow)]
pub struct PostWithAuthor {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub image: Option<String>,
    pub author: Uuid,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    pub author_username: Option<String>,
    pub author_name: String,
}

const POST_COLUMNS: &str = "id, title, content, image, author, created_at, updated_at";

impl Post {
    pub async fn find_by_id(db: &PgPool, id: Uuid) -> anyhow::Result<Option<Post>> {
        let post = sqlx::query_as::<_, Post>(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(db)
        .await?;
        Ok(post)
    }

    pub async fn create(
        db: &PgPool,
        author: Uuid,
        title: &str,
        image: Option<&str>,
        content: &str,
    ) -> anyhow::Result<Post> {
        let post = sqlx::query_as::<_, Post>(&format!(
            r#"
            INSERT INTO posts (title, image, content, author)
            VALUES ($1, $2, $3, $4)
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(title)
        .bind(image)
        .bind(content)
        .bind(author)
        .fetch_one(db)
        .await?;
        Ok(post)
    }

    /// Partial update; absent fields keep their stored value. The author
    /// column is never touched.
    pub async fn update(
        db: &PgPool,
        id: Uuid,
        title: Option<&str>,
        image: Option<&str>,
        content: Option<&str>,
    ) -> anyhow::Result<Post> {
        let post = sqlx::query_as::<_, Post>(&format!(
            r#"
            UPDATE posts
            SET title      = COALESCE($2, title),
                image      = COALESCE($3, image),
                content    = COALESCE($4, content),
                updated_at = now()
            WHERE id = $1
            RETURNING {POST_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(title)
        .bind(image)
        .bind(content)
        .fetch_one(db)
        .await?;
        Ok(post)
    }

    pub async fn delete(db: &PgPool, id: Uuid) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(db)
            .await?;
        Ok(())
    }

    pub async fn list_with_authors(db: &PgPool) -> anyhow::Result<Vec<PostWithAuthor>> {
        let rows = sqlx::query_as::<_, PostWithAuthor>(
            r#"
            SELECT p.id, p.title, p.content, p.image, p.author, p.created_at, p.updated_at,
                   u.username AS author_username, u.name AS author_name
            FROM posts p
            JOIN users u ON u.id = p.author
            ORDER BY p.created_at DESC
            "#,
        )
        .fetch_all(db)
        .await?;
        Ok(rows)
    }
}
