use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::posts::repo::{Post, PostWithAuthor};

#[derive(Debug, Deserialize)]
pub struct CreatePostRequest {
    #[serde(default)]
    pub title: String,
    pub image: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub image: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub message: String,
    pub post: Post,
}

#[derive(Debug, Serialize)]
pub struct PostsListResponse {
    pub posts: Vec<PostListItem>,
}

#[derive(Debug, Serialize)]
pub struct PostListItem {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    pub image: Option<String>,
    pub author: PostAuthor,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, Serialize)]
pub struct PostAuthor {
    pub id: Uuid,
    pub username: Option<String>,
    pub name: String,
}

impl From<PostWithAuthor> for PostListItem {
    fn from(row: PostWithAuthor) -> Self {
        Self {
            id: row.id,
            title: row.title,
            content: row.content,
            image: row.image,
            author: PostAuthor {
                id: row.author,
                username: row.author_username,
                name: row.author_name,
            },
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
