use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{post, put},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::jwt::AuthUser,
    error::ApiError,
    posts::dto::{
        CreatePostRequest, PostListItem, PostResponse, PostsListResponse, UpdatePostRequest,
    },
    posts::repo::Post,
    state::AppState,
};

pub fn post_routes() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create_post).get(list_posts))
        .route("/posts/:id", put(update_post).delete(delete_post))
}

#[instrument(skip(state, payload))]
pub async fn create_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<PostResponse>), ApiError> {
    if payload.title.is_empty() || payload.content.is_empty() {
        return Err(ApiError::Validation("Please provide all details".into()));
    }

    let post = Post::create(
        &state.db,
        auth.id,
        &payload.title,
        payload.image.as_deref(),
        &payload.content,
    )
    .await
    .map_err(|e| ApiError::internal("Error uploading post", e))?;

    info!(post_id = %post.id, author = %auth.id, "post created");
    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            message: "Post uploaded successfully".into(),
            post,
        }),
    ))
}

#[instrument(skip(state))]
pub async fn list_posts(
    State(state): State<AppState>,
) -> Result<Json<PostsListResponse>, ApiError> {
    let posts = Post::list_with_authors(&state.db)
        .await
        .map_err(|e| ApiError::internal("Error fetching posts", e))?
        .into_iter()
        .map(PostListItem::from)
        .collect();
    Ok(Json(PostsListResponse { posts }))
}

#[instrument(skip(state, payload))]
pub async fn update_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdatePostRequest>,
) -> Result<Json<PostResponse>, ApiError> {
    let post = Post::find_by_id(&state.db, id)
        .await
        .map_err(|e| ApiError::internal("Error updating post", e))?
        .ok_or_else(|| ApiError::NotFound("Unable to find the post".into()))?;

    if post.author != auth.id {
        return Err(ApiError::Forbidden("Not authorised to update the post".into()));
    }

    let updated = Post::update(
        &state.db,
        id,
        payload.title.as_deref(),
        payload.image.as_deref(),
        payload.content.as_deref(),
    )
    .await
    .map_err(|e| ApiError::internal("Error updating post", e))?;

    Ok(Json(PostResponse {
        message: "Post updated successfully".into(),
        post: updated,
    }))
}

#[instrument(skip(state))]
pub async fn delete_post(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<PostResponse>, ApiError> {
    let post = Post::find_by_id(&state.db, id)
        .await
        .map_err(|e| ApiError::internal("Error deleting the post", e))?
        .ok_or_else(|| ApiError::NotFound("Unable to find the post".into()))?;

    if post.author != auth.id {
        return Err(ApiError::Forbidden("Not authorised to delete the post".into()));
    }

    Post::delete(&state.db, id)
        .await
        .map_err(|e| ApiError::internal("Error deleting the post", e))?;

    info!(post_id = %post.id, author = %auth.id, "post deleted");
    Ok(Json(PostResponse {
        message: "Post deleted successfully".into(),
        post,
    }))
}
