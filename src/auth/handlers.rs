use axum::{
    extract::{FromRef, Query, State},
    http::StatusCode,
    response::Redirect,
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use crate::{
    auth::{
        dto::{
            LoginRequest, LoginResponse, LoginUser, MessageResponse, OAuthCallbackQuery,
            RegisterRequest, RegisterResponse,
        },
        jwt::{AuthUser, JwtKeys},
        provider::{self, Provider},
        repo::User,
        services,
    },
    error::ApiError,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/me", get(me))
        .route("/auth/logout", post(logout))
        .route("/auth/google", get(google_start))
        .route("/auth/google/callback", get(google_callback))
        .route("/auth/github", get(github_start))
        .route("/auth/github/callback", get(github_callback))
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    if payload.username.is_empty() || payload.name.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation("Please provide all details".into()));
    }

    let user = services::register_local(
        state.users.as_ref(),
        &payload.username,
        &payload.name,
        &payload.password,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "User registered successfully".into(),
            user,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    if payload.username.is_empty() || payload.password.is_empty() {
        return Err(ApiError::Validation("Please provide all details".into()));
    }

    let user =
        services::login_local(state.users.as_ref(), &payload.username, &payload.password).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys
        .issue(&user, None)
        .map_err(|e| ApiError::internal("Error logging in", e))?;

    Ok(Json(LoginResponse {
        message: "Logged in successfully".into(),
        token,
        user: LoginUser {
            id: user.id,
            username: user.username,
            name: user.name,
        },
    }))
}

#[instrument(skip(state))]
pub async fn me(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<User>, ApiError> {
    let user = state
        .users
        .find_by_id(auth.id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(user))
}

/// Tokens are stateless, so logout is an acknowledgement; the client drops
/// the token and the server keeps nothing to invalidate.
pub async fn logout() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "Logged out successfully".into(),
    })
}

pub async fn google_start(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    oauth_start(state, Provider::Google)
}

pub async fn github_start(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    oauth_start(state, Provider::Github)
}

pub async fn google_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Redirect, ApiError> {
    oauth_callback(state, Provider::Google, query).await
}

pub async fn github_callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthCallbackQuery>,
) -> Result<Redirect, ApiError> {
    oauth_callback(state, Provider::Github, query).await
}

fn oauth_start(state: AppState, provider: Provider) -> Result<Redirect, ApiError> {
    let url = provider::authorize_redirect(provider, &state.config)
        .map_err(|e| ApiError::internal("Error starting provider login", e))?;
    Ok(Redirect::temporary(&url))
}

#[instrument(skip(state, query))]
async fn oauth_callback(
    state: AppState,
    provider: Provider,
    query: OAuthCallbackQuery,
) -> Result<Redirect, ApiError> {
    let frontend = state.config.frontend_url.trim_end_matches('/').to_string();
    let failure = format!("{frontend}/auth");

    let code = match (query.code, query.error) {
        (Some(code), None) => code,
        (_, error) => {
            warn!(%provider, ?error, "provider denied or returned no code");
            return Ok(Redirect::temporary(&failure));
        }
    };

    let profile = match provider::exchange_and_fetch_profile(provider, &state.config, code).await {
        Ok(profile) => profile,
        Err(e) => {
            warn!(%provider, error = %e, "provider login failed");
            return Ok(Redirect::temporary(&failure));
        }
    };

    let user = services::federated_login(state.users.as_ref(), provider, profile).await?;

    let keys = JwtKeys::from_ref(&state);
    let token = keys
        .issue(&user, Some(provider))
        .map_err(|e| ApiError::internal("Error logging in", e))?;

    let mut user_json = serde_json::to_value(&user)
        .map_err(|e| ApiError::internal("Error logging in", e))?;
    user_json["provider"] = serde_json::Value::String(provider.as_str().to_string());

    let redirect = format!(
        "{frontend}/oauth-callback?token={token}&user={}&provider={provider}",
        urlencoding::encode(&user_json.to_string()),
    );
    Ok(Redirect::temporary(&redirect))
}
