use tracing::{debug, info};

use crate::{
    auth::password::{hash_password, verify_password},
    auth::provider::{Provider, ProviderProfile},
    auth::repo::{NewUser, StoreError, User, UserStore, UserUpdate},
    error::ApiError,
};

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(field) => ApiError::Conflict(format!("{field} already exists")),
            StoreError::NotFound => ApiError::NotFound("User not found".into()),
            StoreError::Database(err) => ApiError::internal("Database error", err),
        }
    }
}

/// Create a local account. The caller has already checked field presence.
pub async fn register_local(
    store: &dyn UserStore,
    username: &str,
    name: &str,
    password: &str,
) -> Result<User, ApiError> {
    if store.find_by_username(username).await?.is_some() {
        return Err(ApiError::Conflict(
            "Username already exists. Please choose a different username.".into(),
        ));
    }

    let password_hash =
        hash_password(password).map_err(|e| ApiError::internal("Error registering user", e))?;

    let user = store
        .create(NewUser {
            username: Some(username.to_string()),
            name: name.to_string(),
            password_hash: Some(password_hash),
            ..Default::default()
        })
        .await?;

    info!(user_id = %user.id, username, "user registered");
    Ok(user)
}

/// Authenticate a local account by username and password.
pub async fn login_local(
    store: &dyn UserStore,
    username: &str,
    password: &str,
) -> Result<User, ApiError> {
    let user = store
        .find_by_username(username)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;

    // Federated-only accounts have no hash and can never pass a password check.
    let verified = match &user.password_hash {
        Some(hash) => verify_password(password, hash)
            .map_err(|e| ApiError::internal("Error logging in", e))?,
        None => false,
    };
    if !verified {
        return Err(ApiError::Unauthorized("Invalid password".into()));
    }

    info!(user_id = %user.id, username, "user logged in");
    Ok(user)
}

/// Resolve a provider identity assertion to exactly one user record.
///
/// 1. A user already carrying this `(provider, external_id)` wins as-is.
/// 2. Otherwise an email match links the provider id into the existing
///    account. The email is trusted as the linking key: a provider account
///    holding the address is attached without confirmation from the account
///    owner. Known tradeoff; changing it would strand existing linked
///    accounts.
/// 3. Otherwise a fresh user is created from the profile, with no password.
///
/// The three steps are not atomic; concurrent first logins for the same
/// identity can race, and the loser surfaces the store's Conflict error.
pub async fn federated_login(
    store: &dyn UserStore,
    provider: Provider,
    profile: ProviderProfile,
) -> Result<User, ApiError> {
    if let Some(user) = store
        .find_by_provider_id(provider, &profile.external_id)
        .await?
    {
        debug!(user_id = %user.id, %provider, "known provider identity");
        return Ok(user);
    }

    if let Some(email) = &profile.email {
        if let Some(user) = store.find_by_email(email).await? {
            let mut fields = UserUpdate {
                avatar_url: profile.avatar_url.clone(),
                ..Default::default()
            };
            match provider {
                Provider::Google => fields.google_id = Some(profile.external_id.clone()),
                Provider::Github => fields.github_id = Some(profile.external_id.clone()),
            }
            let linked = store.update(user.id, fields).await?;
            info!(user_id = %linked.id, %provider, "provider identity linked by email");
            return Ok(linked);
        }
    }

    let name = profile
        .display_name
        .clone()
        .or_else(|| profile.username.clone())
        .ok_or_else(|| ApiError::Validation("Provider profile has no display name".into()))?;

    let username = profile
        .username
        .clone()
        .or_else(|| {
            profile
                .email
                .as_deref()
                .and_then(|e| e.split('@').next())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("user_{}", profile.external_id));

    let mut new_user = NewUser {
        username: Some(username),
        name,
        email: profile.email,
        avatar_url: profile.avatar_url,
        ..Default::default()
    };
    match provider {
        Provider::Google => new_user.google_id = Some(profile.external_id),
        Provider::Github => new_user.github_id = Some(profile.external_id),
    }

    let user = store.create(new_user).await?;
    info!(user_id = %user.id, %provider, "user created from provider profile");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::memory::MemoryStore;

    fn profile(external_id: &str) -> ProviderProfile {
        ProviderProfile {
            external_id: external_id.into(),
            display_name: Some("Alice Example".into()),
            username: None,
            email: Some("alice@example.com".into()),
            avatar_url: Some("https://avatars.example/alice.png".into()),
        }
    }

    #[tokio::test]
    async fn register_then_login_succeeds() {
        let store = MemoryStore::new();
        let registered = register_local(&store, "alice", "Alice", "secret123")
            .await
            .expect("register");
        assert_eq!(registered.username.as_deref(), Some("alice"));
        assert!(registered.password_hash.is_some());

        let logged_in = login_local(&store, "alice", "secret123")
            .await
            .expect("login");
        assert_eq!(logged_in.id, registered.id);
    }

    #[tokio::test]
    async fn register_duplicate_username_conflicts() {
        let store = MemoryStore::new();
        register_local(&store, "alice", "Alice", "secret123")
            .await
            .expect("first register");
        let err = register_local(&store, "alice", "Someone Else", "other-pass")
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn login_with_wrong_password_is_unauthorized() {
        let store = MemoryStore::new();
        register_local(&store, "alice", "Alice", "secret123")
            .await
            .expect("register");
        let err = login_local(&store, "alice", "wrong").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn login_with_unknown_username_is_not_found() {
        let store = MemoryStore::new();
        let err = login_local(&store, "nobody", "whatever").await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn password_login_fails_for_federated_only_account() {
        let store = MemoryStore::new();
        let user = federated_login(&store, Provider::Github, ProviderProfile {
            username: Some("alice".into()),
            ..profile("gh-1")
        })
        .await
        .expect("federated login");
        assert!(user.password_hash.is_none());

        let err = login_local(&store, "alice", "anything").await.unwrap_err();
        assert!(matches!(err, ApiError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn federated_login_is_idempotent() {
        let store = MemoryStore::new();
        let first = federated_login(&store, Provider::Google, profile("g-1"))
            .await
            .expect("first login");
        let second = federated_login(&store, Provider::Google, profile("g-1"))
            .await
            .expect("second login");
        assert_eq!(first.id, second.id);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn known_identity_is_returned_without_field_updates() {
        let store = MemoryStore::new();
        let first = federated_login(&store, Provider::Google, profile("g-1"))
            .await
            .expect("first login");

        let mut changed = profile("g-1");
        changed.avatar_url = Some("https://avatars.example/new.png".into());
        let second = federated_login(&store, Provider::Google, changed)
            .await
            .expect("second login");
        assert_eq!(second.avatar_url, first.avatar_url);
    }

    #[tokio::test]
    async fn federated_login_links_to_local_account_by_email() {
        let store = MemoryStore::new();
        // Local registration records no email; seed a local account that
        // has one directly.
        let hash = crate::auth::password::hash_password("secret123").expect("hash");
        let local = store
            .create(NewUser {
                username: Some("alice".into()),
                name: "Alice".into(),
                email: Some("alice@example.com".into()),
                password_hash: Some(hash),
                ..Default::default()
            })
            .await
            .expect("seed local user");

        let linked = federated_login(&store, Provider::Github, ProviderProfile {
            username: Some("alice-gh".into()),
            ..profile("gh-9")
        })
        .await
        .expect("link");

        assert_eq!(linked.id, local.id);
        assert_eq!(store.len(), 1);
        assert!(linked.password_hash.is_some());
        assert_eq!(linked.github_id.as_deref(), Some("gh-9"));
        assert_eq!(linked.google_id, None);
        assert_eq!(
            linked.avatar_url.as_deref(),
            Some("https://avatars.example/alice.png")
        );
    }

    #[tokio::test]
    async fn linking_without_avatar_keeps_existing_one() {
        let store = MemoryStore::new();
        store
            .create(NewUser {
                username: Some("alice".into()),
                name: "Alice".into(),
                email: Some("alice@example.com".into()),
                password_hash: Some("hash".into()),
                avatar_url: Some("https://avatars.example/old.png".into()),
                ..Default::default()
            })
            .await
            .expect("seed");

        let mut p = profile("g-7");
        p.avatar_url = None;
        let linked = federated_login(&store, Provider::Google, p)
            .await
            .expect("link");
        assert_eq!(
            linked.avatar_url.as_deref(),
            Some("https://avatars.example/old.png")
        );
    }

    #[tokio::test]
    async fn new_user_prefers_provider_username() {
        let store = MemoryStore::new();
        let user = federated_login(&store, Provider::Github, ProviderProfile {
            username: Some("alice-gh".into()),
            ..profile("gh-1")
        })
        .await
        .expect("login");
        assert_eq!(user.username.as_deref(), Some("alice-gh"));
        assert_eq!(user.github_id.as_deref(), Some("gh-1"));
        assert!(user.password_hash.is_none());
    }

    #[tokio::test]
    async fn new_user_derives_username_from_email_local_part() {
        let store = MemoryStore::new();
        let user = federated_login(&store, Provider::Google, profile("g-1"))
            .await
            .expect("login");
        assert_eq!(user.username.as_deref(), Some("alice"));
        assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    }

    #[tokio::test]
    async fn new_user_falls_back_to_generated_username() {
        let store = MemoryStore::new();
        let mut p = profile("g-42");
        p.email = None;
        let user = federated_login(&store, Provider::Google, p)
            .await
            .expect("login");
        assert_eq!(user.username.as_deref(), Some("user_g-42"));
        assert_eq!(user.email, None);
    }

    #[tokio::test]
    async fn display_name_falls_back_to_provider_username() {
        let store = MemoryStore::new();
        let user = federated_login(&store, Provider::Github, ProviderProfile {
            display_name: None,
            username: Some("alice-gh".into()),
            ..profile("gh-1")
        })
        .await
        .expect("login");
        assert_eq!(user.name, "alice-gh");
    }

    #[tokio::test]
    async fn username_collision_on_create_surfaces_conflict() {
        let store = MemoryStore::new();
        register_local(&store, "alice", "Alice", "secret123")
            .await
            .expect("register");

        // Same email local part as the taken username, different address so
        // no account link happens.
        let mut p = profile("g-1");
        p.email = Some("alice@elsewhere.net".into());
        let err = federated_login(&store, Provider::Google, p).await.unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));
    }
}
