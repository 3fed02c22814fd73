use std::time::Duration;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    Json,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{auth::provider::Provider, auth::repo::User, config::JwtConfig, state::AppState};

/// Stateless claim set carried by every bearer token. Not persisted; a
/// token dies by expiry and there is no revocation list.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: Uuid,
    /// Username, falling back to email for federated accounts without one.
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<Provider>,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    /// Password-login token lifetime (24 h by default).
    pub local_ttl: Duration,
    /// OAuth-callback token lifetime (7 d by default), longer than the
    /// local one. Clients rely on the asymmetry; do not unify.
    pub federated_ttl: Duration,
}

impl JwtKeys {
    pub fn new(config: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.secret.as_bytes()),
            local_ttl: Duration::from_secs((config.local_ttl_hours.max(0) as u64) * 3600),
            federated_ttl: Duration::from_secs((config.oauth_ttl_days.max(0) as u64) * 24 * 3600),
        }
    }

    /// Sign a token for `user`. Federated logins get the longer TTL.
    pub fn issue(&self, user: &User, provider: Option<Provider>) -> anyhow::Result<String> {
        let now = OffsetDateTime::now_utc();
        let ttl = if provider.is_some() {
            self.federated_ttl
        } else {
            self.local_ttl
        };
        let exp = now + TimeDuration::seconds(ttl.as_secs() as i64);
        let claims = Claims {
            sub: user.id,
            username: user
                .username
                .clone()
                .or_else(|| user.email.clone())
                .unwrap_or_default(),
            provider,
            iat: now.unix_timestamp() as usize,
            exp: exp.unix_timestamp() as usize,
        };
        let token = encode(&Header::default(), &claims, &self.encoding)?;
        debug!(user_id = %user.id, provider = ?provider, "jwt signed");
        Ok(token)
    }

    /// Check signature and expiry; any malformed, unsigned or expired token
    /// is rejected outright.
    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.leeway = 0;
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        JwtKeys::new(&state.config.jwt)
    }
}

/// Verified identity attached to a request by the bearer-token gate. Trusts
/// the token's embedded claims; the store is not consulted here.
#[derive(Debug)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
}

fn unauthorized(message: &str) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "message": message })),
    )
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtKeys: FromRef<S>,
{
    type Rejection = (StatusCode, Json<serde_json::Value>);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let keys = JwtKeys::from_ref(state);
        let auth_header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Access denied. Provide a token"))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("Access denied. Provide a token"))?;

        let claims = match keys.verify(token) {
            Ok(c) => c,
            Err(_) => {
                warn!("invalid or expired token");
                return Err(unauthorized("Invalid token provided"));
            }
        };

        Ok(AuthUser {
            id: claims.sub,
            username: claims.username,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_keys() -> JwtKeys {
        JwtKeys::new(&JwtConfig {
            secret: "test-secret".into(),
            local_ttl_hours: 24,
            oauth_ttl_days: 7,
        })
    }

    fn make_user(username: Option<&str>, email: Option<&str>) -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            username: username.map(Into::into),
            name: "Alice".into(),
            email: email.map(Into::into),
            password_hash: None,
            google_id: Some("g-1".into()),
            github_id: None,
            avatar_url: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn issue_and_verify_roundtrip() {
        let keys = make_keys();
        let user = make_user(Some("alice"), None);
        let token = keys.issue(&user, None).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.provider, None);
    }

    #[test]
    fn federated_token_carries_provider_tag() {
        let keys = make_keys();
        let user = make_user(Some("alice"), None);
        let token = keys.issue(&user, Some(Provider::Github)).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.provider, Some(Provider::Github));
    }

    #[test]
    fn username_falls_back_to_email() {
        let keys = make_keys();
        let user = make_user(None, Some("alice@example.com"));
        let token = keys.issue(&user, Some(Provider::Google)).expect("sign");
        let claims = keys.verify(&token).expect("verify");
        assert_eq!(claims.username, "alice@example.com");
    }

    #[test]
    fn federated_tokens_outlive_local_ones() {
        let keys = make_keys();
        let user = make_user(Some("alice"), None);
        let local = keys.verify(&keys.issue(&user, None).unwrap()).unwrap();
        let federated = keys
            .verify(&keys.issue(&user, Some(Provider::Google)).unwrap())
            .unwrap();
        assert_eq!(local.exp - local.iat, 24 * 3600);
        assert_eq!(federated.exp - federated.iat, 7 * 24 * 3600);
    }

    #[test]
    fn expired_token_is_rejected() {
        let keys = make_keys();
        let now = OffsetDateTime::now_utc().unix_timestamp();
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "alice".into(),
            provider: None,
            iat: (now - 7200) as usize,
            exp: (now - 3600) as usize,
        };
        let token = encode(&Header::default(), &claims, &keys.encoding).expect("sign");
        assert!(keys.verify(&token).is_err());
    }

    #[test]
    fn tampered_token_is_rejected() {
        let keys = make_keys();
        let other = JwtKeys::new(&JwtConfig {
            secret: "another-secret".into(),
            local_ttl_hours: 24,
            oauth_ttl_days: 7,
        });
        let user = make_user(Some("alice"), None);
        let token = other.issue(&user, None).expect("sign");
        assert!(keys.verify(&token).is_err());

        let mut forged = keys.issue(&user, None).expect("sign");
        forged.pop();
        assert!(keys.verify(&forged).is_err());
    }

    #[test]
    fn garbage_token_is_rejected() {
        let keys = make_keys();
        assert!(keys.verify("not-a-jwt").is_err());
    }
}
