use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    /// Lifetime of tokens issued by password login.
    pub local_ttl_hours: i64,
    /// Lifetime of tokens issued at the OAuth callback. Deliberately longer
    /// than the local one; existing clients rely on federated sessions
    /// surviving the week.
    pub oauth_ttl_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthProviderConfig {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    /// Base URL this server is reachable at, used to build OAuth callback URLs.
    pub public_url: String,
    /// Frontend base URL the OAuth callback redirects back to.
    pub frontend_url: String,
    pub jwt: JwtConfig,
    pub google: OAuthProviderConfig,
    pub github: OAuthProviderConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL")?;
        let public_url =
            std::env::var("PUBLIC_URL").unwrap_or_else(|_| "http://localhost:8080".into());
        let frontend_url =
            std::env::var("FRONTEND_URL").unwrap_or_else(|_| "http://localhost:5173".into());
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET")?,
            local_ttl_hours: std::env::var("JWT_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(24),
            oauth_ttl_days: std::env::var("JWT_OAUTH_TTL_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(7),
        };
        let google = OAuthProviderConfig {
            client_id: std::env::var("GOOGLE_CLIENT_ID").context("GOOGLE_CLIENT_ID")?,
            client_secret: std::env::var("GOOGLE_CLIENT_SECRET").context("GOOGLE_CLIENT_SECRET")?,
        };
        let github = OAuthProviderConfig {
            client_id: std::env::var("GITHUB_CLIENT_ID").context("GITHUB_CLIENT_ID")?,
            client_secret: std::env::var("GITHUB_CLIENT_SECRET").context("GITHUB_CLIENT_SECRET")?,
        };
        Ok(Self {
            database_url,
            public_url,
            frontend_url,
            jwt,
            google,
            github,
        })
    }
}
