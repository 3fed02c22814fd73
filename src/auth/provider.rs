use anyhow::Context;
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, RedirectUrl,
    Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{AppConfig, OAuthProviderConfig};

/// Supported federated identity providers. Each variant carries its own
/// endpoint set, scope list and callback path so the login algorithm stays
/// provider-agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Github,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Github => "github",
        }
    }

    pub fn authorize_url(&self) -> &'static str {
        match self {
            Provider::Google => "https://accounts.google.com/o/oauth2/v2/auth",
            Provider::Github => "https://github.com/login/oauth/authorize",
        }
    }

    pub fn token_url(&self) -> &'static str {
        match self {
            Provider::Google => "https://oauth2.googleapis.com/token",
            Provider::Github => "https://github.com/login/oauth/access_token",
        }
    }

    pub fn scopes(&self) -> &'static [&'static str] {
        match self {
            Provider::Google => &["profile", "email"],
            Provider::Github => &["user:email"],
        }
    }

    pub fn callback_path(&self) -> &'static str {
        match self {
            Provider::Google => "/auth/google/callback",
            Provider::Github => "/auth/github/callback",
        }
    }

    fn credentials<'a>(&self, config: &'a AppConfig) -> &'a OAuthProviderConfig {
        match self {
            Provider::Google => &config.google,
            Provider::Github => &config.github,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized identity assertion extracted from a provider's profile API.
#[derive(Debug, Clone)]
pub struct ProviderProfile {
    pub external_id: String,
    pub display_name: Option<String>,
    /// Provider-supplied handle; GitHub has one, Google does not.
    pub username: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

pub fn oauth_client(provider: Provider, config: &AppConfig) -> anyhow::Result<BasicClient> {
    let creds = provider.credentials(config);
    let redirect = format!(
        "{}{}",
        config.public_url.trim_end_matches('/'),
        provider.callback_path()
    );
    let client = BasicClient::new(
        ClientId::new(creds.client_id.clone()),
        Some(ClientSecret::new(creds.client_secret.clone())),
        AuthUrl::new(provider.authorize_url().to_string()).context("authorize endpoint URL")?,
        Some(TokenUrl::new(provider.token_url().to_string()).context("token endpoint URL")?),
    )
    .set_redirect_uri(RedirectUrl::new(redirect).context("redirect URL")?);
    Ok(client)
}

/// Build the consent-screen URL the browser is redirected to.
pub fn authorize_redirect(provider: Provider, config: &AppConfig) -> anyhow::Result<String> {
    let client = oauth_client(provider, config)?;
    let mut request = client.authorize_url(CsrfToken::new_random);
    for scope in provider.scopes() {
        request = request.add_scope(Scope::new((*scope).to_string()));
    }
    let (url, _csrf) = request.url();
    Ok(url.to_string())
}

/// Exchange the callback code for an access token and fetch the user's
/// profile from the provider's API.
pub async fn exchange_and_fetch_profile(
    provider: Provider,
    config: &AppConfig,
    code: String,
) -> anyhow::Result<ProviderProfile> {
    let client = oauth_client(provider, config)?;
    let token = client
        .exchange_code(AuthorizationCode::new(code))
        .request_async(oauth2::reqwest::async_http_client)
        .await
        .context("code exchange failed")?;
    let access_token = token.access_token().secret().clone();
    debug!(%provider, "code exchanged");
    fetch_profile(provider, &access_token).await
}

#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    id: String,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

async fn fetch_profile(provider: Provider, access_token: &str) -> anyhow::Result<ProviderProfile> {
    let http = reqwest::Client::new();
    match provider {
        Provider::Google => {
            let info: GoogleUserInfo = http
                .get("https://www.googleapis.com/oauth2/v2/userinfo")
                .bearer_auth(access_token)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .context("decode google userinfo")?;
            Ok(ProviderProfile {
                external_id: info.id,
                display_name: info.name,
                username: None,
                email: info.email,
                avatar_url: info.picture,
            })
        }
        Provider::Github => {
            let user: GithubUser = http
                .get("https://api.github.com/user")
                .bearer_auth(access_token)
                .header(reqwest::header::USER_AGENT, "socialable")
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .context("decode github user")?;

            // The profile email is often unset; the user:email scope lets us
            // read the primary address from the emails endpoint instead.
            let email = match user.email {
                Some(e) => Some(e),
                None => {
                    let emails: Vec<GithubEmail> = http
                        .get("https://api.github.com/user/emails")
                        .bearer_auth(access_token)
                        .header(reqwest::header::USER_AGENT, "socialable")
                        .send()
                        .await?
                        .error_for_status()?
                        .json()
                        .await
                        .context("decode github emails")?;
                    emails
                        .iter()
                        .find(|e| e.primary && e.verified)
                        .or_else(|| emails.first())
                        .map(|e| e.email.clone())
                }
            };

            Ok(ProviderProfile {
                external_id: user.id.to_string(),
                display_name: user.name,
                username: Some(user.login),
                email,
                avatar_url: user.avatar_url,
            })
        }
    }
}
