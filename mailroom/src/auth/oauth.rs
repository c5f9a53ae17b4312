//! Microsoft identity platform client
//!
//! Signs in with the OAuth2 device authorization grant, keeps the resulting
//! tokens in a JSON cache on disk, and refreshes them silently on later runs.
//! Built on the [`oauth2`](https://docs.rs/oauth2) crate.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mailroom::auth::oauth::MicrosoftIdentity;
//! use mailroom::auth::IdentityProvider;
//! use mailroom::Context;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let identity = MicrosoftIdentity::new(
//!         "client-id",
//!         "common",
//!         &["Mail.Send", "User.Read", "offline_access"],
//!         ".mailroom/token_cache.json",
//!         "https://graph.microsoft.com/v1.0",
//!     )?;
//!
//!     let ctx = Context::default();
//!     let token = match identity.acquire_silent(&ctx).await? {
//!         Some(token) => token,
//!         None => identity.acquire_interactive(&ctx).await?,
//!     };
//!     println!("User: {}", identity.fetch_principal(&token).await?);
//!
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::reqwest::async_http_client;
use oauth2::{
    AuthType, AuthUrl, ClientId, DeviceAuthorizationUrl, RefreshToken, Scope,
    StandardDeviceAuthorizationResponse, TokenResponse as OAuth2TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::io::AsyncWriteExt;

use super::{AccessToken, AuthError, IdentityProvider};
use crate::config::AppConfig;
use crate::context::Context;
use crate::error::Error;

const LOGIN_BASE: &str = "https://login.microsoftonline.com";

/// The cache holds a refresh token; only the owner may read it.
#[cfg(unix)]
const CACHE_FILE_MODE: u32 = 0o600;
#[cfg(unix)]
const CACHE_DIR_MODE: u32 = 0o700;

/// Tokens persisted between runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTokens {
    pub access_token: AccessToken,
    pub refresh_token: Option<String>,
}

/// JSON token cache on disk.
#[derive(Debug, Clone)]
pub struct TokenCache {
    path: PathBuf,
}

impl TokenCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// `Ok(None)` when no cache file exists yet.
    pub async fn load(&self) -> Result<Option<CachedTokens>, AuthError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(AuthError::Cache(format!("{}: {e}", self.path.display()))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| AuthError::Cache(format!("{}: {e}", self.path.display())))
    }

    pub async fn save(&self, tokens: &CachedTokens) -> Result<(), AuthError> {
        let cache_err = |e: std::io::Error| AuthError::Cache(format!("{}: {e}", self.path.display()));

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let mut dir = tokio::fs::DirBuilder::new();
            dir.recursive(true);
            #[cfg(unix)]
            dir.mode(CACHE_DIR_MODE);
            dir.create(parent).await.map_err(cache_err)?;
        }
        let json = serde_json::to_vec_pretty(tokens)
            .map_err(|e| AuthError::Cache(e.to_string()))?;

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(CACHE_FILE_MODE);
        let mut file = options.open(&self.path).await.map_err(cache_err)?;

        // `mode` only applies on creation; tighten a file left by an older run.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(CACHE_FILE_MODE);
            file.set_permissions(permissions).await.map_err(cache_err)?;
        }

        file.write_all(&json).await.map_err(cache_err)?;
        file.flush().await.map_err(cache_err)
    }
}

/// Microsoft identity platform client (public client, device code flow).
#[derive(Clone)]
pub struct MicrosoftIdentity {
    client: BasicClient,
    http_client: reqwest::Client,
    scopes: Vec<String>,
    cache: TokenCache,
    graph_base_url: String,
}

impl MicrosoftIdentity {
    pub fn new(
        client_id: &str,
        tenant: &str,
        scopes: &[&str],
        token_cache: impl Into<PathBuf>,
        graph_base_url: &str,
    ) -> Result<Self, AuthError> {
        let client = BasicClient::new(
            ClientId::new(client_id.to_string()),
            None,
            AuthUrl::new(format!("{LOGIN_BASE}/{tenant}/oauth2/v2.0/authorize"))?,
            Some(TokenUrl::new(format!(
                "{LOGIN_BASE}/{tenant}/oauth2/v2.0/token"
            ))?),
        )
        .set_auth_type(AuthType::RequestBody)
        .set_device_authorization_url(DeviceAuthorizationUrl::new(format!(
            "{LOGIN_BASE}/{tenant}/oauth2/v2.0/devicecode"
        ))?);

        Ok(Self {
            client,
            http_client: reqwest::Client::new(),
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            cache: TokenCache::new(token_cache),
            graph_base_url: graph_base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, Error> {
        let client_id = config
            .client_id
            .as_deref()
            .ok_or(Error::MissingConfig("client_id"))?;
        let scopes = config.scope_list();
        let scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();

        Ok(Self::new(
            client_id,
            &config.tenant,
            &scopes,
            config.token_cache.clone(),
            &config.graph_base_url,
        )?)
    }

    pub fn token_cache(&self) -> &TokenCache {
        &self.cache
    }

    fn scopes(&self) -> impl Iterator<Item = Scope> + '_ {
        self.scopes.iter().cloned().map(Scope::new)
    }

    /// Persist a token response, keeping the previous refresh token when the
    /// provider does not rotate it.
    async fn store(
        &self,
        response: &BasicTokenResponse,
        previous_refresh: Option<String>,
    ) -> Result<AccessToken, AuthError> {
        let expires_at = response
            .expires_in()
            .map(|d| OffsetDateTime::now_utc() + d);
        let access_token = AccessToken::new(response.access_token().secret().clone(), expires_at);
        let refresh_token = response
            .refresh_token()
            .map(|t| t.secret().clone())
            .or(previous_refresh);

        self.cache
            .save(&CachedTokens {
                access_token: access_token.clone(),
                refresh_token,
            })
            .await?;

        Ok(access_token)
    }
}

#[async_trait]
impl IdentityProvider for MicrosoftIdentity {
    async fn acquire_silent(&self, ctx: &Context) -> Result<Option<AccessToken>, AuthError> {
        let Some(cached) = self.cache.load().await? else {
            return Ok(None);
        };
        if !cached.access_token.is_expired() {
            return Ok(Some(cached.access_token));
        }
        let Some(refresh) = cached.refresh_token else {
            return Ok(None);
        };

        ctx.info("refreshing cached sign-in");
        let response = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh.clone()))
            .add_scopes(self.scopes())
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::OAuth2(e.to_string()))?;

        self.store(&response, Some(refresh)).await.map(Some)
    }

    async fn acquire_interactive(&self, ctx: &Context) -> Result<AccessToken, AuthError> {
        let details: StandardDeviceAuthorizationResponse = self
            .client
            .exchange_device_code()
            .map_err(|e| AuthError::OAuth2(e.to_string()))?
            .add_scopes(self.scopes())
            .request_async(async_http_client)
            .await
            .map_err(|e| AuthError::OAuth2(e.to_string()))?;

        ctx.info(format!(
            "To sign in, open {} and enter the code {}",
            details.verification_uri().as_str(),
            details.user_code().secret()
        ));

        let response = self
            .client
            .exchange_device_access_token(&details)
            .request_async(async_http_client, tokio::time::sleep, None)
            .await
            .map_err(|e| AuthError::OAuth2(e.to_string()))?;

        self.store(&response, None).await
    }

    async fn fetch_principal(&self, token: &AccessToken) -> Result<String, AuthError> {
        let profile = self
            .http_client
            .get(format!("{}/me", self.graph_base_url))
            .bearer_auth(token.secret())
            .send()
            .await?
            .error_for_status()?
            .json::<MicrosoftProfile>()
            .await?;

        profile.address().ok_or(AuthError::NoAddress)
    }
}

/// Microsoft user profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicrosoftProfile {
    pub id: String,
    #[serde(rename = "userPrincipalName")]
    pub user_principal_name: String,
    #[serde(rename = "displayName")]
    pub display_name: Option<String>,
    pub mail: Option<String>,
}

impl MicrosoftProfile {
    /// Primary mail address, falling back to the principal name.
    pub fn address(&self) -> Option<String> {
        self.mail
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .or(Some(self.user_principal_name.as_str()).filter(|u| u.contains('@')))
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(mail: Option<&str>, upn: &str) -> MicrosoftProfile {
        MicrosoftProfile {
            id: "1".into(),
            user_principal_name: upn.into(),
            display_name: None,
            mail: mail.map(Into::into),
        }
    }

    #[test]
    fn profile_prefers_mail_over_principal_name() {
        assert_eq!(
            profile(Some("billing@example.com"), "b@tenant.onmicrosoft.com").address().as_deref(),
            Some("billing@example.com")
        );
        assert_eq!(
            profile(None, "b@tenant.onmicrosoft.com").address().as_deref(),
            Some("b@tenant.onmicrosoft.com")
        );
        assert_eq!(profile(Some(""), "not-an-address").address(), None);
    }

    #[test]
    fn profile_parses_graph_json() {
        let json = r#"{"id":"42","userPrincipalName":"u@x.com","displayName":"U","mail":null}"#;
        let profile: MicrosoftProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.address().as_deref(), Some("u@x.com"));
    }

    #[tokio::test]
    async fn silent_without_cache_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let identity = MicrosoftIdentity::new(
            "client",
            "common",
            &["Mail.Send"],
            dir.path().join("tokens.json"),
            "https://graph.microsoft.com/v1.0",
        )
        .unwrap();

        let token = identity.acquire_silent(&Context::default()).await.unwrap();
        assert!(token.is_none());
    }

    #[tokio::test]
    async fn silent_uses_valid_cached_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("tokens.json");
        let cached = AccessToken::expiring_in("cached", 3600);
        TokenCache::new(&path)
            .save(&CachedTokens {
                access_token: cached.clone(),
                refresh_token: None,
            })
            .await
            .unwrap();

        let identity = MicrosoftIdentity::new(
            "client",
            "common",
            &["Mail.Send"],
            &path,
            "https://graph.microsoft.com/v1.0",
        )
        .unwrap();

        let token = identity.acquire_silent(&Context::default()).await.unwrap();
        assert_eq!(token, Some(cached));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cache_is_readable_by_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let cache_dir = dir.path().join(".mailroom");
        let path = cache_dir.join("token_cache.json");
        let tokens = CachedTokens {
            access_token: AccessToken::expiring_in("at", 3600),
            refresh_token: Some("rt".into()),
        };

        TokenCache::new(&path).save(&tokens).await.unwrap();

        let mode = |p: &Path| std::fs::metadata(p).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode(&path), 0o600);
        assert_eq!(mode(&cache_dir), 0o700);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn saving_tightens_an_existing_cache_file() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"{}").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        let cache = TokenCache::new(&path);
        cache
            .save(&CachedTokens {
                access_token: AccessToken::expiring_in("at", 3600),
                refresh_token: Some("rt".into()),
            })
            .await
            .unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        let cached = cache.load().await.unwrap().unwrap();
        assert_eq!(cached.refresh_token.as_deref(), Some("rt"));
    }

    #[tokio::test]
    async fn expired_token_without_refresh_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        TokenCache::new(&path)
            .save(&CachedTokens {
                access_token: AccessToken::expiring_in("old", 0),
                refresh_token: None,
            })
            .await
            .unwrap();

        let identity =
            MicrosoftIdentity::new("client", "common", &[], &path, "https://graph.microsoft.com")
                .unwrap();

        assert!(identity.acquire_silent(&Context::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_cache_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        std::fs::write(&path, b"{not json").unwrap();

        let err = TokenCache::new(&path).load().await.unwrap_err();
        assert!(matches!(err, AuthError::Cache(_)));
    }

    #[test]
    fn from_config_requires_client_id() {
        let err = MicrosoftIdentity::from_config(&AppConfig::default()).err().unwrap();
        assert!(matches!(err, Error::MissingConfig("client_id")));
    }
}
