//! Authentication against the mail provider's identity platform.
//!
//! [`AuthenticatedSender`] owns the session state machine and sends mail through
//! the authenticated channel. Token acquisition is delegated to an
//! [`IdentityProvider`]; [`oauth::MicrosoftIdentity`] is the live implementation.

pub mod oauth;
pub mod session;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::context::Context;

pub use session::{AuthMode, AuthSession, AuthenticatedSender};

/// Seconds before the reported expiry at which a token is treated as stale.
const EXPIRY_SKEW_SECS: i64 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("OAuth2 error: {0}")]
    OAuth2(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("token cache error: {0}")]
    Cache(String),

    #[error("identity profile has no usable mail address")]
    NoAddress,
}

/// Bearer token for the mail provider.
///
/// Opaque in `Debug` output so it never leaks into logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    secret: String,
    /// Unix timestamp (seconds).
    expires_at: Option<i64>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: Option<OffsetDateTime>) -> Self {
        Self {
            secret: secret.into(),
            expires_at: expires_at.map(OffsetDateTime::unix_timestamp),
        }
    }

    /// Token valid for `secs` seconds from now.
    pub fn expiring_in(secret: impl Into<String>, secs: u64) -> Self {
        let expires_at = OffsetDateTime::now_utc() + time::Duration::seconds(secs as i64);
        Self::new(secret, Some(expires_at))
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires_at| {
            OffsetDateTime::now_utc().unix_timestamp() + EXPIRY_SKEW_SECS >= expires_at
        })
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Source of access tokens and the signed-in principal.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Acquire a token from cached credentials only. `Ok(None)` when nothing
    /// usable is cached. Must never prompt.
    async fn acquire_silent(&self, ctx: &Context) -> Result<Option<AccessToken>, AuthError>;

    /// Run one interactive sign-in.
    async fn acquire_interactive(&self, ctx: &Context) -> Result<AccessToken, AuthError>;

    /// Mail address of the account the token belongs to.
    async fn fetch_principal(&self, token: &AccessToken) -> Result<String, AuthError>;
}
