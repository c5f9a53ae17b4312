//! Authenticated session and message sending.
//!
//! ```text
//! Unauthenticated ──authenticate──▶ Authenticating ──▶ Authenticated
//!        ▲                                 │
//!        └──── silent attempt, no token ───┤
//!                                          └──────────▶ Failed (terminal)
//! ```
//!
//! The sender address is resolved as: per-run override, then the session
//! override, then the signed-in principal.

use std::path::Path;

use lettre::Address;

use super::{AccessToken, IdentityProvider};
use crate::context::Context;
use crate::mail::{Attachment, Channel, Email, MailError, Mailer};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AuthMode {
    #[default]
    Unauthenticated,
    Authenticating,
    Authenticated,
    Failed,
}

#[derive(Debug, Clone, Default)]
pub struct AuthSession {
    pub principal_address: Option<String>,
    pub sender_override: Option<String>,
    pub run_override: Option<String>,
    pub mode: AuthMode,
    token: Option<AccessToken>,
}

/// Owns the session with the mail provider and sends single messages through
/// it.
pub struct AuthenticatedSender<P> {
    provider: P,
    session: AuthSession,
}

impl<P: IdentityProvider> AuthenticatedSender<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            session: AuthSession::default(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn session(&self) -> &AuthSession {
        &self.session
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.mode == AuthMode::Authenticated
    }

    /// Sign in.
    ///
    /// With `prefer_silent`, only cached credentials are tried and `false` is
    /// returned as soon as none work; the user is never prompted. Otherwise a
    /// single interactive sign-in is made, and its failure is terminal for
    /// this session.
    pub async fn authenticate(&mut self, prefer_silent: bool, ctx: &Context) -> bool {
        match self.session.mode {
            AuthMode::Authenticated => return true,
            AuthMode::Failed => {
                ctx.error("sign-in already failed for this session");
                return false;
            }
            AuthMode::Unauthenticated | AuthMode::Authenticating => {}
        }

        self.session.mode = AuthMode::Authenticating;

        let token = if prefer_silent {
            match self.provider.acquire_silent(ctx).await {
                Ok(Some(token)) => token,
                Ok(None) => {
                    ctx.warning("no cached credentials; silent sign-in unavailable");
                    self.session.mode = AuthMode::Unauthenticated;
                    return false;
                }
                Err(err) => {
                    ctx.warning(format!("silent sign-in failed: {err}"));
                    self.session.mode = AuthMode::Unauthenticated;
                    return false;
                }
            }
        } else {
            match self.provider.acquire_interactive(ctx).await {
                Ok(token) => token,
                Err(err) => {
                    ctx.error(format!("sign-in failed: {err}"));
                    self.session.mode = AuthMode::Failed;
                    return false;
                }
            }
        };

        match self.provider.fetch_principal(&token).await {
            Ok(principal) => {
                ctx.success(format!("signed in as {principal}"));
                self.session.principal_address = Some(principal);
                self.session.token = Some(token);
                self.session.mode = AuthMode::Authenticated;
                true
            }
            Err(err) => {
                ctx.error(format!("could not resolve the signed-in account: {err}"));
                self.session.mode = AuthMode::Failed;
                false
            }
        }
    }

    /// Session-wide sender, used unless a run supplies its own.
    pub fn set_sender_override(&mut self, address: impl Into<String>) {
        self.session.sender_override = Some(address.into());
    }

    /// Sender for the current run only; `None` clears it.
    pub fn set_run_override(&mut self, address: Option<String>) {
        self.session.run_override = address;
    }

    pub fn effective_sender(&self) -> Option<String> {
        let session = &self.session;
        session
            .run_override
            .as_ref()
            .or(session.sender_override.as_ref())
            .or(session.principal_address.as_ref())
            .cloned()
    }

    /// Send one message. Exactly one transmission attempt is made.
    ///
    /// An `attachment` that does not exist is not silently dropped: the call
    /// fails with [`MailError::NotFound`] and nothing is sent. The dispatcher
    /// records that as a skipped invoice.
    pub async fn send(
        &mut self,
        mailer: &dyn Mailer,
        recipient: &str,
        subject: &str,
        body: &str,
        attachment: Option<&Path>,
        ctx: &Context,
    ) -> Result<(), MailError> {
        let recipient = recipient.trim();
        if recipient.is_empty() || subject.trim().is_empty() || body.trim().is_empty() {
            return Err(MailError::send_failed(
                "recipient, subject and body are required",
            ));
        }
        if !self.is_authenticated() {
            return Err(MailError::send_failed("not authenticated"));
        }

        let sender = self
            .effective_sender()
            .ok_or_else(|| MailError::send_failed("no sender address"))?;
        for address in [recipient, sender.as_str()] {
            address.parse::<Address>().map_err(|e| {
                MailError::send_failed(format!("invalid address '{address}': {e}"))
            })?;
        }

        self.refresh_if_expired(ctx).await?;

        let mut builder = Email::builder()
            .from(&sender)
            .to(recipient)
            .subject(subject)
            .text(body);
        if let Some(path) = attachment {
            builder = builder.attachment(Attachment::from_path(path).await?);
        }
        let email = builder.build()?;

        let (Some(token), Some(principal)) =
            (&self.session.token, &self.session.principal_address)
        else {
            return Err(MailError::send_failed("not authenticated"));
        };
        mailer.send(Channel { token, principal }, &email).await
    }

    async fn refresh_if_expired(&mut self, ctx: &Context) -> Result<(), MailError> {
        if !self.session.token.as_ref().is_some_and(AccessToken::is_expired) {
            return Ok(());
        }

        ctx.info("access token expired, refreshing");
        match self.provider.acquire_silent(ctx).await {
            Ok(Some(token)) => {
                self.session.token = Some(token);
                Ok(())
            }
            Ok(None) => Err(MailError::send_failed(
                "session expired and no cached credentials remain",
            )),
            Err(err) => Err(MailError::send_failed(format!(
                "session expired and refresh failed: {err}"
            ))),
        }
    }
}
