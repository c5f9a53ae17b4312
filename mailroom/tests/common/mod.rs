#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mailroom::auth::{AccessToken, AuthError, IdentityProvider};
use mailroom::mail::{Channel, Email, MailError, Mailer};
use mailroom::{Context, Dispatcher, MemorySink, Scanner};

pub const PRINCIPAL: &str = "billing@example.com";

/// Identity provider with a scripted outcome.
#[derive(Default)]
pub struct StubIdentity {
    pub cached: bool,
    pub interactive_ok: bool,
    pub silent_calls: AtomicUsize,
    pub interactive_calls: AtomicUsize,
}

impl StubIdentity {
    pub fn signed_in() -> Self {
        Self {
            cached: true,
            interactive_ok: true,
            ..Self::default()
        }
    }

    pub fn interactive_calls(&self) -> usize {
        self.interactive_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for StubIdentity {
    async fn acquire_silent(&self, _: &Context) -> Result<Option<AccessToken>, AuthError> {
        self.silent_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .cached
            .then(|| AccessToken::expiring_in("cached", 3600)))
    }

    async fn acquire_interactive(&self, _: &Context) -> Result<AccessToken, AuthError> {
        self.interactive_calls.fetch_add(1, Ordering::SeqCst);
        if self.interactive_ok {
            Ok(AccessToken::expiring_in("interactive", 3600))
        } else {
            Err(AuthError::OAuth2("access_denied".into()))
        }
    }

    async fn fetch_principal(&self, _: &AccessToken) -> Result<String, AuthError> {
        Ok(PRINCIPAL.into())
    }
}

/// Live backend double: records every message, refusing recipients listed in
/// `denied`.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    pub sent: Arc<Mutex<Vec<Email>>>,
    pub denied: Vec<String>,
}

impl RecordingMailer {
    pub fn denying(recipient: &str) -> Self {
        Self {
            denied: vec![recipient.to_string()],
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<Email> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, _: Channel<'_>, email: &Email) -> Result<(), MailError> {
        if email.to.iter().any(|to| self.denied.contains(to)) {
            return Err(MailError::PermissionDenied("ErrorAccessDenied".into()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub fn dispatcher(
    identity: StubIdentity,
    live: RecordingMailer,
) -> (Dispatcher<StubIdentity>, MemorySink) {
    let sink = MemorySink::new();
    let scanner = Scanner::new(r"INV\d+", true).unwrap();
    let dispatcher = Dispatcher::new(scanner, identity, live, Context::new(sink.clone()));
    (dispatcher, sink)
}

pub fn touch(dir: &Path, name: &str) {
    std::fs::write(dir.join(name), b"%PDF-1.4 test").unwrap();
}

pub fn recipients(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("recipients.csv");
    std::fs::write(&path, contents).unwrap();
    path
}
