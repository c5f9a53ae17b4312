//! Batch dispatch of invoices.
//!
//! A [`Dispatcher`] ties the pipeline together: authenticate, load the
//! recipient directory, scan the folder, then send each invoice independently.
//! A failing item becomes a [`DispatchOutcome`] and never stops the batch; only
//! an authentication failure aborts a run.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::auth::oauth::MicrosoftIdentity;
use crate::auth::{AuthenticatedSender, IdentityProvider};
use crate::config::AppConfig;
use crate::context::Context;
use crate::directory::RecipientDirectory;
use crate::error::{Error, ErrorKind};
use crate::mail::{GraphMailer, Mailer, SimulatedMailer};
use crate::scan::{InvoiceCandidate, Scan, Scanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Resolve everything, transmit nothing.
    DryRun,
    RealSend,
}

impl RunMode {
    /// Dry runs never prompt for sign-in.
    fn prefers_silent_auth(self) -> bool {
        matches!(self, Self::DryRun)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DryRun => "dry run",
            Self::RealSend => "send",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Sent,
    Skipped,
    Failed,
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub key: String,
    pub path: PathBuf,
    pub recipient: Option<String>,
    pub status: OutcomeStatus,
    pub error: Option<ErrorKind>,
    pub detail: Option<String>,
}

impl DispatchOutcome {
    fn sent(candidate: &InvoiceCandidate, recipient: &str) -> Self {
        Self {
            key: candidate.key.clone(),
            path: candidate.path.clone(),
            recipient: Some(recipient.to_string()),
            status: OutcomeStatus::Sent,
            error: None,
            detail: None,
        }
    }

    fn unsent(
        candidate: &InvoiceCandidate,
        recipient: Option<&str>,
        kind: ErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            key: candidate.key.clone(),
            path: candidate.path.clone(),
            recipient: recipient.map(str::to_string),
            status: if kind.is_skip() {
                OutcomeStatus::Skipped
            } else {
                OutcomeStatus::Failed
            },
            error: Some(kind),
            detail: Some(detail.into()),
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Sent versus not sent. Skipped items count as failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchResult {
    pub sent: usize,
    pub failed: usize,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, outcome: &DispatchOutcome) {
        match outcome.status {
            OutcomeStatus::Sent => self.sent += 1,
            OutcomeStatus::Skipped | OutcomeStatus::Failed => self.failed += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub mode: RunMode,
    pub outcomes: Vec<DispatchOutcome>,
    pub result: BatchResult,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("authentication failed; no invoices were processed")]
    AuthFailed,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::AuthFailed => ErrorKind::AuthFailed,
        }
    }
}

/// Subject and body with `{key}` and `{file}` placeholders.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

impl MessageTemplate {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn render(&self, candidate: &InvoiceCandidate) -> (String, String) {
        let fill = |template: &str| {
            template
                .replace("{key}", &candidate.key)
                .replace("{file}", candidate.file_name())
        };
        (fill(&self.subject), fill(&self.body))
    }
}

impl Default for MessageTemplate {
    fn default() -> Self {
        let config = AppConfig::default();
        Self::new(config.subject_template, config.body_template)
    }
}

pub struct Dispatcher<P> {
    scanner: Scanner,
    sender: AuthenticatedSender<P>,
    live: Box<dyn Mailer>,
    simulated: SimulatedMailer,
    template: MessageTemplate,
    recipients_sheet: Option<String>,
    ctx: Context,
}

impl Dispatcher<MicrosoftIdentity> {
    /// Dispatcher wired to Microsoft identity and Graph.
    pub fn from_config(config: &AppConfig, ctx: Context) -> Result<Self, Error> {
        let scanner = Scanner::new(&config.key_pattern, config.case_insensitive)?;
        let identity = MicrosoftIdentity::from_config(config)?;
        let live = GraphMailer::new(config.graph_base_url.as_str())?;

        let mut dispatcher = Self::new(scanner, identity, live, ctx)
            .with_template(MessageTemplate::new(
                config.subject_template.as_str(),
                config.body_template.as_str(),
            ))
            .with_recipients_sheet(config.recipients_sheet.clone());
        if let Some(address) = &config.sender_address {
            dispatcher.sender.set_sender_override(address.as_str());
        }

        Ok(dispatcher)
    }
}

impl<P: IdentityProvider> Dispatcher<P> {
    pub fn new(scanner: Scanner, provider: P, live: impl Mailer + 'static, ctx: Context) -> Self {
        Self {
            scanner,
            sender: AuthenticatedSender::new(provider),
            live: Box::new(live),
            simulated: SimulatedMailer::new(),
            template: MessageTemplate::default(),
            recipients_sheet: None,
            ctx,
        }
    }

    pub fn with_template(mut self, template: MessageTemplate) -> Self {
        self.template = template;
        self
    }

    /// Worksheet to read when the recipient directory is a spreadsheet.
    pub fn with_recipients_sheet(mut self, sheet: Option<String>) -> Self {
        self.recipients_sheet = sheet;
        self
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn sender(&self) -> &AuthenticatedSender<P> {
        &self.sender
    }

    pub fn sender_mut(&mut self) -> &mut AuthenticatedSender<P> {
        &mut self.sender
    }

    /// Outbox of the dry-run backend.
    pub fn simulated(&self) -> &SimulatedMailer {
        &self.simulated
    }

    pub async fn authenticate(&mut self, prefer_silent: bool) -> bool {
        self.sender.authenticate(prefer_silent, &self.ctx).await
    }

    pub fn candidates(&self, folder: impl AsRef<Path>) -> Scan {
        self.scanner.scan(folder, &self.ctx)
    }

    pub fn load_directory(&self, recipients_path: impl AsRef<Path>) -> RecipientDirectory {
        RecipientDirectory::load_from_sheet(
            recipients_path,
            self.recipients_sheet.as_deref(),
            &self.ctx,
        )
    }

    /// Process every invoice in `folder`.
    ///
    /// Returns [`DispatchError::AuthFailed`] without touching any candidate
    /// when sign-in does not succeed. Every other failure is recorded on the
    /// item it concerns.
    pub async fn run(
        &mut self,
        mode: RunMode,
        folder: impl AsRef<Path>,
        recipients_path: impl AsRef<Path>,
        sender_override: Option<&str>,
    ) -> Result<RunReport, DispatchError> {
        let folder = folder.as_ref();
        tracing::debug!(%mode, folder = %folder.display(), "starting run");

        if !self.authenticate(mode.prefers_silent_auth()).await {
            self.ctx.error(format!("{mode} aborted: authentication failed"));
            return Err(DispatchError::AuthFailed);
        }
        self.sender.set_run_override(sender_override.map(str::to_string));

        let directory = self.load_directory(recipients_path);
        let scan = self.candidates(folder);
        if scan.folder_missing() {
            self.ctx
                .error(format!("invoice folder not found: {}", folder.display()));
        }

        let mailer: &dyn Mailer = match mode {
            RunMode::DryRun => &self.simulated,
            RunMode::RealSend => self.live.as_ref(),
        };

        let mut outcomes = Vec::new();
        let mut result = BatchResult::default();
        for candidate in &scan {
            let outcome = dispatch_one(
                &mut self.sender,
                mailer,
                &directory,
                &self.template,
                &candidate,
                &self.ctx,
            )
            .await;
            log_outcome(&self.ctx, mode, &outcome);
            result.record(&outcome);
            outcomes.push(outcome);
        }

        self.sender.set_run_override(None);

        let summary = format!(
            "{mode} finished: {} sent, {} failed",
            result.sent, result.failed
        );
        if result.is_success() {
            self.ctx.success(summary);
        } else {
            self.ctx.warning(summary);
        }

        Ok(RunReport {
            mode,
            outcomes,
            result,
        })
    }
}

async fn dispatch_one<P: IdentityProvider>(
    sender: &mut AuthenticatedSender<P>,
    mailer: &dyn Mailer,
    directory: &RecipientDirectory,
    template: &MessageTemplate,
    candidate: &InvoiceCandidate,
    ctx: &Context,
) -> DispatchOutcome {
    if candidate.key.trim().is_empty() {
        return DispatchOutcome::unsent(
            candidate,
            None,
            ErrorKind::NoKeyExtracted,
            "pattern matched an empty key",
        );
    }

    let Some(recipient) = directory.lookup(&candidate.key, ctx) else {
        return DispatchOutcome::unsent(
            candidate,
            None,
            ErrorKind::NoRecipientFound,
            format!("no recipient for {}", candidate.key),
        );
    };

    let (subject, body) = template.render(candidate);
    match sender
        .send(mailer, recipient, &subject, &body, Some(candidate.path.as_path()), ctx)
        .await
    {
        Ok(()) => DispatchOutcome::sent(candidate, recipient),
        Err(err) => DispatchOutcome::unsent(candidate, Some(recipient), err.kind(), err.to_string()),
    }
}

fn log_outcome(ctx: &Context, mode: RunMode, outcome: &DispatchOutcome) {
    let file = outcome.file_name();
    let detail = outcome.detail.as_deref().unwrap_or_default();
    match outcome.status {
        OutcomeStatus::Sent => {
            let recipient = outcome.recipient.as_deref().unwrap_or_default();
            match mode {
                RunMode::DryRun => ctx.success(format!("[dry run] {file} → {recipient}")),
                RunMode::RealSend => ctx.success(format!("sent {file} → {recipient}")),
            }
        }
        OutcomeStatus::Skipped => ctx.warning(format!("skipped {file}: {detail}")),
        OutcomeStatus::Failed => ctx.error(format!("failed {file}: {detail}")),
    }
}
