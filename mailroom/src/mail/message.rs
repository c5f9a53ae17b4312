//! Email message types and builder.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{mime, MailError};

/// A file attached to an email, held fully in memory.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Read `path` into memory. A missing file is [`MailError::NotFound`].
    pub async fn from_path(path: &Path) -> Result<Self, MailError> {
        if !path.is_file() {
            return Err(MailError::NotFound(path.display().to_string()));
        }

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            MailError::send_failed(format!("reading {}: {e}", path.display()))
        })?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "attachment".to_string());

        Ok(Self {
            name,
            content_type: mime::content_type_for(path).to_string(),
            bytes,
        })
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// A complete email message ready to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    /// Primary recipients.
    pub to: Vec<String>,
    /// Email subject line.
    pub subject: String,
    /// Plain text body.
    pub body: String,
    /// Sender address.
    pub from: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl Email {
    /// Create a new email builder.
    pub fn builder() -> EmailBuilder {
        EmailBuilder::default()
    }
}

/// Builder for constructing [`Email`] instances.
#[derive(Debug, Default)]
pub struct EmailBuilder {
    to: Vec<String>,
    subject: Option<String>,
    text: Option<String>,
    from: Option<String>,
    attachments: Vec<Attachment>,
}

impl EmailBuilder {
    /// Add a primary recipient.
    pub fn to(mut self, address: impl Into<String>) -> Self {
        self.to.push(address.into());
        self
    }

    /// Set the subject line.
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    /// Set plain text body content.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Set the sender address (required).
    pub fn from(mut self, address: impl Into<String>) -> Self {
        self.from = Some(address.into());
        self
    }

    pub fn attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    /// Build the email, validating required fields.
    pub fn build(self) -> Result<Email, MailError> {
        if self.to.iter().all(|to| to.trim().is_empty()) {
            return Err(MailError::send_failed("at least one recipient required"));
        }

        let from = self
            .from
            .filter(|f| !f.trim().is_empty())
            .ok_or_else(|| MailError::send_failed("from address required"))?;

        let subject = self
            .subject
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| MailError::send_failed("subject required"))?;

        let body = self
            .text
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| MailError::send_failed("body required"))?;

        Ok(Email {
            to: self.to,
            subject,
            body,
            from,
            attachments: self.attachments,
        })
    }
}
