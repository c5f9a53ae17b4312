//! Outgoing mail: message types and delivery backends.
//!
//! A [`Mailer`] performs exactly one transmission attempt per call. Two backends
//! implement it:
//!
//! - [`GraphMailer`] posts to the Microsoft Graph `sendMail` endpoint.
//! - [`SimulatedMailer`] records the message and reports success without any
//!   network traffic, for dry runs.
//!
//! Messages are normally sent through
//! [`AuthenticatedSender::send`](crate::auth::AuthenticatedSender::send), which
//! validates input and resolves the sender before handing the [`Email`] to a
//! backend.

mod mailer;
mod message;
pub mod mime;

pub use mailer::{Channel, GraphMailer, Mailer, SimulatedMailer};
pub use message::{Attachment, Email, EmailBuilder};

use thiserror::Error;

use crate::error::ErrorKind;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("attachment not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("send failed: {0}")]
    SendFailed(String),
}

impl MailError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::SendFailed(_) => ErrorKind::SendFailed,
        }
    }

    pub(crate) fn send_failed(message: impl Into<String>) -> Self {
        Self::SendFailed(message.into())
    }
}
