//! Batch invoice mailing.
//!
//! Scan a folder for invoice files, resolve each invoice's recipient from a
//! directory file, and mail the invoice as an attachment through an
//! authenticated Microsoft 365 account.

pub mod auth;
pub mod config;
pub mod context;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod mail;
pub mod scan;

pub use config::{AppConfig, EnvConfig};
pub use context::{Context, Level, LogSink, MemorySink, TracingSink};
pub use directory::RecipientDirectory;
pub use dispatch::{
    BatchResult, DispatchError, DispatchOutcome, Dispatcher, MessageTemplate, OutcomeStatus,
    RunMode, RunReport,
};
pub use error::{Error, ErrorKind};
pub use scan::{InvoiceCandidate, Scan, Scanner};
