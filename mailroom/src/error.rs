use std::fmt;

/// Classification shared by every failure the pipeline can report.
///
/// Per-item kinds (`NotFound` through `SendFailed`) end up on a
/// [`DispatchOutcome`](crate::dispatch::DispatchOutcome); `AuthFailed` aborts a
/// whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    ParseError,
    NoKeyExtracted,
    NoRecipientFound,
    PermissionDenied,
    SendFailed,
    AuthFailed,
}

impl ErrorKind {
    /// Kinds that turn an item into `Skipped` instead of `Failed`.
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            Self::NotFound | Self::ParseError | Self::NoKeyExtracted | Self::NoRecipientFound
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not found",
            Self::ParseError => "parse error",
            Self::NoKeyExtracted => "no key",
            Self::NoRecipientFound => "no recipient",
            Self::PermissionDenied => "permission denied",
            Self::SendFailed => "send failed",
            Self::AuthFailed => "authentication failed",
        };
        f.write_str(s)
    }
}

/// Setup errors: bad configuration or an unusable key pattern.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid key pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("missing required config: {0}")]
    MissingConfig(&'static str),

    #[error("identity provider setup failed: {0}")]
    Identity(#[from] crate::auth::AuthError),

    #[error("mail backend setup failed: {0}")]
    Mail(#[from] crate::mail::MailError),
}
