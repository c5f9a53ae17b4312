//! Mailer trait, Microsoft Graph implementation and dry-run recorder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{Email, MailError};
use crate::auth::AccessToken;

/// Graph error codes that mean the application lacks mail permissions.
const PERMISSION_CODES: &[&str] = &[
    "ErrorAccessDenied",
    "Authorization_RequestDenied",
    "ErrorSendAsDenied",
    "AccessDenied",
];

const PERMISSION_HINT: &str = "grant the application the Mail.Send permission \
     (Mail.Send.Shared when sending as another mailbox) and sign in again";

const REAUTH_HINT: &str = "the access token was rejected; sign in again with `mailroom login`";

/// The authenticated channel a message is sent through.
#[derive(Debug, Clone, Copy)]
pub struct Channel<'a> {
    pub token: &'a AccessToken,
    /// Address of the signed-in account.
    pub principal: &'a str,
}

/// Async email sending trait.
///
/// Each call is exactly one transmission attempt; implementations never retry.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send an email.
    async fn send(&self, channel: Channel<'_>, email: &Email) -> Result<(), MailError>;
}

/// Microsoft Graph `sendMail` backend.
#[derive(Debug, Clone)]
pub struct GraphMailer {
    http_client: reqwest::Client,
    base_url: String,
}

impl GraphMailer {
    pub fn new(base_url: impl Into<String>) -> Result<Self, MailError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| MailError::send_failed(format!("building HTTP client: {e}")))?;

        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// `/me/sendMail` for the signed-in account, `/users/{from}/sendMail` when
    /// sending as another mailbox.
    fn endpoint(&self, channel: Channel<'_>, email: &Email) -> String {
        if email.from.eq_ignore_ascii_case(channel.principal) {
            format!("{}/me/sendMail", self.base_url)
        } else {
            let from: String = url::form_urlencoded::byte_serialize(email.from.as_bytes()).collect();
            format!("{}/users/{}/sendMail", self.base_url, from)
        }
    }
}

#[async_trait]
impl Mailer for GraphMailer {
    async fn send(&self, channel: Channel<'_>, email: &Email) -> Result<(), MailError> {
        let payload = SendMailRequest::from(email);

        let response = self
            .http_client
            .post(self.endpoint(channel, email))
            .bearer_auth(channel.token.secret())
            .json(&payload)
            .send()
            .await
            .map_err(|e| MailError::send_failed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_failure(status.as_u16(), &body))
    }
}

/// Map a failed Graph response onto the error taxonomy.
pub(crate) fn classify_failure(status: u16, body: &str) -> MailError {
    let error = serde_json::from_str::<GraphErrorResponse>(body)
        .ok()
        .map(|r| r.error);
    let code = error.as_ref().map(|e| e.code.as_str()).unwrap_or_default();
    let message = error
        .as_ref()
        .map(|e| e.message.clone())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.trim().to_string());

    if status == 403 || PERMISSION_CODES.contains(&code) {
        MailError::PermissionDenied(format!("{message} ({PERMISSION_HINT})"))
    } else if status == 401 {
        // InvalidAuthenticationToken and friends: a stale or revoked token.
        MailError::PermissionDenied(format!("{message} ({REAUTH_HINT})"))
    } else if code.is_empty() {
        MailError::send_failed(format!("HTTP {status}: {message}"))
    } else {
        MailError::send_failed(format!("HTTP {status} {code}: {message}"))
    }
}

/// Dry-run backend: records what would have been sent.
///
/// Clones share the same outbox.
#[derive(Debug, Clone, Default)]
pub struct SimulatedMailer {
    outbox: Arc<Mutex<Vec<Email>>>,
}

impl SimulatedMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages recorded so far, in send order.
    pub async fn sent(&self) -> Vec<Email> {
        self.outbox.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.outbox.lock().await.clear();
    }
}

#[async_trait]
impl Mailer for SimulatedMailer {
    async fn send(&self, _channel: Channel<'_>, email: &Email) -> Result<(), MailError> {
        tracing::info!(
            from = %email.from,
            to = %email.to.join(", "),
            subject = %email.subject,
            attachments = email.attachments.len(),
            "dry run: message not transmitted"
        );
        self.outbox.lock().await.push(email.clone());
        Ok(())
    }
}

//
// Graph wire types
//

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest<'a> {
    message: GraphMessage<'a>,
    save_to_sent_items: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphMessage<'a> {
    subject: &'a str,
    body: GraphBody<'a>,
    to_recipients: Vec<GraphRecipient<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    from: Option<GraphRecipient<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<GraphAttachment<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphBody<'a> {
    content_type: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphRecipient<'a> {
    email_address: GraphAddress<'a>,
}

#[derive(Serialize)]
struct GraphAddress<'a> {
    address: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GraphAttachment<'a> {
    #[serde(rename = "@odata.type")]
    odata_type: &'static str,
    name: &'a str,
    content_type: &'a str,
    content_bytes: String,
}

impl<'a> From<&'a Email> for SendMailRequest<'a> {
    fn from(email: &'a Email) -> Self {
        let recipient = |address: &'a String| GraphRecipient {
            email_address: GraphAddress { address },
        };

        SendMailRequest {
            message: GraphMessage {
                subject: &email.subject,
                body: GraphBody {
                    content_type: "Text",
                    content: &email.body,
                },
                to_recipients: email.to.iter().map(recipient).collect(),
                from: Some(recipient(&email.from)),
                attachments: email
                    .attachments
                    .iter()
                    .map(|a| GraphAttachment {
                        odata_type: "#microsoft.graph.fileAttachment",
                        name: &a.name,
                        content_type: &a.content_type,
                        content_bytes: BASE64_STANDARD.encode(&a.bytes),
                    })
                    .collect(),
            },
            save_to_sent_items: true,
        }
    }
}

#[derive(Deserialize)]
struct GraphErrorResponse {
    error: GraphError,
}

#[derive(Deserialize)]
struct GraphError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}
