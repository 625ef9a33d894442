//! SendGrid mail transport.

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::MailConfig;
use crate::notify::{NotifyOutcome, Notifier, StatusChange, StatusMessage};

/// Sends status-change mail through the SendGrid v3 API.
#[derive(Clone)]
pub struct SendGridNotifier {
    client: reqwest::Client,
    endpoint: String,
    from: String,
    api_key: Option<String>,
}

impl SendGridNotifier {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        from: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            endpoint: format!("{}/v3/mail/send", base_url.trim_end_matches('/')),
            from: from.into(),
            api_key,
        }
    }

    /// Build from the `[mail]` section, reading the key from the environment.
    pub fn from_config(config: &MailConfig, client: reqwest::Client) -> Self {
        Self::new(client, &config.base_url, &config.from, config.api_key())
    }
}

#[derive(Serialize)]
struct MailRequest<'a> {
    personalizations: [Personalization<'a>; 1],
    from: Address<'a>,
    subject: &'a str,
    content: [Content<'a>; 2],
}

#[derive(Serialize)]
struct Personalization<'a> {
    to: [Address<'a>; 1],
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    value: &'a str,
}

fn mail_request<'a>(from: &'a str, to: &'a str, message: &'a StatusMessage) -> MailRequest<'a> {
    MailRequest {
        personalizations: [Personalization {
            to: [Address { email: to }],
        }],
        from: Address { email: from },
        subject: &message.subject,
        // SendGrid requires text/plain before text/html
        content: [
            Content {
                kind: "text/plain",
                value: &message.text,
            },
            Content {
                kind: "text/html",
                value: &message.html,
            },
        ],
    }
}

#[async_trait]
impl Notifier for SendGridNotifier {
    async fn notify(&self, recipient: &str, change: &StatusChange) -> Result<NotifyOutcome> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!(
                tracking_number = %change.tracking_number,
                "Mail API key not configured, skipping notification"
            );
            return Ok(NotifyOutcome::Skipped);
        };

        let message = StatusMessage::render(change);
        let response = self
            .client
            .post(&self.endpoint)
            .header(AUTHORIZATION, format!("Bearer {api_key}"))
            .json(&mail_request(&self.from, recipient, &message))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::notify(format!(
                "mail API returned {status}: {}",
                body.trim()
            )));
        }

        debug!(recipient, tracking_number = %change.tracking_number, "Notification sent");
        Ok(NotifyOutcome::Sent)
    }
}
