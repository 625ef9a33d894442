//! Owner notifications for shipment status changes.
//!
//! The reconciliation job hands every committed transition to a
//! [`Notifier`]. Delivery is best effort: a failed or skipped send never
//! rolls back the status write.

mod sendgrid;

use async_trait::async_trait;
use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::models::{Carrier, ShipmentStatus};
use crate::utils::escape_html;

pub use sendgrid::SendGridNotifier;

/// A committed status transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusChange {
    pub carrier: Carrier,
    pub tracking_number: String,
    pub previous: ShipmentStatus,
    pub current: ShipmentStatus,
}

/// Result of a delivery attempt that did not error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Sent,
    /// Transport not configured; nothing was sent
    Skipped,
}

/// Delivers status-change messages to shipment owners.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipient: &str, change: &StatusChange) -> Result<NotifyOutcome>;
}

/// Rendered notification content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub subject: String,
    pub html: String,
    pub text: String,
}

impl StatusMessage {
    pub fn render(change: &StatusChange) -> Self {
        let carrier = change.carrier.as_str().to_uppercase();
        let subject = format!("Shipment {} status update", change.tracking_number);

        let html = format!(
            "<h2>New status update</h2>\n\
             <p><strong>Carrier:</strong> {}</p>\n\
             <p><strong>Tracking number:</strong> {}</p>\n\
             <p><strong>Previous status:</strong> {}</p>\n\
             <p><strong>Current status:</strong> {}</p>\n\
             <p>You can view full details in the ShipTrack dashboard.</p>",
            escape_html(&carrier),
            escape_html(&change.tracking_number),
            escape_html(change.previous.as_str()),
            escape_html(change.current.as_str()),
        );

        let text = format!(
            "New status update\n\n\
             Carrier: {}\n\
             Tracking number: {}\n\
             Previous status: {}\n\
             Current status: {}\n\n\
             You can view full details in the ShipTrack dashboard.\n",
            carrier, change.tracking_number, change.previous, change.current,
        );

        Self {
            subject,
            html,
            text,
        }
    }
}

/// Notifier that only logs; used for dry runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, recipient: &str, change: &StatusChange) -> Result<NotifyOutcome> {
        info!(
            recipient,
            carrier = %change.carrier,
            tracking_number = %change.tracking_number,
            previous = %change.previous,
            current = %change.current,
            "Notification suppressed"
        );
        Ok(NotifyOutcome::Skipped)
    }
}
