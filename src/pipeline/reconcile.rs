//! Periodic reconciliation of active shipments against carrier APIs.
//!
//! One run lists every non-archived shipment, asks the carrier for its
//! current state, writes only what changed, and notifies the owner of
//! status transitions. Shipments are handled independently: one
//! shipment's failure, panics included, is logged and counted, never
//! propagated.
//!
//! Per-shipment write order:
//! 1. new events (keyed by event id, so replays converge)
//! 2. status patch, which is the commit point of a transition
//! 3. owner notification, best effort
//!
//! A failed event write stops before the status patch, so the transition
//! is detected again on the next run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::carriers::CarrierRegistry;
use crate::error::{AppError, Result};
use crate::models::{
    Config, Shipment, ShipmentPatch, ShipmentStatus, StatusSnapshot, TrackerConfig,
};
use crate::notify::{LogNotifier, Notifier, NotifyOutcome, SendGridNotifier, StatusChange};
use crate::pipeline::merge::events_to_write;
use crate::storage::ShipmentStore;
use crate::utils::http::create_async_client;

/// Tuning for a reconciliation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOptions {
    /// Shipments reconciled at once
    pub max_concurrent: usize,
    /// Deadline for one carrier call
    pub timeout_secs: u64,
    /// Skip status writes that move backwards along the happy path
    pub reject_regressions: bool,
}

impl ReconcileOptions {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent,
            timeout_secs: config.timeout_secs,
            reject_regressions: config.reject_regressions,
        }
    }
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

/// Counters for one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Active shipments examined
    pub processed: usize,
    /// Shipments with at least one write
    pub updated: usize,
    /// Shipments whose carrier call or writes failed
    pub failed: usize,
    /// Shipments with no adapter or no carrier credential
    pub skipped: usize,
    /// Stored records that could not be decoded, never reconciled
    pub unreadable: usize,
    /// Committed status transitions
    pub transitions: usize,
    pub events_written: usize,
    pub notified: usize,
    pub notify_failures: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            processed: 0,
            updated: 0,
            failed: 0,
            skipped: 0,
            unreadable: 0,
            transitions: 0,
            events_written: 0,
            notified: 0,
            notify_failures: 0,
            started_at,
            finished_at: started_at,
        }
    }

    fn record(&mut self, outcome: ShipmentOutcome) {
        match outcome {
            ShipmentOutcome::Unchanged => {}
            ShipmentOutcome::Skipped => self.skipped += 1,
            ShipmentOutcome::Failed => self.failed += 1,
            ShipmentOutcome::Updated {
                transition,
                events_written,
                notification,
            } => {
                self.updated += 1;
                self.events_written += events_written;
                if transition {
                    self.transitions += 1;
                }
                match notification {
                    Notification::Sent => self.notified += 1,
                    Notification::Failed => self.notify_failures += 1,
                    Notification::NotAttempted | Notification::Skipped => {}
                }
            }
        }
    }

    /// Wall-clock duration of the run.
    pub fn elapsed(&self) -> chrono::Duration {
        self.finished_at - self.started_at
    }
}

/// What happened to one shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShipmentOutcome {
    Unchanged,
    Skipped,
    Failed,
    Updated {
        transition: bool,
        events_written: usize,
        notification: Notification,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Notification {
    NotAttempted,
    Sent,
    Skipped,
    Failed,
}

/// Runs reconciliation over a shipment store.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ShipmentStore>,
    registry: Arc<CarrierRegistry>,
    notifier: Arc<dyn Notifier>,
    options: ReconcileOptions,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ShipmentStore>,
        registry: Arc<CarrierRegistry>,
        notifier: Arc<dyn Notifier>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            options,
        }
    }

    /// Wire the HTTP adapters and notifier described by `config` onto a store.
    ///
    /// With `send_notifications = false` transitions are only logged.
    pub fn from_config(
        config: &Config,
        store: Arc<dyn ShipmentStore>,
        send_notifications: bool,
    ) -> Result<Self> {
        let client = create_async_client(&config.tracker)?;
        let registry = CarrierRegistry::from_config(config, client.clone());
        let notifier: Arc<dyn Notifier> = if send_notifications {
            Arc::new(SendGridNotifier::from_config(&config.mail, client))
        } else {
            Arc::new(LogNotifier)
        };

        Ok(Self::new(
            store,
            Arc::new(registry),
            notifier,
            ReconcileOptions::from_config(&config.tracker),
        ))
    }

    pub fn store(&self) -> &Arc<dyn ShipmentStore> {
        &self.store
    }

    /// Reconcile every active shipment once.
    ///
    /// Fails only when the active set cannot be listed.
    pub async fn run(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::new(Utc::now());

        let active = self.store.list_active().await?;
        summary.processed = active.shipments.len();
        summary.unreadable = active.unreadable.len();
        if !active.unreadable.is_empty() {
            warn!(ids = ?active.unreadable, "Unreadable shipment records were not reconciled");
        }
        info!(count = summary.processed, "Reconciling active shipments");

        let concurrency = self.options.max_concurrent.max(1);
        let mut outcomes = stream::iter(active.shipments)
            .map(move |shipment| self.reconcile_isolated(shipment).boxed())
            .buffer_unordered(concurrency);

        while let Some(outcome) = outcomes.next().await {
            summary.record(outcome);
        }

        summary.finished_at = Utc::now();
        info!(
            processed = summary.processed,
            updated = summary.updated,
            transitions = summary.transitions,
            failed = summary.failed,
            skipped = summary.skipped,
            unreadable = summary.unreadable,
            notified = summary.notified,
            "Reconciliation finished in {}ms",
            summary.elapsed().num_milliseconds()
        );
        Ok(summary)
    }

    /// Reconcile one shipment, turning a panic into a failed outcome.
    async fn reconcile_isolated(&self, shipment: Shipment) -> ShipmentOutcome {
        match AssertUnwindSafe(self.reconcile(&shipment))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(panic) => {
                error!(
                    shipment_id = %shipment.id,
                    carrier = %shipment.carrier,
                    tracking_number = %shipment.tracking_number,
                    panic = panic_message(panic.as_ref()),
                    "Shipment reconciliation panicked"
                );
                ShipmentOutcome::Failed
            }
        }
    }

    #[instrument(
        skip_all,
        fields(
            shipment_id = %shipment.id,
            carrier = %shipment.carrier,
            tracking_number = %shipment.tracking_number
        )
    )]
    async fn reconcile(&self, shipment: &Shipment) -> ShipmentOutcome {
        let snapshot = match self.fetch(shipment).await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return ShipmentOutcome::Skipped,
            Err(e) => {
                warn!(
                    shipment_id = %shipment.id,
                    carrier = %shipment.carrier,
                    tracking_number = %shipment.tracking_number,
                    error = %e,
                    "Carrier sync failed"
                );
                return ShipmentOutcome::Failed;
            }
        };

        let new_events = events_to_write(&shipment.events, &snapshot.events);
        let next_status = self.accepted_status(shipment, snapshot.status);

        if new_events.is_empty() && next_status.is_none() {
            debug!(shipment_id = %shipment.id, "No changes");
            return ShipmentOutcome::Unchanged;
        }

        if !new_events.is_empty() {
            if let Err(e) = self.store.upsert_events(&shipment.id, &new_events).await {
                error!(shipment_id = %shipment.id, error = %e, "Failed to write events");
                return ShipmentOutcome::Failed;
            }
        }

        let now = Utc::now();
        let patch = match next_status {
            Some(status) => ShipmentPatch::status(status, now),
            None => ShipmentPatch::touch(now),
        };
        if let Err(e) = self.store.apply_patch(&shipment.id, &patch).await {
            error!(shipment_id = %shipment.id, error = %e, "Failed to update shipment");
            return ShipmentOutcome::Failed;
        }

        let notification = match next_status {
            Some(current) => {
                info!(
                    shipment_id = %shipment.id,
                    previous = %shipment.status,
                    current = %current,
                    "Status changed"
                );
                let change = StatusChange {
                    carrier: shipment.carrier,
                    tracking_number: shipment.tracking_number.clone(),
                    previous: shipment.status,
                    current,
                };
                self.notify_owner(shipment, &change).await
            }
            None => Notification::NotAttempted,
        };

        ShipmentOutcome::Updated {
            transition: next_status.is_some(),
            events_written: new_events.len(),
            notification,
        }
    }

    /// Carrier call bounded by the configured deadline.
    async fn fetch(&self, shipment: &Shipment) -> Result<Option<StatusSnapshot>> {
        let secs = self.options.timeout_secs;
        let call = self
            .registry
            .fetch_status(shipment.carrier, &shipment.tracking_number);

        tokio::time::timeout(Duration::from_secs(secs), call)
            .await
            .map_err(|_| {
                AppError::timeout(
                    format!("{} {}", shipment.carrier, shipment.tracking_number),
                    secs,
                )
            })?
    }

    /// The status to write, if the carrier reports a different one we accept.
    fn accepted_status(
        &self,
        shipment: &Shipment,
        reported: Option<ShipmentStatus>,
    ) -> Option<ShipmentStatus> {
        let next = reported.filter(|s| *s != shipment.status)?;
        if shipment.status.is_regression_to(next) {
            warn!(
                shipment_id = %shipment.id,
                previous = %shipment.status,
                reported = %next,
                rejected = self.options.reject_regressions,
                "Carrier reported an earlier stage"
            );
            if self.options.reject_regressions {
                return None;
            }
        }
        Some(next)
    }

    async fn notify_owner(&self, shipment: &Shipment, change: &StatusChange) -> Notification {
        if shipment.owner_uid.trim().is_empty() {
            warn!(shipment_id = %shipment.id, "Shipment has no owner, skipping notification");
            return Notification::Skipped;
        }

        let owner = match self.store.get_user(&shipment.owner_uid).await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(
                    shipment_id = %shipment.id,
                    owner_uid = %shipment.owner_uid,
                    error = %e,
                    "Owner lookup failed"
                );
                return Notification::Failed;
            }
        };

        let Some(address) = owner.as_ref().and_then(|u| u.notification_address()) else {
            warn!(
                shipment_id = %shipment.id,
                owner_uid = %shipment.owner_uid,
                "Owner has no email address, skipping notification"
            );
            return Notification::Skipped;
        };

        match self.notifier.notify(address, change).await {
            Ok(NotifyOutcome::Sent) => Notification::Sent,
            Ok(NotifyOutcome::Skipped) => Notification::Skipped,
            Err(e) => {
                warn!(shipment_id = %shipment.id, error = %e, "Notification failed");
                Notification::Failed
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}
