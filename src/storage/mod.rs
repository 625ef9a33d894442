//! Document store abstractions for shipment persistence.
//!
//! The store is the single shared mutable resource of the tracker. Every
//! write the reconciliation job performs is a per-shipment partial update:
//! read the current record, apply the delta, write it back. Fields the job
//! does not own (vessel name, price, ...) survive untouched.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//! ├── shipments/
//! │   ├── {id}.json               # Shipment record (camelCase fields)
//! │   └── {id}/events/
//! │       └── {sha256(event id)}.json
//! └── users/
//!     └── {uid}.json              # User record (email lookup only)
//! ```

pub mod local;
pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::error::{AppError, Result};
use crate::models::{Shipment, ShipmentPatch, TrackingEvent, User};
use crate::utils::hashed_key;

// Re-export for convenience
pub use local::LocalStore;
pub use memory::MemoryStore;

/// The active set as read from a backend.
#[derive(Debug, Clone, Default)]
pub struct ActiveShipments {
    pub shipments: Vec<Shipment>,
    /// Ids of records that exist but do not decode as a shipment
    pub unreadable: Vec<String>,
}

impl ActiveShipments {
    /// Add one stored record, keeping it if it decodes and is not archived.
    ///
    /// Returns the decoded shipment so the caller can attach its events.
    pub(crate) fn admit(&mut self, id: &str, bytes: &[u8]) -> Option<&mut Shipment> {
        match decode_shipment(id, bytes) {
            Ok(shipment) if shipment.archived => None,
            Ok(shipment) => {
                self.shipments.push(shipment);
                self.shipments.last_mut()
            }
            Err(e) => {
                warn!(shipment_id = id, error = %e, "Skipping unreadable shipment record");
                self.unreadable.push(id.to_string());
                None
            }
        }
    }
}

/// Trait for shipment document store backends.
#[async_trait]
pub trait ShipmentStore: Send + Sync {
    /// All shipments with `archived = false`, each with its event timeline loaded.
    ///
    /// Records that fail to decode are reported in `unreadable` instead of
    /// failing the listing.
    async fn list_active(&self) -> Result<ActiveShipments>;

    /// Merge the patch fields into the stored shipment record.
    ///
    /// Fields not named by the patch are preserved. Fails if the record
    /// does not exist.
    async fn apply_patch(&self, shipment_id: &str, patch: &ShipmentPatch) -> Result<()>;

    /// Upsert events into the shipment's event collection, keyed by event id.
    async fn upsert_events(&self, shipment_id: &str, events: &[TrackingEvent]) -> Result<()>;

    /// Look up a user record.
    async fn get_user(&self, uid: &str) -> Result<Option<User>>;
}

/// Key of a shipment record relative to the store root.
pub fn shipment_key(shipment_id: &str) -> String {
    format!("shipments/{shipment_id}.json")
}

/// Prefix of a shipment's event collection relative to the store root.
pub fn events_prefix(shipment_id: &str) -> String {
    format!("shipments/{shipment_id}/events/")
}

/// Key of a single event document relative to the store root.
pub fn event_key(shipment_id: &str, event_id: &str) -> String {
    format!("{}{}.json", events_prefix(shipment_id), hashed_key(event_id))
}

/// Key of a user record relative to the store root.
pub fn user_key(uid: &str) -> String {
    format!("users/{uid}.json")
}

/// Merge patch fields into a raw stored document.
pub(crate) fn merge_fields(document: &mut Value, patch: &ShipmentPatch) -> Result<()> {
    let Value::Object(fields) = document else {
        return Err(AppError::storage("shipment record is not a JSON object"));
    };
    fields.extend(patch.to_fields());
    Ok(())
}

/// Decode a stored shipment record, taking the id from its key.
pub(crate) fn decode_shipment(id: &str, bytes: &[u8]) -> Result<Shipment> {
    let mut shipment: Shipment = serde_json::from_slice(bytes)?;
    shipment.id = id.to_string();
    Ok(shipment)
}

/// Decode a stored user record, taking the uid from its key.
pub(crate) fn decode_user(uid: &str, bytes: &[u8]) -> Result<User> {
    let mut user: User = serde_json::from_slice(bytes)?;
    if user.uid.is_empty() {
        user.uid = uid.to_string();
    }
    Ok(user)
}
