//! In-process document store.
//!
//! Backs unit and integration tests. Keeps raw JSON records so partial-update
//! semantics match the persistent backends, counts writes, and can be told
//! to fail listing or writes for a given shipment.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::{AppError, Result};
use crate::models::{Shipment, ShipmentPatch, TrackingEvent, User};
use crate::pipeline::sort_timeline;
use crate::storage::{ActiveShipments, ShipmentStore, merge_fields};

/// Write counters, for asserting idempotence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteCounts {
    pub patches: usize,
    pub event_upserts: usize,
}

impl WriteCounts {
    pub fn total(&self) -> usize {
        self.patches + self.event_upserts
    }
}

#[derive(Default)]
struct State {
    shipments: BTreeMap<String, Value>,
    events: HashMap<String, BTreeMap<String, TrackingEvent>>,
    users: HashMap<String, User>,
    writes: WriteCounts,
    fail_listing: bool,
    fail_writes: HashSet<String>,
}

/// Shared in-memory store; clones see the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<RwLock<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a shipment and its events.
    pub async fn insert_shipment(&self, shipment: &Shipment) -> Result<()> {
        let document = serde_json::to_value(shipment)?;
        self.insert_document(&shipment.id, document).await;

        let mut state = self.state.write().await;
        let events = state.events.entry(shipment.id.clone()).or_default();
        for event in &shipment.events {
            events.insert(event.id.clone(), event.clone());
        }
        Ok(())
    }

    /// Seed a raw shipment document, including fields the tracker does not model.
    pub async fn insert_document(&self, shipment_id: &str, document: Value) {
        let mut state = self.state.write().await;
        state.shipments.insert(shipment_id.to_string(), document);
    }

    pub async fn insert_user(&self, user: User) {
        let mut state = self.state.write().await;
        state.users.insert(user.uid.clone(), user);
    }

    /// Current shipment record with its timeline.
    pub async fn shipment(&self, shipment_id: &str) -> Option<Shipment> {
        let state = self.state.read().await;
        Self::load(&state, shipment_id).ok()
    }

    /// Raw stored document.
    pub async fn document(&self, shipment_id: &str) -> Option<Value> {
        self.state.read().await.shipments.get(shipment_id).cloned()
    }

    pub async fn events(&self, shipment_id: &str) -> Vec<TrackingEvent> {
        let state = self.state.read().await;
        Self::timeline(&state, shipment_id)
    }

    pub async fn write_counts(&self) -> WriteCounts {
        self.state.read().await.writes
    }

    /// Make `list_active` fail.
    pub async fn fail_listing(&self, fail: bool) {
        self.state.write().await.fail_listing = fail;
    }

    /// Make every write for `shipment_id` fail.
    pub async fn fail_writes_for(&self, shipment_id: &str) {
        let mut state = self.state.write().await;
        state.fail_writes.insert(shipment_id.to_string());
    }

    fn timeline(state: &State, shipment_id: &str) -> Vec<TrackingEvent> {
        let mut events: Vec<_> = state
            .events
            .get(shipment_id)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default();
        sort_timeline(&mut events);
        events
    }

    fn load(state: &State, shipment_id: &str) -> Result<Shipment> {
        let document = state
            .shipments
            .get(shipment_id)
            .ok_or_else(|| AppError::not_found("shipment", shipment_id))?;
        let mut shipment: Shipment = serde_json::from_value(document.clone())?;
        shipment.id = shipment_id.to_string();
        shipment.events = Self::timeline(state, shipment_id);
        Ok(shipment)
    }

    fn check_writable(state: &State, shipment_id: &str) -> Result<()> {
        if state.fail_writes.contains(shipment_id) {
            return Err(AppError::storage(format!(
                "injected write failure for {shipment_id}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ShipmentStore for MemoryStore {
    async fn list_active(&self) -> Result<ActiveShipments> {
        let state = self.state.read().await;
        if state.fail_listing {
            return Err(AppError::storage("injected listing failure"));
        }

        let mut active = ActiveShipments::default();
        for (id, document) in &state.shipments {
            let bytes = serde_json::to_vec(document)?;
            if let Some(shipment) = active.admit(id, &bytes) {
                shipment.events = Self::timeline(&state, id);
            }
        }
        Ok(active)
    }

    async fn apply_patch(&self, shipment_id: &str, patch: &ShipmentPatch) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check_writable(&state, shipment_id)?;

        let document = state
            .shipments
            .get_mut(shipment_id)
            .ok_or_else(|| AppError::not_found("shipment", shipment_id))?;
        merge_fields(document, patch)?;
        state.writes.patches += 1;
        Ok(())
    }

    async fn upsert_events(&self, shipment_id: &str, events: &[TrackingEvent]) -> Result<()> {
        let mut state = self.state.write().await;
        Self::check_writable(&state, shipment_id)?;

        let stored = state.events.entry(shipment_id.to_string()).or_default();
        for event in events {
            stored.insert(event.id.clone(), event.clone());
        }
        state.writes.event_upserts += events.len();
        Ok(())
    }

    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        Ok(self.state.read().await.users.get(uid).cloned())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::models::{Carrier, ShipmentStatus};

    fn shipment(id: &str, archived: bool) -> Shipment {
        Shipment {
            id: id.to_string(),
            carrier: Carrier::Hmm,
            tracking_number: format!("HMMU{id}"),
            status: ShipmentStatus::InTransit,
            archived,
            owner_uid: "u1".into(),
            last_updated_at: Utc::now(),
            events: vec![TrackingEvent::new("DEP", "2024-01-01T00:00:00Z")],
        }
    }

    #[tokio::test]
    async fn test_list_active_skips_archived() {
        let store = MemoryStore::new();
        store.insert_shipment(&shipment("a", false)).await.unwrap();
        store.insert_shipment(&shipment("b", true)).await.unwrap();

        let active = store.list_active().await.unwrap().shipments;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "a");
        assert_eq!(active[0].events.len(), 1);
    }

    #[tokio::test]
    async fn test_unreadable_record_does_not_fail_listing() {
        let store = MemoryStore::new();
        store.insert_shipment(&shipment("a", false)).await.unwrap();
        store.insert_document("broken", json!({ "status": "unknown" })).await;

        let active = store.list_active().await.unwrap();
        assert_eq!(active.shipments.len(), 1);
        assert_eq!(active.unreadable, vec!["broken"]);
    }

    #[tokio::test]
    async fn test_patch_keeps_unmodelled_fields() {
        let store = MemoryStore::new();
        store
            .insert_document(
                "s1",
                json!({
                    "carrier": "maersk",
                    "trackingNumber": "MSKU1",
                    "status": "in_transit",
                    "archived": false,
                    "ownerUid": "u1",
                    "lastUpdatedAt": "2024-01-01T00:00:00Z",
                    "eta": "2024-02-01"
                }),
            )
            .await;

        let patch = ShipmentPatch::status(ShipmentStatus::Delivered, Utc::now());
        store.apply_patch("s1", &patch).await.unwrap();

        let doc = store.document("s1").await.unwrap();
        assert_eq!(doc["status"], "delivered");
        assert_eq!(doc["eta"], "2024-02-01");
        assert_eq!(store.write_counts().await.patches, 1);
    }

    #[tokio::test]
    async fn test_patch_missing_record_fails() {
        let store = MemoryStore::new();
        let patch = ShipmentPatch::touch(Utc::now());
        let err = store.apply_patch("nope", &patch).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_upsert_same_id_twice() {
        let store = MemoryStore::new();
        store.insert_shipment(&shipment("a", false)).await.unwrap();

        let event = TrackingEvent::new("ARR", "2024-01-05T00:00:00Z");
        store.upsert_events("a", &[event.clone()]).await.unwrap();
        store.upsert_events("a", &[event]).await.unwrap();

        assert_eq!(store.events("a").await.len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let store = MemoryStore::new();
        store.insert_shipment(&shipment("a", false)).await.unwrap();
        store.fail_writes_for("a").await;
        assert!(store.upsert_events("a", &[]).await.is_err());

        store.fail_listing(true).await;
        assert!(store.list_active().await.is_err());
    }
}
