//! Local filesystem document store.
//!
//! Used for development, the CLI and single-host deployments. Production
//! Lambda deployments use `S3Store`.
//!
//! Writes go to a temporary file that is renamed over the target, so a
//! reader never observes a half-written record.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::models::{Shipment, ShipmentPatch, TrackingEvent, User};
use crate::pipeline::sort_timeline;
use crate::storage::{
    ActiveShipments, ShipmentStore, decode_user, event_key, events_prefix, merge_fields,
    shipment_key, user_key,
};
use crate::utils::is_safe_segment;

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Local filesystem storage backend.
#[derive(Debug, Clone)]
pub struct LocalStore {
    root_dir: PathBuf,
}

impl LocalStore {
    /// Create a new LocalStore rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("{}.{seq}.tmp", std::process::id()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Write JSON data.
    pub async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    /// Read JSON data.
    pub async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// `.json` file stems directly under a directory key.
    async fn list_json_stems(&self, dir_key: &str) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(self.path(dir_key)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut stems = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
        stems.sort();
        Ok(stems)
    }

    async fn load_events(&self, shipment_id: &str) -> Result<Vec<TrackingEvent>> {
        let prefix = events_prefix(shipment_id);
        let mut events = Vec::new();
        for stem in self.list_json_stems(&prefix).await? {
            let key = format!("{prefix}{stem}.json");
            if let Some(event) = self.read_json::<TrackingEvent>(&key).await? {
                events.push(event);
            }
        }
        sort_timeline(&mut events);
        Ok(events)
    }

    fn check_id(kind: &'static str, id: &str) -> Result<()> {
        if is_safe_segment(id) {
            Ok(())
        } else {
            Err(AppError::validation(format!("invalid {kind} id '{id}'")))
        }
    }

    /// Seed a shipment record and its events.
    pub async fn put_shipment(&self, shipment: &Shipment) -> Result<()> {
        Self::check_id("shipment", &shipment.id)?;
        self.write_json(&shipment_key(&shipment.id), shipment).await?;
        self.upsert_events(&shipment.id, &shipment.events).await
    }

    /// Seed a user record.
    pub async fn put_user(&self, user: &User) -> Result<()> {
        Self::check_id("user", &user.uid)?;
        self.write_json(&user_key(&user.uid), user).await
    }
}

#[async_trait]
impl ShipmentStore for LocalStore {
    async fn list_active(&self) -> Result<ActiveShipments> {
        let mut active = ActiveShipments::default();

        for id in self.list_json_stems("shipments").await? {
            let Some(bytes) = self.read_bytes(&shipment_key(&id)).await? else {
                continue;
            };
            if let Some(shipment) = active.admit(&id, &bytes) {
                shipment.events = self.load_events(&id).await?;
            }
        }

        debug!(
            count = active.shipments.len(),
            unreadable = active.unreadable.len(),
            root = %self.root_dir.display(),
            "Listed active shipments"
        );
        Ok(active)
    }

    async fn apply_patch(&self, shipment_id: &str, patch: &ShipmentPatch) -> Result<()> {
        Self::check_id("shipment", shipment_id)?;
        let key = shipment_key(shipment_id);

        let mut document: Value = self
            .read_json(&key)
            .await?
            .ok_or_else(|| AppError::not_found("shipment", shipment_id))?;
        merge_fields(&mut document, patch)?;
        self.write_json(&key, &document).await
    }

    async fn upsert_events(&self, shipment_id: &str, events: &[TrackingEvent]) -> Result<()> {
        Self::check_id("shipment", shipment_id)?;
        for event in events {
            self.write_json(&event_key(shipment_id, &event.id), event)
                .await?;
        }
        Ok(())
    }

    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        Self::check_id("user", uid)?;
        match self.read_bytes(&user_key(uid)).await? {
            Some(bytes) => Ok(Some(decode_user(uid, &bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::models::{Carrier, ShipmentStatus};

    fn sample_shipment(id: &str) -> Shipment {
        Shipment {
            id: id.to_string(),
            carrier: Carrier::Maersk,
            tracking_number: "MSKU1234567".into(),
            status: ShipmentStatus::InTransit,
            archived: false,
            owner_uid: "owner-1".into(),
            last_updated_at: Utc::now(),
            events: vec![TrackingEvent::new("DEPA", "2024-01-01T08:00:00Z")],
        }
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        store.write_bytes("test.txt", b"hello").await.unwrap();
        let data = store.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        let data = store.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_list_active_with_events() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());

        store.put_shipment(&sample_shipment("s1")).await.unwrap();
        let mut archived = sample_shipment("s2");
        archived.archived = true;
        store.put_shipment(&archived).await.unwrap();

        let active = store.list_active().await.unwrap().shipments;
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "s1");
        assert_eq!(active[0].events[0].id, "DEPA-2024-01-01T08:00:00Z");
    }

    #[tokio::test]
    async fn test_unreadable_record_is_reported() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store.put_shipment(&sample_shipment("s1")).await.unwrap();
        store
            .write_json(
                &shipment_key("s2"),
                &json!({
                    "carrier": "maersk",
                    "trackingNumber": "MSKU2",
                    "status": "unknown",
                    "archived": false,
                    "ownerUid": "owner-1",
                    "lastUpdatedAt": "2024-01-01T00:00:00Z"
                }),
            )
            .await
            .unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.shipments.len(), 1);
        assert_eq!(active.unreadable, vec!["s2"]);
    }

    #[tokio::test]
    async fn test_empty_root_lists_nothing() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path().join("missing"));
        assert!(store.list_active().await.unwrap().shipments.is_empty());
    }

    #[tokio::test]
    async fn test_patch_merges_fields() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store
            .write_json(
                &shipment_key("s1"),
                &json!({
                    "carrier": "hmm",
                    "trackingNumber": "HMMU1",
                    "status": "in_transit",
                    "archived": false,
                    "ownerUid": "owner-1",
                    "lastUpdatedAt": "2024-01-01T00:00:00Z",
                    "portOfDischarge": "Rotterdam"
                }),
            )
            .await
            .unwrap();

        let patch = ShipmentPatch::status(ShipmentStatus::ArrivedPort, Utc::now());
        store.apply_patch("s1", &patch).await.unwrap();

        let doc: Value = store.read_json(&shipment_key("s1")).await.unwrap().unwrap();
        assert_eq!(doc["status"], "arrived_port");
        assert_eq!(doc["portOfDischarge"], "Rotterdam");
    }

    #[tokio::test]
    async fn test_upsert_is_keyed_by_event_id() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store.put_shipment(&sample_shipment("s1")).await.unwrap();

        let event = TrackingEvent::new("ARR", "2024-01-05T00:00:00Z");
        store.upsert_events("s1", &[event.clone()]).await.unwrap();
        store.upsert_events("s1", &[event]).await.unwrap();

        let events = store.load_events("s1").await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn test_user_lookup() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        store
            .write_json(&user_key("owner-1"), &json!({"email": "owner@example.com"}))
            .await
            .unwrap();

        let user = store.get_user("owner-1").await.unwrap().unwrap();
        assert_eq!(user.uid, "owner-1");
        assert_eq!(user.notification_address(), Some("owner@example.com"));
        assert!(store.get_user("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let store = LocalStore::new(tmp.path());
        let patch = ShipmentPatch::touch(Utc::now());
        assert!(store.apply_patch("../escape", &patch).await.is_err());
    }
}
