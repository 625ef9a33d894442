//! AWS S3 document store.
//!
//! Same key layout as the local store, rooted at `{bucket}/{prefix}/`.
//! Partial updates are read-modify-write on the shipment object, made
//! conditional on the ETag that was read. An edit landing in between makes
//! the write fail with 412 and the patch is re-applied to the fresh record.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::models::{ShipmentPatch, StorageConfig, TrackingEvent, User};
use crate::pipeline::sort_timeline;
use crate::storage::{
    ActiveShipments, ShipmentStore, decode_user, event_key, events_prefix, merge_fields,
    shipment_key, user_key,
};

/// Read-merge-write attempts before a contended patch gives up.
const PATCH_ATTEMPTS: usize = 2;

/// An object body with its ETag.
struct Object {
    bytes: Vec<u8>,
    etag: Option<String>,
}

enum PutOutcome {
    Written,
    /// The object changed since it was read.
    Conflict,
}

/// Status codes S3 returns when a conditional write loses a race.
fn is_write_conflict(status: u16) -> bool {
    matches!(status, 409 | 412)
}

/// S3-based shipment store.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3Store {
    /// Create a new S3 store instance.
    pub fn new(client: Client, bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    /// Create an S3 store from the `[storage]` section using the default
    /// AWS credential chain.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let aws = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self::new(Client::new(&aws), &config.bucket, &config.prefix)
    }

    /// Full object key for a store-relative key.
    fn key(&self, relative: &str) -> String {
        if self.prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.prefix, relative)
        }
    }

    /// Read an object, returning None for a missing key.
    async fn read_object(&self, relative: &str) -> Result<Option<Object>> {
        let key = self.key(relative);
        let result = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await;

        match result {
            Ok(output) => {
                let etag = output.e_tag().map(str::to_string);
                let bytes = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| AppError::S3(e.to_string()))?;
                Ok(Some(Object {
                    bytes: bytes.into_bytes().to_vec(),
                    etag,
                }))
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_no_such_key() {
                    debug!("No object at s3://{}/{}", self.bucket, key);
                    Ok(None)
                } else {
                    Err(AppError::S3(service_err.to_string()))
                }
            }
        }
    }

    /// Read raw bytes, returning None for a missing key.
    async fn read_bytes(&self, relative: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.read_object(relative).await?.map(|object| object.bytes))
    }

    /// Write JSON to S3, only over the given ETag when one is passed.
    async fn put_json<T: Serialize + ?Sized>(
        &self,
        relative: &str,
        value: &T,
        if_match: Option<&str>,
    ) -> Result<PutOutcome> {
        let key = self.key(relative);
        let body = ByteStream::from(serde_json::to_vec(value)?);

        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .content_type("application/json")
            .set_if_match(if_match.map(str::to_string))
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!("Wrote s3://{}/{}", self.bucket, key);
                Ok(PutOutcome::Written)
            }
            Err(err) => {
                let status = err.raw_response().map(|r| r.status().as_u16());
                if if_match.is_some() && status.is_some_and(is_write_conflict) {
                    Ok(PutOutcome::Conflict)
                } else {
                    Err(AppError::S3(err.into_service_error().to_string()))
                }
            }
        }
    }

    /// Write JSON to S3 unconditionally.
    async fn write_json<T: Serialize + ?Sized>(&self, relative: &str, value: &T) -> Result<()> {
        self.put_json(relative, value, None).await.map(|_| ())
    }

    /// All object keys under a store-relative prefix, relative to the store root.
    async fn list_keys(&self, relative_prefix: &str) -> Result<Vec<String>> {
        let root = self.key("");
        let mut keys = Vec::new();
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.key(relative_prefix))
            .into_paginator()
            .send();

        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| AppError::S3(e.into_service_error().to_string()))?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.strip_prefix(root.as_str()).unwrap_or(key).to_string());
                }
            }
        }
        Ok(keys)
    }

    async fn load_events(&self, shipment_id: &str) -> Result<Vec<TrackingEvent>> {
        let mut events = Vec::new();
        for key in self.list_keys(&events_prefix(shipment_id)).await? {
            if let Some(bytes) = self.read_bytes(&key).await? {
                events.push(serde_json::from_slice(&bytes)?);
            }
        }
        sort_timeline(&mut events);
        Ok(events)
    }
}

/// Shipment id for a top-level record key (`shipments/{id}.json`).
fn shipment_id_from_key(key: &str) -> Option<&str> {
    let name = key.strip_prefix("shipments/")?;
    if name.contains('/') {
        return None;
    }
    name.strip_suffix(".json")
}

#[async_trait]
impl ShipmentStore for S3Store {
    async fn list_active(&self) -> Result<ActiveShipments> {
        let mut active = ActiveShipments::default();

        for key in self.list_keys("shipments/").await? {
            let Some(id) = shipment_id_from_key(&key) else {
                continue;
            };
            let Some(bytes) = self.read_bytes(&key).await? else {
                continue;
            };
            if let Some(shipment) = active.admit(id, &bytes) {
                shipment.events = self.load_events(id).await?;
            }
        }

        info!(
            count = active.shipments.len(),
            unreadable = active.unreadable.len(),
            "Listed active shipments from s3://{}/{}", self.bucket, self.prefix
        );
        Ok(active)
    }

    async fn apply_patch(&self, shipment_id: &str, patch: &ShipmentPatch) -> Result<()> {
        let key = shipment_key(shipment_id);

        for attempt in 1..=PATCH_ATTEMPTS {
            let object = self
                .read_object(&key)
                .await?
                .ok_or_else(|| AppError::not_found("shipment", shipment_id))?;

            let mut document: Value = serde_json::from_slice(&object.bytes)?;
            merge_fields(&mut document, patch)?;

            match self.put_json(&key, &document, object.etag.as_deref()).await? {
                PutOutcome::Written => return Ok(()),
                PutOutcome::Conflict => {
                    warn!(shipment_id, attempt, "Shipment record changed during patch");
                }
            }
        }

        Err(AppError::storage(format!(
            "shipment {shipment_id} changed concurrently during {PATCH_ATTEMPTS} patch attempts"
        )))
    }

    async fn upsert_events(&self, shipment_id: &str, events: &[TrackingEvent]) -> Result<()> {
        for event in events {
            self.write_json(&event_key(shipment_id, &event.id), event)
                .await?;
        }
        Ok(())
    }

    async fn get_user(&self, uid: &str) -> Result<Option<User>> {
        match self.read_bytes(&user_key(uid)).await? {
            Some(bytes) => Ok(Some(decode_user(uid, &bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shipment_id_from_key() {
        assert_eq!(shipment_id_from_key("shipments/abc.json"), Some("abc"));
        assert_eq!(shipment_id_from_key("shipments/abc/events/ff.json"), None);
        assert_eq!(shipment_id_from_key("users/u1.json"), None);
    }

    #[test]
    fn test_lost_conditional_write_is_a_conflict() {
        assert!(is_write_conflict(412));
        assert!(is_write_conflict(409));
        assert!(!is_write_conflict(403));
        assert!(!is_write_conflict(500));
    }
}
