//! Maersk track & trace adapter.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CarrierAdapter, carrier_event, get_json, normalize_status};
use crate::error::Result;
use crate::models::{Carrier, StatusSnapshot};

/// Adapter for the Maersk shipment tracking API.
pub struct MaerskAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl MaerskAdapter {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: format!("{}/track/v1/shipments", base_url.trim_end_matches('/')),
            api_key,
        }
    }
}

#[async_trait]
impl CarrierAdapter for MaerskAdapter {
    fn carrier(&self) -> Carrier {
        Carrier::Maersk
    }

    async fn fetch_status(&self, tracking_number: &str) -> Result<Option<StatusSnapshot>> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!(tracking_number, "Maersk API key missing, skipping Maersk sync");
            return Ok(None);
        };

        let request = self.client.get(&self.endpoint).query(&[
            ("referenceType", "CONTAINER"),
            ("referenceValue", tracking_number),
        ]);
        let payload: MaerskResponse = get_json(Carrier::Maersk, request, api_key).await?;

        let snapshot = payload.into_snapshot(tracking_number);
        debug!(
            tracking_number,
            status = ?snapshot.status,
            events = snapshot.events.len(),
            "Fetched Maersk status"
        );
        Ok(Some(snapshot))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaerskResponse {
    #[serde(default)]
    schedules: Vec<MaerskSchedule>,
    #[serde(default)]
    events: Vec<MaerskEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaerskSchedule {
    #[serde(default)]
    transport_plan_stage: Vec<MaerskStage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaerskStage {
    transport_status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MaerskEvent {
    event_code: Option<String>,
    event_date_time: Option<String>,
    event_description: Option<String>,
    location: Option<MaerskLocation>,
}

#[derive(Debug, Deserialize)]
struct MaerskLocation {
    name: Option<String>,
}

impl MaerskResponse {
    /// Status of the first stage of the first schedule; events as reported.
    fn into_snapshot(self, tracking_number: &str) -> StatusSnapshot {
        let raw_status = self
            .schedules
            .first()
            .and_then(|s| s.transport_plan_stage.first())
            .and_then(|stage| stage.transport_status.as_deref());
        let status = normalize_status(Carrier::Maersk, tracking_number, raw_status);

        let events = self
            .events
            .into_iter()
            .filter_map(|e| {
                carrier_event(
                    Carrier::Maersk,
                    e.event_code,
                    e.event_date_time,
                    e.event_description,
                    e.location.and_then(|l| l.name),
                )
            })
            .collect();

        StatusSnapshot { status, events }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ShipmentStatus;

    #[test]
    fn test_maps_first_stage_and_events() {
        let json = r#"{
            "schedules": [
                {"transportPlanStage": [{"transportStatus": "IN_TRANSIT"}, {"transportStatus": "PLANNED"}]}
            ],
            "events": [
                {
                    "eventCode": "DEPA",
                    "eventDateTime": "2024-01-01T08:00:00Z",
                    "eventDescription": "Vessel departure",
                    "location": {"name": "Busan"}
                },
                {"eventCode": "GTIN"}
            ]
        }"#;
        let response: MaerskResponse = serde_json::from_str(json).unwrap();
        let snapshot = response.into_snapshot("MSKU1234567");

        assert_eq!(snapshot.status, Some(ShipmentStatus::InTransit));
        assert_eq!(snapshot.events.len(), 1);
        let event = &snapshot.events[0];
        assert_eq!(event.id, "DEPA-2024-01-01T08:00:00Z");
        assert_eq!(event.location.as_deref(), Some("Busan"));
    }

    #[test]
    fn test_empty_payload_has_no_status() {
        let response: MaerskResponse = serde_json::from_str("{}").unwrap();
        let snapshot = response.into_snapshot("MSKU1234567");
        assert!(snapshot.status.is_none());
        assert!(snapshot.events.is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_absent() {
        let adapter = MaerskAdapter::new(reqwest::Client::new(), "http://127.0.0.1:9", None);
        assert!(adapter.fetch_status("MSKU1234567").await.unwrap().is_none());
    }
}
