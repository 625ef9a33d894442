//! HMM (Hyundai Merchant Marine) tracking adapter.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{CarrierAdapter, carrier_event, get_json, normalize_status};
use crate::error::Result;
use crate::models::{Carrier, StatusSnapshot};

/// Adapter for the HMM tracking API.
pub struct HmmAdapter {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HmmAdapter {
    pub fn new(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            endpoint: format!("{}/track", base_url.trim_end_matches('/')),
            api_key,
        }
    }
}

#[async_trait]
impl CarrierAdapter for HmmAdapter {
    fn carrier(&self) -> Carrier {
        Carrier::Hmm
    }

    async fn fetch_status(&self, tracking_number: &str) -> Result<Option<StatusSnapshot>> {
        let Some(api_key) = self.api_key.as_deref() else {
            warn!(tracking_number, "HMM API key missing, skipping HMM sync");
            return Ok(None);
        };

        let request = self
            .client
            .get(&self.endpoint)
            .query(&[("trackingNumber", tracking_number)]);
        let payload: HmmResponse = get_json(Carrier::Hmm, request, api_key).await?;

        let snapshot = payload.into_snapshot(tracking_number);
        debug!(
            tracking_number,
            status = ?snapshot.status,
            events = snapshot.events.len(),
            "Fetched HMM status"
        );
        Ok(Some(snapshot))
    }
}

#[derive(Debug, Deserialize)]
struct HmmResponse {
    status: Option<String>,
    #[serde(default)]
    events: Vec<HmmEvent>,
}

#[derive(Debug, Deserialize)]
struct HmmEvent {
    code: Option<String>,
    datetime: Option<String>,
    description: Option<String>,
    location: Option<String>,
}

impl HmmResponse {
    fn into_snapshot(self, tracking_number: &str) -> StatusSnapshot {
        let status = normalize_status(Carrier::Hmm, tracking_number, self.status.as_deref());
        let events = self
            .events
            .into_iter()
            .filter_map(|e| {
                carrier_event(Carrier::Hmm, e.code, e.datetime, e.description, e.location)
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
    fn test_maps_status_and_events() {
        let json = r#"{
            "status": "Arrived",
            "events": [
                {"code": "ARR", "datetime": "2024-01-01T00:00:00Z", "description": "Arrived at port", "location": "Rotterdam"},
                {"code": "DEP", "datetime": "2023-12-20T00:00:00Z"}
            ]
        }"#;
        let response: HmmResponse = serde_json::from_str(json).unwrap();
        let snapshot = response.into_snapshot("HMMU7654321");

        assert_eq!(snapshot.status, Some(ShipmentStatus::ArrivedPort));
        let ids: Vec<_> = snapshot.events.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(
            ids,
            vec!["ARR-2024-01-01T00:00:00Z", "DEP-2023-12-20T00:00:00Z"]
        );
    }

    #[test]
    fn test_unknown_status_keeps_events() {
        let json = r#"{"status": "SOMETHING_NEW", "events": [{"code": "X", "datetime": "2024-02-01T00:00:00Z"}]}"#;
        let response: HmmResponse = serde_json::from_str(json).unwrap();
        let snapshot = response.into_snapshot("HMMU7654321");

        assert!(snapshot.status.is_none());
        assert_eq!(snapshot.events.len(), 1);
    }

    #[test]
    fn test_repeated_polls_produce_identical_ids() {
        let json = r#"{"status": "IN_TRANSIT", "events": [{"code": "DEP", "datetime": "2024-01-01T00:00:00Z"}]}"#;
        let first = serde_json::from_str::<HmmResponse>(json)
            .unwrap()
            .into_snapshot("HMMU1");
        let second = serde_json::from_str::<HmmResponse>(json)
            .unwrap()
            .into_snapshot("HMMU1");
        assert_eq!(first, second);
    }
}
