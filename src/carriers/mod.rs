//! Carrier tracking adapters.
//!
//! Each supported shipping line gets its own [`CarrierAdapter`] that calls
//! the carrier's HTTP API and maps the response into a [`StatusSnapshot`].
//! The [`CarrierRegistry`] dispatches by [`Carrier`], so adding a carrier
//! never touches the reconciliation loop.
//!
//! Adapter contract:
//! - `Ok(None)`: nothing to reconcile this cycle (carrier unsupported,
//!   credential not configured).
//! - `Ok(Some(snapshot))`: normalized carrier state.
//! - `Err(_)`: transport, status or payload failure; the caller logs it and
//!   leaves the shipment untouched until the next cycle.

mod hmm;
mod maersk;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{AppError, Result};
use crate::models::{Carrier, Config, ShipmentStatus, StatusSnapshot, TrackingEvent};

pub use hmm::HmmAdapter;
pub use maersk::MaerskAdapter;

/// Fetches live tracking status for one carrier.
#[async_trait]
pub trait CarrierAdapter: Send + Sync {
    /// Carrier this adapter serves.
    fn carrier(&self) -> Carrier;

    /// Fetch the current status and event history for a tracking reference.
    async fn fetch_status(&self, tracking_number: &str) -> Result<Option<StatusSnapshot>>;
}

/// Mapping from carrier to adapter.
#[derive(Clone, Default)]
pub struct CarrierRegistry {
    adapters: HashMap<Carrier, Arc<dyn CarrierAdapter>>,
}

impl CarrierRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in HTTP adapters, credentials read from the environment.
    pub fn from_config(config: &Config, client: reqwest::Client) -> Self {
        let maersk = MaerskAdapter::new(
            client.clone(),
            &config.carriers.maersk.base_url,
            config.carriers.maersk.api_key(),
        );
        let hmm = HmmAdapter::new(
            client,
            &config.carriers.hmm.base_url,
            config.carriers.hmm.api_key(),
        );

        Self::new().with_adapter(maersk).with_adapter(hmm)
    }

    /// Register an adapter, replacing any previous one for the same carrier.
    pub fn with_adapter(mut self, adapter: impl CarrierAdapter + 'static) -> Self {
        self.register(Arc::new(adapter));
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn CarrierAdapter>) {
        self.adapters.insert(adapter.carrier(), adapter);
    }

    pub fn supports(&self, carrier: Carrier) -> bool {
        self.adapters.contains_key(&carrier)
    }

    /// Fetch status through the carrier's adapter.
    ///
    /// Carriers without an adapter (always including [`Carrier::Other`])
    /// yield `Ok(None)`.
    pub async fn fetch_status(
        &self,
        carrier: Carrier,
        tracking_number: &str,
    ) -> Result<Option<StatusSnapshot>> {
        match self.adapters.get(&carrier) {
            Some(adapter) => adapter.fetch_status(tracking_number).await,
            None => {
                debug!(%carrier, tracking_number, "Carrier not supported, skipping sync");
                Ok(None)
            }
        }
    }
}

/// Send an authenticated GET and decode the JSON body.
async fn get_json<T: DeserializeOwned>(
    carrier: Carrier,
    request: reqwest::RequestBuilder,
    api_key: &str,
) -> Result<T> {
    let response = request
        .header(ACCEPT, "application/json")
        .header("x-api-key", api_key)
        .send()
        .await?
        .error_for_status()?;

    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|e| AppError::carrier(carrier, format!("malformed response: {e}")))
}

/// Normalize a carrier-native status, logging values we cannot map.
fn normalize_status(
    carrier: Carrier,
    tracking_number: &str,
    raw: Option<&str>,
) -> Option<ShipmentStatus> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    let status = ShipmentStatus::normalize(raw);
    if status.is_none() {
        warn!(%carrier, tracking_number, raw, "Unrecognized carrier status");
    }
    status
}

/// Build a tracking event from carrier fields.
///
/// Events missing a code or a timestamp are dropped since no stable id can
/// be derived for them.
fn carrier_event(
    carrier: Carrier,
    code: Option<String>,
    datetime: Option<String>,
    description: Option<String>,
    location: Option<String>,
) -> Option<TrackingEvent> {
    let code = code.map(|c| c.trim().to_string()).filter(|c| !c.is_empty());
    let datetime = datetime
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    match (code, datetime) {
        (Some(code), Some(datetime)) => Some(
            TrackingEvent::new(code, datetime)
                .with_description(description)
                .with_location(location),
        ),
        (code, datetime) => {
            warn!(%carrier, ?code, ?datetime, "Dropping carrier event without code or timestamp");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedAdapter(Carrier);

    #[async_trait]
    impl CarrierAdapter for FixedAdapter {
        fn carrier(&self) -> Carrier {
            self.0
        }

        async fn fetch_status(&self, tracking_number: &str) -> Result<Option<StatusSnapshot>> {
            Ok(Some(StatusSnapshot {
                status: Some(ShipmentStatus::InTransit),
                events: vec![TrackingEvent::new(tracking_number, "2024-01-01T00:00:00Z")],
            }))
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_carrier() {
        let registry = CarrierRegistry::new().with_adapter(FixedAdapter(Carrier::Hmm));

        let snapshot = registry.fetch_status(Carrier::Hmm, "HMMU1").await.unwrap();
        assert_eq!(snapshot.unwrap().events[0].status, "HMMU1");

        let none = registry.fetch_status(Carrier::Maersk, "MSKU1").await.unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn test_carrier_event_requires_code_and_time() {
        let event = carrier_event(
            Carrier::Hmm,
            Some(" DEP ".into()),
            Some("2024-01-02T03:04:05Z".into()),
            Some("Departed".into()),
            Some(String::new()),
        )
        .unwrap();
        assert_eq!(event.id, "DEP-2024-01-02T03:04:05Z");
        assert_eq!(event.description.as_deref(), Some("Departed"));
        assert!(event.location.is_none());

        assert!(carrier_event(Carrier::Hmm, None, Some("2024".into()), None, None).is_none());
        assert!(carrier_event(Carrier::Hmm, Some("DEP".into()), None, None, None).is_none());
    }

    #[test]
    fn test_normalize_status_ignores_blank() {
        assert_eq!(normalize_status(Carrier::Maersk, "M1", Some("  ")), None);
        assert_eq!(
            normalize_status(Carrier::Maersk, "M1", Some("DISCHARGED")),
            Some(ShipmentStatus::ArrivedPort)
        );
    }

    #[tokio::test]
    async fn test_other_carrier_has_no_adapter() {
        let registry = CarrierRegistry::from_config(&Config::default(), reqwest::Client::new());
        assert!(registry.supports(Carrier::Maersk));
        assert!(registry.supports(Carrier::Hmm));
        assert!(!registry.supports(Carrier::Other));

        let result = registry.fetch_status(Carrier::Other, "X-1").await.unwrap();
        assert!(result.is_none());
    }
}
