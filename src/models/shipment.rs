//! Shipment, tracking event and user records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Shipping line a shipment is booked with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Carrier {
    Maersk,
    Hmm,
    Other,
}

impl Carrier {
    pub const ALL: [Carrier; 3] = [Carrier::Maersk, Carrier::Hmm, Carrier::Other];

    pub fn as_str(&self) -> &'static str {
        match self {
            Carrier::Maersk => "maersk",
            Carrier::Hmm => "hmm",
            Carrier::Other => "other",
        }
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Carrier {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maersk" => Ok(Carrier::Maersk),
            "hmm" => Ok(Carrier::Hmm),
            "other" => Ok(Carrier::Other),
            other => Err(AppError::validation(format!("unknown carrier '{other}'"))),
        }
    }
}

/// Local lifecycle status of a shipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Created,
    InTransit,
    ArrivedPort,
    OutForDelivery,
    Delivered,
    Exception,
}

impl ShipmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Created => "created",
            ShipmentStatus::InTransit => "in_transit",
            ShipmentStatus::ArrivedPort => "arrived_port",
            ShipmentStatus::OutForDelivery => "out_for_delivery",
            ShipmentStatus::Delivered => "delivered",
            ShipmentStatus::Exception => "exception",
        }
    }

    /// Position along the happy path. `Exception` sits outside it.
    pub fn stage(&self) -> Option<u8> {
        match self {
            ShipmentStatus::Created => Some(0),
            ShipmentStatus::InTransit => Some(1),
            ShipmentStatus::ArrivedPort => Some(2),
            ShipmentStatus::OutForDelivery => Some(3),
            ShipmentStatus::Delivered => Some(4),
            ShipmentStatus::Exception => None,
        }
    }

    /// True when moving from `self` to `next` goes backwards on the happy path.
    pub fn is_regression_to(&self, next: ShipmentStatus) -> bool {
        match (self.stage(), next.stage()) {
            (Some(from), Some(to)) => to < from,
            _ => false,
        }
    }

    /// Map a carrier-native status string onto a local status.
    ///
    /// Matching ignores case and treats spaces, dashes and underscores alike,
    /// so `IN_TRANSIT`, `In Transit` and `in-transit` all normalize the same.
    pub fn normalize(raw: &str) -> Option<Self> {
        let key: String = raw
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();

        let status = match key.as_str() {
            "created" | "booked" | "planned" | "booking_confirmed" | "empty_released" => {
                ShipmentStatus::Created
            }
            "in_transit" | "departed" | "loaded" | "sailing" | "transshipment"
            | "vessel_departure" => ShipmentStatus::InTransit,
            "arrived_port" | "arrived" | "arrival" | "discharged" | "at_port"
            | "vessel_arrival" => ShipmentStatus::ArrivedPort,
            "out_for_delivery" | "gate_out" | "on_carriage" | "in_delivery" => {
                ShipmentStatus::OutForDelivery
            }
            "delivered" | "completed" | "empty_returned" | "gate_in_empty" => {
                ShipmentStatus::Delivered
            }
            "exception" | "hold" | "on_hold" | "delayed" | "cancelled" | "canceled" => {
                ShipmentStatus::Exception
            }
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A carrier-reported milestone on a shipment's timeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    /// Deduplication key, see [`TrackingEvent::compose_id`]
    pub id: String,

    /// Carrier event code
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    /// Carrier-reported event time (ISO 8601), kept verbatim
    pub timestamp: String,
}

impl TrackingEvent {
    /// Build the deterministic event id from carrier-native fields.
    pub fn compose_id(code: &str, datetime: &str) -> String {
        format!("{code}-{datetime}")
    }

    /// Build an event from the carrier's code and timestamp.
    pub fn new(code: impl Into<String>, timestamp: impl Into<String>) -> Self {
        let status = code.into();
        let timestamp = timestamp.into();
        Self {
            id: Self::compose_id(&status, &timestamp),
            status,
            description: None,
            location: None,
            timestamp,
        }
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description.filter(|d| !d.trim().is_empty());
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location.filter(|l| !l.trim().is_empty());
        self
    }

    /// Parsed timestamp, when the carrier sent valid RFC 3339.
    pub fn occurred_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// A locally persisted shipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    /// Document id; filled in from the storage key
    #[serde(default)]
    pub id: String,

    pub carrier: Carrier,

    pub tracking_number: String,

    pub status: ShipmentStatus,

    #[serde(default)]
    pub archived: bool,

    pub owner_uid: String,

    pub last_updated_at: DateTime<Utc>,

    /// Timeline, loaded from the events sub-collection
    #[serde(default, skip_serializing)]
    pub events: Vec<TrackingEvent>,
}

/// Read-only view of a user record, used to resolve notification recipients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub uid: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub role: Option<String>,
}

impl User {
    /// Notification address, if the user has a usable one.
    pub fn notification_address(&self) -> Option<&str> {
        self.email
            .as_deref()
            .map(str::trim)
            .filter(|e| e.contains('@'))
    }
}

/// Normalized status reported by a carrier adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// `None` when the carrier's status string could not be normalized
    pub status: Option<ShipmentStatus>,
    pub events: Vec<TrackingEvent>,
}

/// Explicit delta written to a shipment record by the reconciliation job.
#[derive(Debug, Clone, PartialEq)]
pub struct ShipmentPatch {
    pub status: Option<ShipmentStatus>,
    pub last_updated_at: DateTime<Utc>,
}

impl ShipmentPatch {
    /// Status change patch.
    pub fn status(status: ShipmentStatus, at: DateTime<Utc>) -> Self {
        Self {
            status: Some(status),
            last_updated_at: at,
        }
    }

    /// Patch that only bumps `lastUpdatedAt`.
    pub fn touch(at: DateTime<Utc>) -> Self {
        Self {
            status: None,
            last_updated_at: at,
        }
    }

    /// Fields to merge into the stored document, in stored naming.
    pub fn to_fields(&self) -> serde_json::Map<String, serde_json::Value> {
        let mut fields = serde_json::Map::new();
        if let Some(status) = self.status {
            fields.insert("status".into(), status.as_str().into());
        }
        fields.insert(
            "lastUpdatedAt".into(),
            self.last_updated_at.to_rfc3339().into(),
        );
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_carrier_statuses() {
        assert_eq!(
            ShipmentStatus::normalize("IN_TRANSIT"),
            Some(ShipmentStatus::InTransit)
        );
        assert_eq!(
            ShipmentStatus::normalize("Arrived Port"),
            Some(ShipmentStatus::ArrivedPort)
        );
        assert_eq!(
            ShipmentStatus::normalize("gate-out"),
            Some(ShipmentStatus::OutForDelivery)
        );
        assert_eq!(
            ShipmentStatus::normalize("DELIVERED"),
            Some(ShipmentStatus::Delivered)
        );
        assert_eq!(ShipmentStatus::normalize("unknown"), None);
        assert_eq!(ShipmentStatus::normalize(""), None);
    }

    #[test]
    fn test_regression_detection() {
        use ShipmentStatus::*;
        assert!(ArrivedPort.is_regression_to(InTransit));
        assert!(!InTransit.is_regression_to(ArrivedPort));
        assert!(!Delivered.is_regression_to(Exception));
        assert!(!Exception.is_regression_to(Created));
    }

    #[test]
    fn test_compose_id() {
        let event = TrackingEvent::new("ARR", "2024-01-01T00:00:00Z");
        assert_eq!(event.id, "ARR-2024-01-01T00:00:00Z");
        assert!(event.occurred_at().is_some());
    }

    #[test]
    fn test_shipment_document_naming() {
        let json = r#"{
            "carrier": "maersk",
            "trackingNumber": "MSKU1234567",
            "status": "in_transit",
            "archived": false,
            "ownerUid": "u1",
            "lastUpdatedAt": "2024-01-01T00:00:00Z",
            "vesselName": "Ever Given"
        }"#;
        let shipment: Shipment = serde_json::from_str(json).unwrap();
        assert_eq!(shipment.carrier, Carrier::Maersk);
        assert_eq!(shipment.status, ShipmentStatus::InTransit);
        assert!(shipment.events.is_empty());
    }

    #[test]
    fn test_patch_fields() {
        let at = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let fields = ShipmentPatch::status(ShipmentStatus::ArrivedPort, at).to_fields();
        assert_eq!(fields["status"], "arrived_port");
        assert!(fields.contains_key("lastUpdatedAt"));

        let fields = ShipmentPatch::touch(at).to_fields();
        assert!(!fields.contains_key("status"));
    }

    #[test]
    fn test_user_address() {
        let user = User {
            uid: "u1".into(),
            email: Some(" owner@example.com ".into()),
            role: None,
        };
        assert_eq!(user.notification_address(), Some("owner@example.com"));

        let user = User {
            uid: "u2".into(),
            email: Some("".into()),
            role: None,
        };
        assert_eq!(user.notification_address(), None);
    }
}
