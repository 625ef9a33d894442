// src/models/mod.rs

//! Domain models for the tracker.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod shipment;

// Re-export all public types
pub use config::{
    CarrierEndpoint, CarriersConfig, Config, LoggingConfig, MailConfig, ScheduleConfig,
    ServerConfig, StorageBackend, StorageConfig, TrackerConfig,
};
pub use shipment::{
    Carrier, Shipment, ShipmentPatch, ShipmentStatus, StatusSnapshot, TrackingEvent, User,
};
