// src/lib.rs

//! ShipTrack reconciliation library

pub mod carriers;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod notify;
pub mod pipeline;
pub mod storage;
#[cfg(feature = "server")]
pub mod trigger;
pub mod utils;
