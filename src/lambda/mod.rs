// src/lambda/mod.rs

//! AWS Lambda handler for scheduled reconciliation.
//!
//! An EventBridge schedule invokes the function; each invocation runs one
//! reconciliation against the S3 document store. The invocation fails only
//! when the active shipment set cannot be listed, so the scheduler records
//! the failure. Per-shipment failures are reported in the response body.

use std::sync::Arc;

use lambda_runtime::{Error as LambdaError, LambdaEvent};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::error::Result;
use crate::models::{Config, StorageBackend};
use crate::pipeline::{Reconciler, RunSummary};
use crate::storage::s3::S3Store;

/// Environment variable naming an optional bundled config file.
pub const CONFIG_PATH_ENV: &str = "SHIPTRACK_CONFIG";

/// Lambda response payload.
#[derive(Debug, Serialize)]
pub struct PollResponse {
    pub message: &'static str,
    #[serde(flatten)]
    pub summary: RunSummary,
}

impl From<RunSummary> for PollResponse {
    fn from(summary: RunSummary) -> Self {
        let message = if summary.processed == 0 {
            "No active shipments"
        } else {
            "Sync complete"
        };
        Self { message, summary }
    }
}

/// Load configuration for the Lambda environment.
///
/// Storage is always S3 here; everything else follows the config file (if
/// bundled) and environment overrides.
pub fn load_config() -> Result<Config> {
    let mut config = match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) => Config::load(path)?,
        Err(_) => Config::default(),
    };
    config.apply_env_overrides();
    config.storage.backend = StorageBackend::S3;
    config.validate()?;
    Ok(config)
}

/// Build the reconciler used for every invocation of this container.
pub async fn build_reconciler(config: &Config) -> Result<Reconciler> {
    let store = S3Store::from_config(&config.storage).await;
    Reconciler::from_config(config, Arc::new(store), true)
}

/// Main Lambda handler function.
#[instrument(skip_all)]
pub async fn handler(
    reconciler: &Reconciler,
    event: LambdaEvent<Value>,
) -> std::result::Result<PollResponse, LambdaError> {
    let (payload, context) = event.into_parts();
    info!(
        request_id = %context.request_id,
        source = payload.get("source").and_then(Value::as_str).unwrap_or("direct"),
        "Scheduled reconciliation invoked"
    );

    match reconciler.run().await {
        Ok(summary) => Ok(summary.into()),
        Err(e) => {
            error!(error = %e, "Reconciliation failed");
            Err(e.into())
        }
    }
}
