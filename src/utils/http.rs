// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use crate::error::Result;
use crate::models::TrackerConfig;

/// Create the shared asynchronous HTTP client for carrier and mail calls.
///
/// The timeout bounds each request. The reconciler also bounds each whole
/// adapter call with the same deadline.
pub fn create_async_client(config: &TrackerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.timeout_secs.min(5)))
        .build()?;
    Ok(client)
}
