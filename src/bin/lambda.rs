//! AWS Lambda entry point for ShipTrack
//!
//! Deploy with `cargo lambda build --release --features lambda` and attach an
//! EventBridge schedule (`cron(0/30 * * * ? *)`).

use lambda_runtime::{Error as LambdaError, LambdaEvent, service_fn};

use serde_json::Value;
use shiptrack::lambda::{build_reconciler, handler, load_config};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the AWS Lambda function.
#[tokio::main]
async fn main() -> Result<(), LambdaError> {
    let config = load_config()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("ShipTrack Lambda starting...");
    let reconciler = build_reconciler(&config).await?;
    let reconciler = &reconciler;

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| async move {
        handler(reconciler, event).await
    }))
    .await
}
