//! ShipTrack CLI
//!
//! Local execution entry point. For AWS Lambda, use `shiptrack-lambda`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use shiptrack::{
    carriers::CarrierRegistry,
    error::{AppError, Result},
    models::{Carrier, Config, StorageBackend},
    pipeline::Reconciler,
    storage::{LocalStore, ShipmentStore},
    utils::http,
};

/// ShipTrack - ocean freight shipment tracker
#[derive(Parser, Debug)]
#[command(
    name = "shiptrack",
    version,
    about = "Reconciles shipments against carrier tracking APIs"
)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "storage/config.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile all active shipments once
    Run {
        /// Log status changes instead of sending mail
        #[arg(long)]
        no_notify: bool,
    },

    /// Serve the HTTP trigger and run the cron scheduler
    #[cfg(feature = "server")]
    Serve,

    /// Query one carrier for a tracking number and print the snapshot
    Fetch {
        /// Carrier (maersk, hmm)
        carrier: Carrier,

        /// Container or tracking number
        tracking_number: String,
    },

    /// Validate configuration
    Validate,

    /// Show active shipment counts
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Open the configured document store.
async fn open_store(config: &Config) -> Result<Arc<dyn ShipmentStore>> {
    match config.storage.backend {
        StorageBackend::Local => {
            log::info!("Using local store at {}", config.storage.root.display());
            Ok(Arc::new(LocalStore::new(&config.storage.root)))
        }
        #[cfg(feature = "s3")]
        StorageBackend::S3 => {
            log::info!(
                "Using S3 store at s3://{}/{}",
                config.storage.bucket,
                config.storage.prefix
            );
            let store = shiptrack::storage::s3::S3Store::from_config(&config.storage).await;
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "s3"))]
        StorageBackend::S3 => Err(AppError::config(
            "storage.backend = \"s3\" requires the `s3` feature",
        )),
    }
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = Config::load_or_default(&cli.config);
    config.apply_env_overrides();

    log::info!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Command::Run { no_notify } => {
            config.validate()?;
            let store = open_store(&config).await?;
            let reconciler = Reconciler::from_config(&config, store, !no_notify)?;

            let summary = reconciler.run().await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        #[cfg(feature = "server")]
        Command::Serve => {
            config.validate()?;
            let store = open_store(&config).await?;
            let reconciler = Arc::new(Reconciler::from_config(&config, store, true)?);

            let shutdown = async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    log::error!("Failed to listen for shutdown signal: {}", e);
                }
            };
            shiptrack::trigger::serve(&config, reconciler, shutdown).await?;
        }

        Command::Fetch {
            carrier,
            tracking_number,
        } => {
            let client = http::create_async_client(&config.tracker)?;
            let registry = CarrierRegistry::from_config(&config, client);

            match registry.fetch_status(carrier, &tracking_number).await? {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => {
                    return Err(AppError::carrier(
                        carrier,
                        "no adapter or API key configured",
                    ));
                }
            }
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            for (name, endpoint) in [
                ("maersk", &config.carriers.maersk),
                ("hmm", &config.carriers.hmm),
            ] {
                if endpoint.api_key().is_none() {
                    log::warn!(
                        "{} is not set; {} shipments will be skipped",
                        endpoint.api_key_env,
                        name
                    );
                }
            }
            if config.mail.api_key().is_none() {
                log::warn!(
                    "{} is not set; notifications are disabled",
                    config.mail.api_key_env
                );
            }

            log::info!("All validations passed!");
        }

        Command::Info => {
            let store = open_store(&config).await?;
            let active = store.list_active().await?;
            let shipments = &active.shipments;

            let mut per_carrier: BTreeMap<&str, usize> = BTreeMap::new();
            let mut per_status: BTreeMap<&str, usize> = BTreeMap::new();
            for shipment in shipments {
                *per_carrier.entry(shipment.carrier.as_str()).or_default() += 1;
                *per_status.entry(shipment.status.as_str()).or_default() += 1;
            }

            log::info!("Active shipments: {}", shipments.len());
            if !active.unreadable.is_empty() {
                log::warn!(
                    "Unreadable shipment records: {}",
                    active.unreadable.join(", ")
                );
            }
            for (carrier, count) in &per_carrier {
                log::info!("  {:<8} {}", carrier, count);
            }
            for (status, count) in &per_status {
                log::info!("  {:<16} {}", status, count);
            }
        }
    }

    Ok(())
}
