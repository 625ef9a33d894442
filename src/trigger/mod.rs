//! Trigger surfaces for the reconciliation job.
//!
//! - `http`: on-demand `/api/poll` endpoint guarded by a shared secret
//! - `schedule`: in-process cron loop
//!
//! Both call the same [`Reconciler`](crate::pipeline::Reconciler); neither
//! holds a lock across runs, so an on-demand run may overlap a scheduled one.

pub mod http;
pub mod schedule;

pub use http::{TriggerError, TriggerState, router};
pub use schedule::{CronSchedule, Scheduler};

use std::future::Future;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::error::Result;
use crate::models::Config;
use crate::pipeline::Reconciler;

/// Serve the HTTP trigger and run the cron scheduler until `shutdown` resolves.
pub async fn serve(
    config: &Config,
    reconciler: Arc<Reconciler>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let schedule = CronSchedule::from_config(&config.schedule)?;
    let state = TriggerState::new(reconciler.clone(), &config.server);

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let scheduler = Scheduler::new(schedule, reconciler);
    let mut scheduler_stop = stop_rx;
    let scheduler_task = tokio::spawn(async move {
        scheduler
            .run(async move {
                let _ = scheduler_stop.wait_for(|stop| *stop).await;
            })
            .await;
    });

    let listener = TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "HTTP trigger listening");

    let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        shutdown.await;
        let _ = stop_tx.send(true);
    });
    server.await?;

    let _ = scheduler_task.await;
    info!("Trigger surfaces stopped");
    Ok(())
}
