//! Cron-driven reconciliation loop.

use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule;
use tracing::{error, info, warn};

use crate::error::{AppError, Result};
use crate::models::ScheduleConfig;
use crate::pipeline::Reconciler;

/// A cron expression evaluated in a fixed IANA timezone.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    expression: String,
    schedule: Schedule,
    timezone: Tz,
}

impl CronSchedule {
    pub fn new(expression: &str, timezone: &str) -> Result<Self> {
        let schedule = Schedule::from_str(expression)
            .map_err(|e| AppError::config(format!("invalid cron expression '{expression}': {e}")))?;
        let timezone: Tz = timezone
            .parse()
            .map_err(|_| AppError::config(format!("invalid timezone: {timezone}")))?;

        Ok(Self {
            expression: expression.to_string(),
            schedule,
            timezone,
        })
    }

    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Self::new(&config.cron, &config.timezone)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// First tick strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let now_tz = now.with_timezone(&self.timezone);
        self.schedule
            .after(&now_tz)
            .next()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Runs the reconciliation job on every tick of a [`CronSchedule`].
pub struct Scheduler {
    schedule: CronSchedule,
    reconciler: Arc<Reconciler>,
}

impl Scheduler {
    pub fn new(schedule: CronSchedule, reconciler: Arc<Reconciler>) -> Self {
        Self {
            schedule,
            reconciler,
        }
    }

    /// Loop until `shutdown` resolves. A failed run is logged and the next
    /// tick proceeds as usual.
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);

        info!(
            cron = self.schedule.expression(),
            timezone = %self.schedule.timezone(),
            "Scheduler started"
        );

        loop {
            let now = Utc::now();
            let Some(next) = self.schedule.next_after(now) else {
                warn!(cron = self.schedule.expression(), "Schedule has no upcoming ticks");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            info!(next_run = %next, "Next reconciliation scheduled");

            tokio::select! {
                _ = &mut shutdown => {
                    info!("Scheduler stopping");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }

            match self.reconciler.run().await {
                Ok(summary) => info!(
                    processed = summary.processed,
                    updated = summary.updated,
                    failed = summary.failed,
                    "Scheduled reconciliation complete"
                ),
                Err(e) => error!(error = %e, "Scheduled reconciliation failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::carriers::CarrierRegistry;
    use crate::notify::LogNotifier;
    use crate::pipeline::ReconcileOptions;
    use crate::storage::MemoryStore;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_default_schedule_every_half_hour() {
        let schedule = CronSchedule::from_config(&ScheduleConfig::default()).unwrap();
        let next = schedule.next_after(utc("2024-03-01T00:10:00Z")).unwrap();
        assert_eq!(next, utc("2024-03-01T00:30:00Z"));

        let next = schedule.next_after(utc("2024-03-01T00:30:00Z")).unwrap();
        assert_eq!(next, utc("2024-03-01T01:00:00Z"));
    }

    #[test]
    fn test_schedule_evaluated_in_timezone() {
        // 09:00 in Seoul is 00:00 UTC
        let schedule = CronSchedule::new("0 0 9 * * *", "Asia/Seoul").unwrap();
        let next = schedule.next_after(utc("2024-03-01T12:00:00Z")).unwrap();
        assert_eq!(next, utc("2024-03-02T00:00:00Z"));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(CronSchedule::new("every half hour", "Asia/Seoul").is_err());
        assert!(CronSchedule::new("0 */30 * * * *", "Mars/Olympus").is_err());
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let reconciler = Reconciler::new(
            Arc::new(MemoryStore::new()),
            Arc::new(CarrierRegistry::new()),
            Arc::new(LogNotifier),
            ReconcileOptions::default(),
        );
        let schedule = CronSchedule::new("0 0 0 1 1 *", "UTC").unwrap();
        let scheduler = Scheduler::new(schedule, Arc::new(reconciler));

        let stopped =
            tokio::time::timeout(Duration::from_secs(5), scheduler.run(async {})).await;
        assert!(stopped.is_ok());
    }
}
