use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Days, TimeZone, Utc};
use chrono_tz::Tz;
use tokio::task::JoinHandle;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::orchestrator::{SyncOrchestrator, SyncOutcome};

/// Local hours at which a sync starts.
pub const SYNC_SLOTS: [u32; 4] = [0, 6, 12, 18];

/// Six-field cron for the slots, evaluated in the configured time zone.
pub const SYNC_CRON: &str = "0 0 0,6,12,18 * * *";

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Europe::Rome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    pub timezone: Tz,
    pub startup_delay: Duration,
}

/// IANA zone name such as `Europe/Rome` or `UTC`.
pub fn parse_timezone(raw: &str) -> Result<Tz> {
    raw.trim()
        .parse::<Tz>()
        .map_err(|err| anyhow!("unknown time zone `{}`: {err}", raw.trim()))
}

/// First sync slot strictly after `after`, following the zone's daylight saving rules.
pub fn next_sync_after(timezone: Tz, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let local_day = after.with_timezone(&timezone).date_naive();
    (0..=2u64)
        .filter_map(|offset| local_day.checked_add_days(Days::new(offset)))
        .flat_map(|day| SYNC_SLOTS.iter().filter_map(move |hour| day.and_hms_opt(*hour, 0, 0)))
        .filter_map(|naive| timezone.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
        .find(|slot| *slot > after)
}

async fn run_and_log(orchestrator: &SyncOrchestrator, trigger: &str) {
    match orchestrator.run_once().await {
        Ok(SyncOutcome::Completed(stats)) => info!(
            trigger,
            run_id = %stats.run_id,
            scanned = stats.scanned,
            created = stats.created,
            updated = stats.updated,
            price_drops = stats.price_drops,
            errors = stats.errors,
            "scheduled sync finished"
        ),
        Ok(SyncOutcome::Skipped) => info!(trigger, "sync already running, skipped"),
        Err(err) => error!(trigger, error = %format!("{err:#}"), "sync run failed"),
    }
}

/// Build (but do not start) the recurring sync job.
pub async fn build_scheduler(
    orchestrator: Arc<SyncOrchestrator>,
    config: &ScheduleConfig,
) -> Result<JobScheduler> {
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async_tz(SYNC_CRON, config.timezone, move |_uuid, _l| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            run_and_log(&orchestrator, "cron").await;
        })
    })
    .with_context(|| format!("creating cron job {SYNC_CRON}"))?;
    sched.add(job).await.context("adding sync job")?;

    let next = next_sync_after(config.timezone, Utc::now());
    info!(
        cron = SYNC_CRON,
        timezone = %config.timezone,
        next = ?next,
        "sync scheduler configured"
    );
    Ok(sched)
}

/// One run shortly after startup.
pub fn spawn_startup_run(orchestrator: Arc<SyncOrchestrator>, delay: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        info!("running initial sync");
        run_and_log(&orchestrator, "startup").await;
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn zones_parse_by_iana_name() {
        assert_eq!(parse_timezone("Europe/Rome").unwrap(), chrono_tz::Europe::Rome);
        assert_eq!(parse_timezone(" UTC ").unwrap(), chrono_tz::UTC);
        assert!(parse_timezone("+01:00").is_err());
        assert!(parse_timezone("Mars/Olympus").is_err());
    }

    #[test]
    fn winter_slots_are_one_hour_ahead_of_utc() {
        let next = next_sync_after(DEFAULT_TIMEZONE, utc("2025-01-15T03:00:00Z"));
        assert_eq!(next, Some(utc("2025-01-15T05:00:00Z")));
    }

    #[test]
    fn summer_slots_follow_daylight_saving() {
        let next = next_sync_after(DEFAULT_TIMEZONE, utc("2025-07-15T03:00:00Z"));
        assert_eq!(next, Some(utc("2025-07-15T04:00:00Z")));

        // local midnight in summer is 22:00 UTC of the previous day
        let next = next_sync_after(DEFAULT_TIMEZONE, utc("2025-07-15T16:30:00Z"));
        assert_eq!(next, Some(utc("2025-07-15T22:00:00Z")));
    }

    #[test]
    fn slot_instant_itself_is_not_next() {
        let next = next_sync_after(chrono_tz::UTC, utc("2025-03-01T12:00:00Z"));
        assert_eq!(next, Some(utc("2025-03-01T18:00:00Z")));
    }

    #[test]
    fn schedule_spans_the_daylight_saving_switch() {
        // 2025-03-30 02:00 local jumps to 03:00; the 06:00 slot is already CEST
        let next = next_sync_after(DEFAULT_TIMEZONE, utc("2025-03-30T00:30:00Z"));
        assert_eq!(next, Some(utc("2025-03-30T04:00:00Z")));
    }
}
