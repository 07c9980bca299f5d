//! Daily schedule

use crate::orchestrator::Orchestrator;
use chrono::{DateTime, Duration as ChronoDuration, Local, NaiveTime, TimeZone};
use std::time::Duration;
use tracing::{info, warn};

/// Upper bound on one sleep of the schedule loop
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// First occurrence of `at` strictly after `now`, in `now`'s time zone
///
/// A time of day skipped by a DST change fires one hour later that day.
pub fn next_run<Tz: TimeZone>(now: &DateTime<Tz>, at: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    loop {
        let naive = date.and_time(at);
        let candidate = tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + ChronoDuration::hours(1))).earliest());
        if let Some(candidate) = candidate {
            if candidate > *now {
                return candidate;
            }
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => return now.clone(),
        };
    }
}

impl Orchestrator {
    /// Runs every source once a day at `at` (local time) until cancelled
    ///
    /// The loop sleeps in slices of at most [`POLL_INTERVAL`] so cancellation
    /// is noticed promptly. A run that overlaps the next trigger simply
    /// delays it: runs are awaited in turn, never stacked.
    pub async fn run_scheduled(&self, at: NaiveTime) {
        let cancel = self.cancel_token();
        let mut next = next_run(&Local::now(), at);
        info!("Scheduler started, next run at {}", next.format("%Y-%m-%d %H:%M"));

        loop {
            let now = Local::now();
            if now >= next {
                match self.run(None).await {
                    Ok(report) => info!("Scheduled run finished: {}", report.one_line()),
                    Err(e) => warn!("Scheduled run failed: {}", e),
                }
                next = next_run(&Local::now(), at);
                info!("Next run at {}", next.format("%Y-%m-%d %H:%M"));
                continue;
            }

            let wait = (next.clone() - now)
                .to_std()
                .unwrap_or(Duration::ZERO)
                .min(POLL_INTERVAL);
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Scheduler stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_next_run_later_today() {
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 1, 30, 0).unwrap();
        assert_eq!(
            next_run(&now, at(3, 0)),
            Utc.with_ymd_and_hms(2024, 3, 10, 3, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_run_rolls_to_tomorrow() {
        let now = Utc.with_ymd_and_hms(2024, 12, 31, 3, 0, 0).unwrap();
        assert_eq!(
            next_run(&now, at(3, 0)),
            Utc.with_ymd_and_hms(2025, 1, 1, 3, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_scheduler_stops_on_cancel() {
        let orchestrator = crate::orchestrator::tests::orchestrator();
        orchestrator.cancel_token().cancel();
        tokio::time::timeout(Duration::from_secs(5), orchestrator.run_scheduled(at(3, 0)))
            .await
            .unwrap();
    }
}
