//! Daily draw counter reset.
//!
//! Workers' quotas roll over at local midnight in a configured timezone.
//! The loop checks the local date once a minute and resets every counter
//! when it changes. The date seen at start-up counts as already reset, so
//! a restart never zeroes counters mid-day.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use tokio_util::sync::CancellationToken;

use crate::pool::WorkerPool;

/// How often the local date is checked.
const CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Calendar date of `now` at `offset_minutes` east of UTC. Offsets outside
/// ±24h fall back to UTC.
pub fn local_date(now: DateTime<Utc>, offset_minutes: i32) -> NaiveDate {
    match FixedOffset::east_opt(offset_minutes.saturating_mul(60)) {
        Some(offset) => now.with_timezone(&offset).date_naive(),
        None => now.date_naive(),
    }
}

/// Run the reset loop until `cancel` is triggered.
pub async fn run(pool: Arc<WorkerPool>, offset_minutes: i32, cancel: CancellationToken) {
    let mut last_reset = local_date(Utc::now(), offset_minutes);
    tracing::info!(
        offset_minutes,
        today = %last_reset,
        "Quota reset job started"
    );

    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Quota reset job stopping");
                break;
            }
            _ = interval.tick() => {
                let today = local_date(Utc::now(), offset_minutes);
                if today == last_reset {
                    continue;
                }
                match pool.reset_daily_counters().await {
                    Ok(touched) => {
                        tracing::info!(date = %today, touched, "Quota reset: new day");
                        last_reset = today;
                    }
                    Err(e) => {
                        // Retried on the next tick.
                        tracing::error!(error = %e, "Quota reset failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn date_rolls_over_at_local_midnight() {
        // 15:59 UTC is 23:59 at UTC+8; a minute later it is the next day.
        let before = Utc.with_ymd_and_hms(2024, 3, 1, 15, 59, 0).unwrap();
        let after = Utc.with_ymd_and_hms(2024, 3, 1, 16, 0, 0).unwrap();
        assert_eq!(local_date(before, 480), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(local_date(after, 480), NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        assert_eq!(local_date(after, 0), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn negative_and_invalid_offsets() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 2, 0, 0).unwrap();
        assert_eq!(local_date(t, -300), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
        assert_eq!(local_date(t, 100_000), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }
}
