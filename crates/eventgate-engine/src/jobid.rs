//! Monotonic job-ID source.
//!
//! Job IDs label every resource created by one `applyResources` call so
//! operators can trace a rollout back to the event that produced it.
//! The format is `YYYYMMDDHHMMSSd` (UTC, `d` = tenths of a second), so
//! uniqueness requires spacing calls at least 100 ms apart: a caller
//! that arrives inside the quantum sleeps until it elapses. At most ~10
//! IDs per second per process.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

pub struct JobIdSource {
    last: Mutex<DateTime<Utc>>,
}

impl Default for JobIdSource {
    fn default() -> Self {
        Self::new()
    }
}

impl JobIdSource {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(Utc::now() - chrono::Duration::milliseconds(200)),
        }
    }

    /// Next job ID. May sleep up to 100 ms per concurrent caller.
    pub async fn next(&self) -> String {
        loop {
            {
                let mut last = self.last.lock();
                let now = Utc::now();
                if now.signed_duration_since(*last) >= chrono::Duration::milliseconds(100) {
                    *last = now;
                    return format_job_id(&now);
                }
            }
            // Inside the quantum of the previous ID; wait it out. The
            // lock is NOT held across the sleep.
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

fn format_job_id(now: &DateTime<Utc>) -> String {
    format!(
        "{}{}",
        now.format("%Y%m%d%H%M%S"),
        now.timestamp_subsec_millis() / 100
    )
}
