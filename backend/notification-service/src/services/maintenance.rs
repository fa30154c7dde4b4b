/// Retention sweeper
///
/// Periodically deactivates devices that have not been updated within the
/// retention window and purges read receipts older than it.
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::directory::{DeviceDirectory, ReadReceiptStore};
use crate::error::Result;

/// Longest accepted retention window
pub const MAX_RETENTION_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    pub devices_deactivated: u64,
    pub receipts_purged: u64,
}

pub struct RetentionSweeper {
    directory: Arc<dyn DeviceDirectory>,
    receipts: Arc<dyn ReadReceiptStore>,
    retention: chrono::Duration,
    interval: Duration,
}

impl RetentionSweeper {
    /// `retention_days` is clamped to `1..=MAX_RETENTION_DAYS`
    pub fn new(
        directory: Arc<dyn DeviceDirectory>,
        receipts: Arc<dyn ReadReceiptStore>,
        retention_days: i64,
        interval: Duration,
    ) -> Self {
        Self {
            directory,
            receipts,
            retention: chrono::Duration::days(retention_days.clamp(1, MAX_RETENTION_DAYS)),
            interval,
        }
    }

    /// One sweep relative to `now`
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let cutoff = now - self.retention;
        let devices_deactivated = self.directory.deactivate_stale(cutoff).await?;
        let receipts_purged = self.receipts.purge_before(cutoff).await?;

        let report = SweepReport {
            devices_deactivated,
            receipts_purged,
        };
        if report != SweepReport::default() {
            info!(
                devices_deactivated,
                receipts_purged,
                cutoff = %cutoff,
                "Retention sweep complete"
            );
        }
        Ok(report)
    }

    /// Run forever on a fixed interval; errors are logged and the loop continues
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once(Utc::now()).await {
                    error!(error = %e, "Retention sweep failed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Device;
    use crate::services::directory::InMemoryDirectory;

    #[tokio::test]
    async fn test_sweep_uses_retention_window() {
        let dir = Arc::new(InMemoryDirectory::new());
        let now = Utc::now();

        let mut stale = Device::with_defaults("aa".repeat(32), now);
        stale.last_updated = now - chrono::Duration::days(45);
        dir.insert(stale);
        dir.insert(Device::with_defaults("bb".repeat(32), now));
        dir.insert_receipt(&"bb".repeat(32), "old-post", now - chrono::Duration::days(31));
        dir.insert_receipt(&"bb".repeat(32), "new-post", now);

        let sweeper = RetentionSweeper::new(dir.clone(), dir.clone(), 30, Duration::from_secs(3600));
        let report = sweeper.run_once(now).await.unwrap();

        assert_eq!(
            report,
            SweepReport {
                devices_deactivated: 1,
                receipts_purged: 1
            }
        );
        assert_eq!(dir.receipt_count(), 1);

        // second pass finds nothing left to do
        assert_eq!(sweeper.run_once(now).await.unwrap(), SweepReport::default());
    }

    #[tokio::test]
    async fn test_non_positive_retention_never_sweeps_fresh_devices() {
        let dir = Arc::new(InMemoryDirectory::new());
        let now = Utc::now();
        dir.insert(Device::with_defaults("cc".repeat(32), now));
        dir.insert_receipt(&"cc".repeat(32), "post", now);

        for days in [-1, 0] {
            let sweeper =
                RetentionSweeper::new(dir.clone(), dir.clone(), days, Duration::from_secs(3600));
            assert_eq!(sweeper.run_once(now).await.unwrap(), SweepReport::default());
        }
        assert!(dir.get_device(&"cc".repeat(32)).await.unwrap().unwrap().is_active);
        assert_eq!(dir.receipt_count(), 1);
    }

    #[tokio::test]
    async fn test_huge_retention_is_clamped() {
        let dir = Arc::new(InMemoryDirectory::new());
        let sweeper =
            RetentionSweeper::new(dir.clone(), dir.clone(), i64::MAX, Duration::from_secs(3600));
        assert_eq!(sweeper.run_once(Utc::now()).await.unwrap(), SweepReport::default());
    }
}
