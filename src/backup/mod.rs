//! Periodic database backup.
//!
//! A usage example of the host's task scheduling: sleep until the next
//! backup is due, serialize the database snapshot to JSON, upload it to the
//! backup channel, repeat. The period is persisted and can be reconfigured
//! while the job runs; unexpected errors log and back off.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};
use thiserror::Error;
use tokio::time::sleep;

use crate::host::{Client, Database};

/// Database owner key for the backup job's state.
const DB_OWNER: &str = "Backup";

/// Poll interval while no period is configured yet.
const UNCONFIGURED_WAIT: Duration = Duration::from_secs(3);

/// Back-off after an unexpected backup failure.
const ERROR_BACKOFF: Duration = Duration::from_secs(60);

/// A configured backup cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Period {
    /// Automatic backups are off.
    Disabled,
    /// Backup every this many seconds.
    Every(u64),
}

/// Rejected backup period configuration.
#[derive(Debug, Error)]
#[error("backup period must be 0..200 hours")]
pub struct InvalidPeriod;

/// The periodic database-backup job.
pub struct BackupJob {
    db: Arc<dyn Database>,
    client: Arc<dyn Client>,
    /// Channel the backup documents are uploaded to.
    channel_id: i64,
    /// File name prefix, conventionally the host's name.
    prefix: String,
}

impl BackupJob {
    /// Create a backup job uploading to `channel_id`.
    pub fn new(
        db: Arc<dyn Database>,
        client: Arc<dyn Client>,
        channel_id: i64,
        prefix: impl Into<String>,
    ) -> Self {
        Self { db, client, channel_id, prefix: prefix.into() }
    }

    /// Configure the backup period in hours. Zero disables automatic
    /// backups; values of 200 hours or more are rejected.
    pub fn set_period_hours(&self, hours: u64) -> Result<Period, InvalidPeriod> {
        if hours >= 200 {
            return Err(InvalidPeriod);
        }

        if hours == 0 {
            self.db.set(DB_OWNER, "period", serde_json::json!("disabled"));
            return Ok(Period::Disabled);
        }

        let secs = hours * 60 * 60;
        self.db.set(DB_OWNER, "period", serde_json::json!(secs));
        self.db.set(DB_OWNER, "last_backup", serde_json::json!(unix_now()));
        Ok(Period::Every(secs))
    }

    /// The persisted period, or `None` if never configured.
    pub fn period(&self) -> Option<Period> {
        let value = self.db.get(DB_OWNER, "period")?;

        if value == serde_json::json!("disabled") {
            return Some(Period::Disabled);
        }

        value.as_u64().map(Period::Every)
    }

    /// Run the backup loop until the period is set to disabled.
    pub async fn run(&self) {
        loop {
            let period = match self.period() {
                None => {
                    sleep(UNCONFIGURED_WAIT).await;
                    continue;
                }
                Some(Period::Disabled) => break,
                Some(Period::Every(secs)) => secs,
            };

            let last: Option<u64> = self
                .db
                .get(DB_OWNER, "last_backup")
                .and_then(|v| v.as_u64());

            let Some(last) = last else {
                self.db
                    .set(DB_OWNER, "last_backup", serde_json::json!(unix_now()));
                sleep(Duration::from_secs(period)).await;
                continue;
            };

            sleep(sleep_before_backup(last, period, unix_now())).await;

            // The period may have been disabled while we slept.
            if self.period() == Some(Period::Disabled) {
                break;
            }

            match self.backup_once().await {
                Ok(()) => {
                    self.db
                        .set(DB_OWNER, "last_backup", serde_json::json!(unix_now()));
                }
                Err(err) => {
                    tracing::error!(error = %err, "database backup failed");
                    sleep(ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Serialize the database snapshot and upload it to the backup channel.
    pub async fn backup_once(&self) -> anyhow::Result<()> {
        let snapshot = self.db.snapshot();
        let bytes = serde_json::to_vec(&snapshot)?;
        let name = backup_file_name(&self.prefix, Local::now());

        self.client
            .upload_document(self.channel_id, &name, bytes)
            .await
    }
}

/// How long to sleep before the next backup is due.
fn sleep_before_backup(last: u64, period: u64, now: u64) -> Duration {
    Duration::from_secs((last + period).saturating_sub(now))
}

/// Timestamped backup file name.
fn backup_file_name(prefix: &str, now: DateTime<Local>) -> String {
    format!("{prefix}-db-backup-{}.json", now.format("%d-%m-%Y-%H-%M"))
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
