//! Periodic retention sweep.
//!
//! Deletes messages older than a fixed age together with the attachments
//! they referenced, then removes the attachment blobs. The log is the
//! source of truth: a blob that fails to delete is logged and left behind.

use anyhow::{Result, anyhow};
use serde::Serialize;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::chat::ChatRepository;
use crate::storage::BlobStore;

/// Summary of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub messages_deleted: u64,
    /// Storage names of attachments removed from the log.
    pub stored_names: Vec<String>,
    /// Blobs that could not be deleted.
    pub blobs_failed: usize,
}

/// Rows removed by [`RetentionSweeper::sweep`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub messages_deleted: u64,
    /// Storage names of the deleted attachments.
    pub stored_names: Vec<String>,
}

/// Runs the retention sweep against the chat log and blob store.
#[derive(Clone)]
pub struct RetentionSweeper {
    repo: ChatRepository,
    storage: Arc<dyn BlobStore>,
    max_age: Duration,
}

impl RetentionSweeper {
    pub fn new(repo: ChatRepository, storage: Arc<dyn BlobStore>, max_age: Duration) -> Self {
        Self {
            repo,
            storage,
            max_age,
        }
    }

    /// Durably delete everything older than `older_than` and return the
    /// storage names whose blobs must now be removed.
    pub async fn sweep(&self, older_than: Duration) -> Result<SweepOutcome> {
        let cutoff = cutoff_for(older_than)?;
        let outcome = self.repo.purge_older_than(cutoff).await?;
        info!(
            messages = outcome.messages,
            attachments = outcome.attachments.len(),
            "Purged chat log entries older than {}",
            cutoff
        );
        Ok(SweepOutcome {
            messages_deleted: outcome.messages,
            stored_names: outcome
                .attachments
                .into_iter()
                .map(|a| a.stored_name)
                .collect(),
        })
    }

    /// One full cycle: durable sweep with the configured age, then blob removal.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let outcome = self.sweep(self.max_age).await?;

        let mut blobs_failed = 0;
        for name in &outcome.stored_names {
            if let Err(e) = self.storage.delete(name).await {
                warn!("Failed to delete file {}: {}", name, e);
                blobs_failed += 1;
            }
        }

        let report = SweepReport {
            messages_deleted: outcome.messages_deleted,
            stored_names: outcome.stored_names,
            blobs_failed,
        };
        info!(
            "Cleanup completed. Messages: {}, Files: {}",
            report.messages_deleted,
            report.stored_names.len()
        );
        Ok(report)
    }

    /// Sweep every `period` until `shutdown` fires. The first sweep runs one
    /// period after start.
    pub fn spawn(self, period: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        info!("Starting retention sweep...");
                        if let Err(e) = self.run_once().await {
                            error!("Cleanup failed: {:#}", e);
                        }
                    }
                }
            }
        })
    }
}

/// `now - older_than`, rejecting ages the clock cannot represent.
fn cutoff_for(older_than: Duration) -> Result<DateTime<Utc>> {
    let age = ChronoDuration::from_std(older_than)
        .map_err(|_| anyhow!("retention age {older_than:?} is out of range"))?;
    Utc::now()
        .checked_sub_signed(age)
        .ok_or_else(|| anyhow!("retention age {older_than:?} is out of range"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::HISTORY_PAGE_SIZE;
    use crate::db::Database;
    use crate::storage::LocalStorage;
    use bytes::Bytes;

    const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

    async fn setup() -> (RetentionSweeper, ChatRepository, LocalStorage, tempfile::TempDir) {
        let db = Database::in_memory().await.unwrap();
        let repo = ChatRepository::new(db.pool().clone());
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::new(dir.path());
        let sweeper = RetentionSweeper::new(repo.clone(), Arc::new(storage.clone()), WEEK);
        (sweeper, repo, storage, dir)
    }

    #[tokio::test]
    async fn test_run_once_removes_rows_and_blobs() {
        let (sweeper, repo, storage, dir) = setup().await;
        let old = Utc::now() - ChronoDuration::days(8);

        storage
            .write("1.pdf", Bytes::from_static(b"old"))
            .await
            .unwrap();
        storage
            .write("2.pdf", Bytes::from_static(b"new"))
            .await
            .unwrap();
        repo.append_file("alice", "old.pdf", "1.pdf", old)
            .await
            .unwrap();
        repo.append_text("alice", "old", old).await.unwrap();
        repo.append_file("bob", "new.pdf", "2.pdf", Utc::now())
            .await
            .unwrap();

        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.messages_deleted, 2);
        assert_eq!(report.stored_names, vec!["1.pdf".to_string()]);
        assert_eq!(report.blobs_failed, 0);
        assert!(!dir.path().join("1.pdf").exists());
        assert!(dir.path().join("2.pdf").exists());
        assert_eq!(repo.history(None, HISTORY_PAGE_SIZE).await.unwrap().len(), 1);

        let again = sweeper.run_once().await.unwrap();
        assert_eq!(again, SweepReport::default());
    }

    #[tokio::test]
    async fn test_missing_blob_does_not_fail_sweep() {
        let (sweeper, repo, _storage, _dir) = setup().await;
        let old = Utc::now() - ChronoDuration::days(30);
        let (_, attachment) = repo
            .append_file("alice", "gone.txt", "9.txt", old)
            .await
            .unwrap();

        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.blobs_failed, 1);
        assert!(repo.attachment(attachment.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sweep_returns_names_without_touching_blobs() {
        let (sweeper, repo, storage, dir) = setup().await;
        let old = Utc::now() - ChronoDuration::hours(2);
        storage
            .write("5.bin", Bytes::from_static(b"x"))
            .await
            .unwrap();
        repo.append_file("alice", "x.bin", "5.bin", old)
            .await
            .unwrap();

        let outcome = sweeper.sweep(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(outcome.messages_deleted, 1);
        assert_eq!(outcome.stored_names, vec!["5.bin".to_string()]);
        assert!(dir.path().join("5.bin").exists());
        assert_eq!(
            sweeper.sweep(Duration::from_secs(3600)).await.unwrap(),
            SweepOutcome::default()
        );
    }

    #[tokio::test]
    async fn test_run_once_uses_configured_age() {
        let (_, repo, storage, dir) = setup().await;
        let sweeper = RetentionSweeper::new(
            repo.clone(),
            Arc::new(storage.clone()),
            Duration::from_secs(3600),
        );
        storage
            .write("7.txt", Bytes::from_static(b"x"))
            .await
            .unwrap();
        repo.append_file("alice", "a.txt", "7.txt", Utc::now() - ChronoDuration::hours(2))
            .await
            .unwrap();
        repo.append_text("alice", "fresh", Utc::now()).await.unwrap();

        let report = sweeper.run_once().await.unwrap();
        assert_eq!(report.messages_deleted, 1);
        assert_eq!(report.stored_names, vec!["7.txt".to_string()]);
        assert!(!dir.path().join("7.txt").exists());
    }

    #[tokio::test]
    async fn test_unrepresentable_age_is_an_error() {
        let (_, repo, storage, _dir) = setup().await;
        let sweeper = RetentionSweeper::new(repo, Arc::new(storage), Duration::MAX);
        assert!(sweeper.run_once().await.is_err());
        assert!(cutoff_for(Duration::from_secs(u64::MAX / 2)).is_err());
    }

    #[tokio::test]
    async fn test_spawned_sweeper_stops_on_shutdown() {
        let (sweeper, _repo, _storage, _dir) = setup().await;
        let shutdown = CancellationToken::new();
        let handle = sweeper.spawn(Duration::from_secs(3600), shutdown.clone());
        shutdown.cancel();
        handle.await.unwrap();
    }
}
