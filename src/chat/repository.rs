//! Durable chat log backed by SQLite.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::{debug, instrument};

use super::models::{Attachment, ChatMessage, MessageKind, MessageRow};

/// Maximum number of messages returned by one history page.
pub const HISTORY_PAGE_SIZE: i64 = 20;

/// What a purge removed from the log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeOutcome {
    /// Number of message rows deleted.
    pub messages: u64,
    /// Attachment rows deleted; their blobs still exist on disk.
    pub attachments: Vec<Attachment>,
}

/// Repository for message and attachment rows.
#[derive(Debug, Clone)]
pub struct ChatRepository {
    pool: SqlitePool,
}

impl ChatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Append a text message to the log.
    #[instrument(skip(self, content))]
    pub async fn append_text(
        &self,
        nickname: &str,
        content: &str,
        at: DateTime<Utc>,
    ) -> Result<ChatMessage> {
        let created_at = at.timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO messages (nickname, content, kind, file_id, created_at)
            VALUES (?, ?, 'text', NULL, ?)
            "#,
        )
        .bind(nickname)
        .bind(content)
        .bind(created_at)
        .execute(&self.pool)
        .await
        .context("inserting text message")?;

        let message = ChatMessage {
            id: result.last_insert_rowid(),
            nickname: nickname.to_string(),
            content: content.to_string(),
            kind: MessageKind::Text,
            file_id: None,
            timestamp: super::models::truncate_millis(at),
        };
        debug!("Appended text message {}", message.id);
        Ok(message)
    }

    /// Append an attachment and the file message referencing it as one
    /// transaction. Nothing is written if either insert fails.
    #[instrument(skip(self))]
    pub async fn append_file(
        &self,
        nickname: &str,
        original_name: &str,
        stored_name: &str,
        at: DateTime<Utc>,
    ) -> Result<(ChatMessage, Attachment)> {
        let created_at = at.timestamp_millis();
        let mut tx = self.pool.begin().await.context("beginning file transaction")?;

        let attachment_id = sqlx::query(
            r#"
            INSERT INTO attachments (original_name, stored_name)
            VALUES (?, ?)
            "#,
        )
        .bind(original_name)
        .bind(stored_name)
        .execute(&mut *tx)
        .await
        .context("inserting attachment")?
        .last_insert_rowid();

        let message_id = sqlx::query(
            r#"
            INSERT INTO messages (nickname, content, kind, file_id, created_at)
            VALUES (?, ?, 'file', ?, ?)
            "#,
        )
        .bind(nickname)
        .bind(original_name)
        .bind(attachment_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await
        .context("inserting file message")?
        .last_insert_rowid();

        tx.commit().await.context("committing file transaction")?;

        let attachment = Attachment {
            id: attachment_id,
            original_name: original_name.to_string(),
            stored_name: stored_name.to_string(),
        };
        let message = ChatMessage {
            id: message_id,
            nickname: nickname.to_string(),
            content: original_name.to_string(),
            kind: MessageKind::File,
            file_id: Some(attachment_id),
            timestamp: super::models::truncate_millis(at),
        };
        debug!(
            "Appended file message {} with attachment {}",
            message.id, attachment.id
        );
        Ok((message, attachment))
    }

    /// One page of history in descending id order, optionally restricted to
    /// ids strictly below `before`.
    #[instrument(skip(self))]
    pub async fn history(&self, before: Option<i64>, limit: i64) -> Result<Vec<ChatMessage>> {
        let rows = match before {
            Some(cursor) => {
                sqlx::query_as::<_, MessageRow>(
                    r#"
                    SELECT id, nickname, content, kind, file_id, created_at
                    FROM messages
                    WHERE id < ?
                    ORDER BY id DESC
                    LIMIT ?
                    "#,
                )
                .bind(cursor)
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, MessageRow>(
                    r#"
                    SELECT id, nickname, content, kind, file_id, created_at
                    FROM messages
                    ORDER BY id DESC
                    LIMIT ?
                    "#,
                )
                .bind(limit)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("fetching message history")?;

        rows.into_iter().map(ChatMessage::try_from).collect()
    }

    /// Look up an attachment by id.
    #[instrument(skip(self))]
    pub async fn attachment(&self, id: i64) -> Result<Option<Attachment>> {
        let attachment = sqlx::query_as::<_, Attachment>(
            r#"
            SELECT id, original_name, stored_name
            FROM attachments
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("fetching attachment")?;

        Ok(attachment)
    }

    /// Delete every message created before `cutoff`, then the attachments
    /// that only those messages referenced, in one transaction.
    #[instrument(skip(self))]
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<PurgeOutcome> {
        let cutoff_ms = cutoff.timestamp_millis();
        let mut tx = self.pool.begin().await.context("beginning purge transaction")?;

        let attachments = sqlx::query_as::<_, Attachment>(
            r#"
            SELECT DISTINCT a.id, a.original_name, a.stored_name
            FROM attachments a
            JOIN messages m ON m.file_id = a.id
            WHERE m.kind = 'file' AND m.created_at < ?
            ORDER BY a.id
            "#,
        )
        .bind(cutoff_ms)
        .fetch_all(&mut *tx)
        .await
        .context("selecting expired attachments")?;

        // Messages first so no surviving row points at a deleted attachment.
        let messages = sqlx::query("DELETE FROM messages WHERE created_at < ?")
            .bind(cutoff_ms)
            .execute(&mut *tx)
            .await
            .context("deleting expired messages")?
            .rows_affected();

        let mut removed = Vec::with_capacity(attachments.len());
        if !attachments.is_empty() {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM attachments WHERE id IN (");
            let mut ids = query.separated(", ");
            for attachment in &attachments {
                ids.push_bind(attachment.id);
            }
            ids.push_unseparated(")");
            query.push(
                " AND id NOT IN (SELECT file_id FROM messages WHERE file_id IS NOT NULL) RETURNING id",
            );

            let deleted: Vec<(i64,)> = query
                .build_query_as()
                .fetch_all(&mut *tx)
                .await
                .context("deleting expired attachments")?;

            removed = attachments
                .into_iter()
                .filter(|a| deleted.iter().any(|(id,)| *id == a.id))
                .collect();
        }

        tx.commit().await.context("committing purge transaction")?;

        Ok(PurgeOutcome {
            messages,
            attachments: removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use chrono::Duration;

    async fn repo() -> ChatRepository {
        let db = Database::in_memory().await.unwrap();
        ChatRepository::new(db.pool().clone())
    }

    async fn count(repo: &ChatRepository, table: &str) -> i64 {
        let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(repo.pool())
            .await
            .unwrap();
        n
    }

    #[tokio::test]
    async fn test_ids_strictly_increase() {
        let repo = repo().await;
        let mut last = 0;
        for i in 0..5 {
            let msg = repo
                .append_text("alice", &format!("m{i}"), Utc::now())
                .await
                .unwrap();
            assert!(msg.id > last);
            last = msg.id;
        }
    }

    #[tokio::test]
    async fn test_history_pages_backwards() {
        let repo = repo().await;
        for i in 1..=21 {
            repo.append_text("alice", &format!("m{i}"), Utc::now())
                .await
                .unwrap();
        }

        let first = repo.history(None, HISTORY_PAGE_SIZE).await.unwrap();
        assert_eq!(first.len(), 20);
        assert!(first.windows(2).all(|w| w[0].id > w[1].id));
        assert_eq!(first[0].content, "m21");

        let cursor = first.last().unwrap().id;
        let second = repo.history(Some(cursor), HISTORY_PAGE_SIZE).await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].content, "m1");
    }

    #[tokio::test]
    async fn test_append_file_links_attachment() {
        let repo = repo().await;
        let (msg, attachment) = repo
            .append_file("bob", "report.pdf", "1700000000000000000.pdf", Utc::now())
            .await
            .unwrap();

        assert_eq!(msg.kind, MessageKind::File);
        assert_eq!(msg.file_id, Some(attachment.id));
        assert_eq!(msg.content, "report.pdf");

        let stored = repo.attachment(attachment.id).await.unwrap().unwrap();
        assert_eq!(stored, attachment);
    }

    #[tokio::test]
    async fn test_append_file_rolls_back_when_message_insert_fails() {
        let repo = repo().await;
        sqlx::raw_sql(
            r#"
            CREATE TRIGGER abort_file_messages BEFORE INSERT ON messages
            WHEN NEW.kind = 'file'
            BEGIN
                SELECT RAISE(ABORT, 'forced abort');
            END;
            "#,
        )
        .execute(repo.pool())
        .await
        .unwrap();

        let result = repo
            .append_file("bob", "report.pdf", "1.pdf", Utc::now())
            .await;
        assert!(result.is_err());
        assert_eq!(count(&repo, "attachments").await, 0);
        assert_eq!(count(&repo, "messages").await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_stored_name_is_rejected() {
        let repo = repo().await;
        repo.append_file("bob", "a.txt", "1.txt", Utc::now())
            .await
            .unwrap();
        assert!(
            repo.append_file("bob", "b.txt", "1.txt", Utc::now())
                .await
                .is_err()
        );
        assert_eq!(count(&repo, "messages").await, 1);
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_rows() {
        let repo = repo().await;
        let now = Utc::now();
        let old = now - Duration::days(8);

        repo.append_text("alice", "old text", old).await.unwrap();
        let (_, old_file) = repo
            .append_file("bob", "old.pdf", "100.pdf", old)
            .await
            .unwrap();
        let fresh = repo.append_text("alice", "new text", now).await.unwrap();
        let (_, fresh_file) = repo
            .append_file("bob", "new.pdf", "200.pdf", now)
            .await
            .unwrap();

        let outcome = repo
            .purge_older_than(now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(outcome.messages, 2);
        assert_eq!(outcome.attachments, vec![old_file.clone()]);

        assert!(repo.attachment(old_file.id).await.unwrap().is_none());
        assert!(repo.attachment(fresh_file.id).await.unwrap().is_some());
        let remaining = repo.history(None, HISTORY_PAGE_SIZE).await.unwrap();
        assert_eq!(remaining.len(), 2);
        assert!(remaining.iter().any(|m| m.id == fresh.id));

        let again = repo
            .purge_older_than(now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(again, PurgeOutcome::default());
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_purge() {
        let repo = repo().await;
        let old = Utc::now() - Duration::days(30);
        let last = repo.append_text("alice", "gone", old).await.unwrap();
        repo.purge_older_than(Utc::now()).await.unwrap();

        let next = repo.append_text("alice", "here", Utc::now()).await.unwrap();
        assert!(next.id > last.id);
    }
}
