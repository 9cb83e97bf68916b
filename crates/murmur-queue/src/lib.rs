//! Durable, tenant-scoped append-only streams with named consumer groups.
//!
//! Entries are appended by producers and consumed at-least-once: a group
//! read claims an entry (recording it on the pending list) and the entry
//! only leaves the pending list on an explicit ack. Unacked entries stay
//! redeliverable via [`MessageQueue::claim_stale`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// One claimed stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub id: i64,
    pub stream: String,
    pub fields: HashMap<String, String>,
}

pub struct MessageQueue {
    conn: Arc<Mutex<Connection>>,
    /// Wakes in-process blocked readers as soon as an entry is appended.
    notify: Arc<Notify>,
}

impl MessageQueue {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            notify: Arc::new(Notify::new()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            notify: Arc::new(Notify::new()),
        })
    }

    /// Append one entry to a stream and return its queue-assigned id.
    /// Pure producer operation: never waits on any consumer.
    pub async fn enqueue(&self, stream: &str, fields: &HashMap<String, String>) -> Result<i64> {
        let encoded = serde_json::to_string(fields)?;
        let id = {
            let conn = self.conn.lock().await;
            conn.execute(
                "INSERT INTO stream_entries (stream, fields, added_at) VALUES (?1, ?2, ?3)",
                params![stream, encoded, Utc::now().to_rfc3339()],
            )?;
            conn.last_insert_rowid()
        };
        tracing::debug!(stream, entry_id = id, "enqueued entry");
        self.notify.notify_waiters();
        Ok(id)
    }

    /// Create a consumer-group cursor at the beginning of the stream.
    /// Idempotent: an existing group is left untouched.
    pub async fn ensure_group(&self, stream: &str, group: &str) -> Result<()> {
        let conn = self.conn.lock().await;
        let created = conn.execute(
            "INSERT OR IGNORE INTO consumer_cursors (stream, grp, last_delivered_id)
             VALUES (?1, ?2, 0)",
            params![stream, group],
        )?;
        if created > 0 {
            tracing::info!(stream, group, "created consumer group");
        }
        Ok(())
    }

    /// Claim at most one new entry from the given streams for this consumer,
    /// waiting up to `block` when nothing is ready. Streams are scanned in
    /// the given order on every pass.
    pub async fn read_group(
        &self,
        group: &str,
        consumer: &str,
        streams: &[String],
        block: Duration,
    ) -> Result<Option<QueueEntry>> {
        let deadline = Instant::now() + block;
        loop {
            for stream in streams {
                if let Some(entry) = self.try_claim_next(stream, group, consumer).await? {
                    return Ok(Some(entry));
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // Wake early on an in-process enqueue; the sleep bounds the wait
            // for entries appended by other processes.
            let nap = (deadline - now).min(Duration::from_millis(250));
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    /// Acknowledge a processed entry, removing it from the pending list.
    /// Returns false when the entry was not pending for this group.
    pub async fn ack(&self, stream: &str, group: &str, entry_id: i64) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM pending_entries WHERE stream = ?1 AND grp = ?2 AND entry_id = ?3",
            params![stream, group, entry_id],
        )?;
        Ok(removed > 0)
    }

    /// Entry ids delivered to this group but not yet acknowledged.
    pub async fn pending(&self, stream: &str, group: &str) -> Result<Vec<i64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT entry_id FROM pending_entries
             WHERE stream = ?1 AND grp = ?2 ORDER BY entry_id",
        )?;
        let rows = stmt.query_map(params![stream, group], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    /// Re-claim the oldest pending entry idle for at least `min_idle`,
    /// transferring it to `consumer`. Redelivery path for entries whose
    /// original processing never acked (crash, rollback).
    pub async fn claim_stale(
        &self,
        group: &str,
        consumer: &str,
        min_idle: Duration,
    ) -> Result<Option<QueueEntry>> {
        let cutoff = Utc::now().timestamp_millis() - min_idle.as_millis() as i64;
        let conn = self.conn.lock().await;
        let found = conn
            .query_row(
                "SELECT p.stream, p.entry_id, e.fields
                 FROM pending_entries p
                 JOIN stream_entries e ON e.id = p.entry_id AND e.stream = p.stream
                 WHERE p.grp = ?1 AND p.delivered_at_ms <= ?2
                 ORDER BY p.entry_id LIMIT 1",
                params![group, cutoff],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((stream, entry_id, encoded)) = found else {
            return Ok(None);
        };

        conn.execute(
            "UPDATE pending_entries SET consumer = ?1, delivered_at_ms = ?2
             WHERE stream = ?3 AND grp = ?4 AND entry_id = ?5",
            params![
                consumer,
                Utc::now().timestamp_millis(),
                stream,
                group,
                entry_id
            ],
        )?;

        let fields =
            serde_json::from_str(&encoded).context("corrupt fields on claimed stream entry")?;
        tracing::warn!(stream, entry_id, consumer, "re-claimed stale pending entry");
        Ok(Some(QueueEntry {
            id: entry_id,
            stream,
            fields,
        }))
    }

    /// Claim the next entry past the group cursor for one stream: advance
    /// the cursor and record the entry as pending, atomically.
    async fn try_claim_next(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<Option<QueueEntry>> {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let cursor: Option<i64> = tx
            .query_row(
                "SELECT last_delivered_id FROM consumer_cursors WHERE stream = ?1 AND grp = ?2",
                params![stream, group],
                |row| row.get(0),
            )
            .optional()?;
        let Some(cursor) = cursor else {
            // No group for this stream; nothing to claim.
            return Ok(None);
        };

        let next = tx
            .query_row(
                "SELECT id, fields FROM stream_entries
                 WHERE stream = ?1 AND id > ?2 ORDER BY id LIMIT 1",
                params![stream, cursor],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((entry_id, encoded)) = next else {
            return Ok(None);
        };

        tx.execute(
            "UPDATE consumer_cursors SET last_delivered_id = ?1 WHERE stream = ?2 AND grp = ?3",
            params![entry_id, stream, group],
        )?;
        tx.execute(
            "INSERT OR REPLACE INTO pending_entries
             (stream, grp, entry_id, consumer, delivered_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                stream,
                group,
                entry_id,
                consumer,
                Utc::now().timestamp_millis()
            ],
        )?;
        tx.commit()?;

        let fields = serde_json::from_str(&encoded).context("corrupt fields on stream entry")?;
        Ok(Some(QueueEntry {
            id: entry_id,
            stream: stream.to_string(),
            fields,
        }))
    }
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS stream_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            stream TEXT NOT NULL,
            fields TEXT NOT NULL,
            added_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS consumer_cursors (
            stream TEXT NOT NULL,
            grp TEXT NOT NULL,
            last_delivered_id INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (stream, grp)
        );

        CREATE TABLE IF NOT EXISTS pending_entries (
            stream TEXT NOT NULL,
            grp TEXT NOT NULL,
            entry_id INTEGER NOT NULL,
            consumer TEXT NOT NULL,
            delivered_at_ms INTEGER NOT NULL,
            PRIMARY KEY (stream, grp, entry_id)
        );

        CREATE INDEX IF NOT EXISTS idx_stream_entries_stream ON stream_entries(stream, id);
        "#,
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fields(content: &str) -> HashMap<String, String> {
        HashMap::from([("content".to_string(), content.to_string())])
    }

    #[tokio::test]
    async fn enqueue_returns_monotonic_ids() {
        let queue = MessageQueue::open_in_memory().unwrap();
        let a = queue.enqueue("messages:1", &fields("a")).await.unwrap();
        let b = queue.enqueue("messages:1", &fields("b")).await.unwrap();
        assert!(b > a);
    }

    #[tokio::test]
    async fn ensure_group_is_idempotent() {
        let queue = MessageQueue::open_in_memory().unwrap();
        queue.ensure_group("messages:1", "workers").await.unwrap();
        queue.ensure_group("messages:1", "workers").await.unwrap();
    }

    #[tokio::test]
    async fn group_sees_entries_enqueued_before_creation() {
        let queue = MessageQueue::open_in_memory().unwrap();
        queue.enqueue("messages:1", &fields("early")).await.unwrap();
        queue.ensure_group("messages:1", "workers").await.unwrap();

        let entry = queue
            .read_group("workers", "w1", &["messages:1".into()], Duration::ZERO)
            .await
            .unwrap()
            .expect("entry enqueued before group creation is delivered");
        assert_eq!(entry.fields["content"], "early");
    }

    #[tokio::test]
    async fn read_preserves_order_within_stream() {
        let queue = MessageQueue::open_in_memory().unwrap();
        queue.ensure_group("messages:1", "workers").await.unwrap();
        for content in ["one", "two", "three"] {
            queue.enqueue("messages:1", &fields(content)).await.unwrap();
        }

        let streams = vec!["messages:1".to_string()];
        for expected in ["one", "two", "three"] {
            let entry = queue
                .read_group("workers", "w1", &streams, Duration::ZERO)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.fields["content"], expected);
            queue.ack("messages:1", "workers", entry.id).await.unwrap();
        }
        assert!(queue
            .read_group("workers", "w1", &streams, Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unacked_entry_stays_pending() {
        let queue = MessageQueue::open_in_memory().unwrap();
        queue.ensure_group("messages:1", "workers").await.unwrap();
        let id = queue.enqueue("messages:1", &fields("x")).await.unwrap();

        let entry = queue
            .read_group("workers", "w1", &["messages:1".into()], Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.id, id);

        // Not acked: pending list keeps it, the cursor has moved past it.
        assert_eq!(queue.pending("messages:1", "workers").await.unwrap(), vec![id]);
        assert!(queue
            .read_group("workers", "w1", &["messages:1".into()], Duration::ZERO)
            .await
            .unwrap()
            .is_none());

        // Redeliverable through claim_stale.
        let reclaimed = queue
            .claim_stale("workers", "w2", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reclaimed.id, id);
        assert_eq!(reclaimed.fields["content"], "x");

        queue.ack("messages:1", "workers", id).await.unwrap();
        assert!(queue.pending("messages:1", "workers").await.unwrap().is_empty());
        assert!(queue
            .claim_stale("workers", "w2", Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn ack_unknown_entry_returns_false() {
        let queue = MessageQueue::open_in_memory().unwrap();
        queue.ensure_group("messages:1", "workers").await.unwrap();
        assert!(!queue.ack("messages:1", "workers", 99).await.unwrap());
    }

    #[tokio::test]
    async fn read_interleaves_multiple_streams() {
        let queue = MessageQueue::open_in_memory().unwrap();
        for stream in ["messages:1", "messages:2"] {
            queue.ensure_group(stream, "workers").await.unwrap();
        }
        queue.enqueue("messages:1", &fields("t1")).await.unwrap();
        queue.enqueue("messages:2", &fields("t2")).await.unwrap();

        let streams = vec!["messages:1".to_string(), "messages:2".to_string()];
        let first = queue
            .read_group("workers", "w1", &streams, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let second = queue
            .read_group("workers", "w1", &streams, Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        let seen: Vec<&str> = vec![&first.stream, &second.stream]
            .into_iter()
            .map(String::as_str)
            .collect();
        assert!(seen.contains(&"messages:1"));
        assert!(seen.contains(&"messages:2"));
    }

    #[tokio::test]
    async fn blocked_read_wakes_on_enqueue() {
        let queue = Arc::new(MessageQueue::open_in_memory().unwrap());
        queue.ensure_group("messages:1", "workers").await.unwrap();

        let reader = {
            let queue = queue.clone();
            tokio::spawn(async move {
                queue
                    .read_group(
                        "workers",
                        "w1",
                        &["messages:1".into()],
                        Duration::from_secs(5),
                    )
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue("messages:1", &fields("wake")).await.unwrap();

        let entry = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("reader finished")
            .unwrap()
            .unwrap()
            .expect("entry delivered");
        assert_eq!(entry.fields["content"], "wake");
    }

    #[tokio::test]
    async fn blocked_read_times_out_empty() {
        let queue = MessageQueue::open_in_memory().unwrap();
        queue.ensure_group("messages:1", "workers").await.unwrap();
        let start = Instant::now();
        let got = queue
            .read_group(
                "workers",
                "w1",
                &["messages:1".into()],
                Duration::from_millis(120),
            )
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn durable_across_reopen() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("queue.db");
        {
            let queue = MessageQueue::open(&path).unwrap();
            queue.ensure_group("messages:1", "workers").await.unwrap();
            queue.enqueue("messages:1", &fields("persisted")).await.unwrap();
        }
        let queue = MessageQueue::open(&path).unwrap();
        let entry = queue
            .read_group("workers", "w1", &["messages:1".into()], Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.fields["content"], "persisted");
    }
}
