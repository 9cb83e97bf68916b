//! Relational storage boundary: tenants, users, messages, notifications and
//! tenant knowledge, plus the worker's unit-of-work.

pub mod models;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

pub use models::{MessageRow, NotificationRow, TenantRow, UserRow};
pub use rusqlite::Transaction;

pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open or create the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` inside one transaction. Commits when `f` returns `Ok`,
    /// rolls back when it returns `Err`. The closure is synchronous so the
    /// connection never crosses an await point.
    pub async fn transact<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T>,
    {
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Tenants / users / knowledge
    // ─────────────────────────────────────────────────────────────────────

    pub async fn list_tenant_ids(&self) -> Result<Vec<i64>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT id FROM tenants ORDER BY id")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    }

    pub async fn get_tenant(&self, tenant_id: i64) -> Result<Option<TenantRow>> {
        let conn = self.conn.lock().await;
        let tenant = conn
            .query_row(
                "SELECT id, name, type FROM tenants WHERE id = ?1",
                [tenant_id],
                |row| {
                    Ok(TenantRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        kind: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(tenant)
    }

    pub async fn list_users(&self, tenant_id: i64) -> Result<Vec<UserRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, email, role, password_hash
             FROM users WHERE tenant_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([tenant_id], row_to_user)?;
        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok(users)
    }

    pub async fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        let conn = self.conn.lock().await;
        let user = conn
            .query_row(
                "SELECT id, tenant_id, name, email, role, password_hash
                 FROM users WHERE email = ?1",
                [email],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub async fn list_knowledge(&self, tenant_id: i64) -> Result<Vec<String>> {
        let conn = self.conn.lock().await;
        let mut stmt =
            conn.prepare("SELECT content FROM tenant_knowledge WHERE tenant_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map([tenant_id], |row| row.get(0))?;
        let mut items = Vec::new();
        for row in rows {
            items.push(row?);
        }
        Ok(items)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Messages / notifications
    // ─────────────────────────────────────────────────────────────────────

    /// Conversation history for one (tenant, user, session), oldest first.
    pub async fn session_messages(
        &self,
        tenant_id: i64,
        user_id: i64,
        session_id: &str,
    ) -> Result<Vec<MessageRow>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, user_id, session_id, role, content, created_at
             FROM messages
             WHERE tenant_id = ?1 AND user_id = ?2 AND session_id = ?3
             ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map(params![tenant_id, user_id, session_id], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    /// Notifications addressed to one user, newest first.
    pub async fn notifications_for(
        &self,
        tenant_id: i64,
        to_user_id: i64,
        unread_only: bool,
    ) -> Result<Vec<NotificationRow>> {
        let conn = self.conn.lock().await;
        let sql = if unread_only {
            "SELECT id, tenant_id, from_user_id, to_user_id, message, read, created_at
             FROM notifications
             WHERE tenant_id = ?1 AND to_user_id = ?2 AND read = 0
             ORDER BY created_at DESC, id DESC"
        } else {
            "SELECT id, tenant_id, from_user_id, to_user_id, message, read, created_at
             FROM notifications
             WHERE tenant_id = ?1 AND to_user_id = ?2
             ORDER BY created_at DESC, id DESC"
        };
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![tenant_id, to_user_id], row_to_notification)?;
        let mut notifications = Vec::new();
        for row in rows {
            notifications.push(row?);
        }
        Ok(notifications)
    }

    /// How many notifications addressed to this user are still unread.
    pub async fn unread_notification_count(
        &self,
        tenant_id: i64,
        to_user_id: i64,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM notifications
             WHERE tenant_id = ?1 AND to_user_id = ?2 AND read = 0",
            params![tenant_id, to_user_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Mark one of the caller's notifications read. Returns false when no
    /// such notification exists for this (tenant, user, id).
    pub async fn mark_notification_read(
        &self,
        tenant_id: i64,
        to_user_id: i64,
        notification_id: i64,
    ) -> Result<bool> {
        let conn = self.conn.lock().await;
        let changed = conn.execute(
            "UPDATE notifications SET read = 1
             WHERE id = ?1 AND tenant_id = ?2 AND to_user_id = ?3",
            params![notification_id, tenant_id, to_user_id],
        )?;
        Ok(changed > 0)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Provisioning (used by deployment seeding and tests)
    // ─────────────────────────────────────────────────────────────────────

    pub async fn insert_tenant(&self, name: &str, kind: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tenants (name, type) VALUES (?1, ?2)",
            params![name, kind],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn insert_user(
        &self,
        tenant_id: i64,
        name: &str,
        email: &str,
        role: &str,
        password_hash: &str,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO users (tenant_id, name, email, role, password_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![tenant_id, name, email, role, password_hash],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub async fn insert_knowledge(&self, tenant_id: i64, content: &str) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO tenant_knowledge (tenant_id, content) VALUES (?1, ?2)",
            params![tenant_id, content],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Transaction-scoped writes (used inside `Store::transact`)
// ─────────────────────────────────────────────────────────────────────────────

pub fn insert_message(
    tx: &Transaction<'_>,
    tenant_id: i64,
    user_id: i64,
    session_id: &str,
    role: &str,
    content: &str,
) -> Result<i64> {
    tx.execute(
        "INSERT INTO messages (tenant_id, user_id, session_id, role, content, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            tenant_id,
            user_id,
            session_id,
            role,
            content,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

pub fn insert_notification(
    tx: &Transaction<'_>,
    tenant_id: i64,
    from_user_id: i64,
    to_user_id: i64,
    message: &str,
) -> Result<i64> {
    tx.execute(
        "INSERT INTO notifications (tenant_id, from_user_id, to_user_id, message, read, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![
            tenant_id,
            from_user_id,
            to_user_id,
            message,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

/// Point lookup visible to the current transaction.
pub fn get_user_tx(tx: &Transaction<'_>, user_id: i64) -> Result<Option<UserRow>> {
    let user = tx
        .query_row(
            "SELECT id, tenant_id, name, email, role, password_hash
             FROM users WHERE id = ?1",
            [user_id],
            row_to_user,
        )
        .optional()?;
    Ok(user)
}

// ─────────────────────────────────────────────────────────────────────────────
// Row mapping / migrations
// ─────────────────────────────────────────────────────────────────────────────

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        email: row.get(3)?,
        role: row.get(4)?,
        password_hash: row.get(5)?,
    })
}

fn row_to_message(row: &rusqlite::Row) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        user_id: row.get(2)?,
        session_id: row.get(3)?,
        role: row.get(4)?,
        content: row.get(5)?,
        created_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

fn row_to_notification(row: &rusqlite::Row) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        from_user_id: row.get(2)?,
        to_user_id: row.get(3)?,
        message: row.get(4)?,
        read: row.get::<_, i64>(5)? != 0,
        created_at: parse_ts(&row.get::<_, String>(6)?),
    })
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_default()
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"CREATE TABLE IF NOT EXISTS __murmur_schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );"#,
    )?;

    let applied: std::collections::HashSet<i64> = {
        let mut stmt = conn.prepare("SELECT version FROM __murmur_schema_version")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        rows.filter_map(|r| r.ok()).collect()
    };

    let migrations: Vec<(i64, &str)> = vec![(
        1,
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            type TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL REFERENCES tenants(id),
            name TEXT NOT NULL,
            email TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            password_hash TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL REFERENCES tenants(id),
            user_id INTEGER NOT NULL REFERENCES users(id),
            session_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS notifications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL REFERENCES tenants(id),
            from_user_id INTEGER NOT NULL REFERENCES users(id),
            to_user_id INTEGER NOT NULL REFERENCES users(id),
            message TEXT NOT NULL,
            read INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tenant_knowledge (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id INTEGER NOT NULL REFERENCES tenants(id),
            content TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_session
            ON messages(tenant_id, user_id, session_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_notifications_recipient
            ON notifications(tenant_id, to_user_id, created_at DESC);
        "#,
    )];

    for (version, sql) in migrations {
        if applied.contains(&version) {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO __murmur_schema_version(version) VALUES (?1)",
            [version],
        )?;
        tracing::info!(version, "applied schema migration");
    }

    Ok(())
}
