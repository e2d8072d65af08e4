//! SQLite-backed checkpoint store for throttler queues and restrictions.
//! In-flight work survives process restarts: each throttler reloads its
//! pending items and active restriction table on start.

use chrono::{DateTime, Utc};
use outclaw_core::error::{OutClawError, Result};
use outclaw_core::types::{RestrictionKind, WorkItem};
use std::path::Path;
use std::sync::Mutex;

/// A queued work item as persisted: the serialized item plus its scheduling
/// metadata. Completion senders are not persisted — after a restart the
/// original waiter is gone and its signal is dropped on a closed channel.
#[derive(Debug, Clone)]
pub struct PersistedItem {
    pub item: WorkItem,
    pub seq: u64,
    pub not_before: Option<DateTime<Utc>>,
}

/// An active restriction as persisted.
#[derive(Debug, Clone)]
pub struct PersistedRestriction {
    pub action: String,
    pub kind: RestrictionKind,
    pub message: String,
    /// `None` = permanent.
    pub expires_at: Option<DateTime<Utc>>,
}

/// SQLite checkpoint store shared by all per-account throttlers.
pub struct SchedulerDb {
    conn: Mutex<rusqlite::Connection>,
}

impl SchedulerDb {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| OutClawError::store(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| OutClawError::store(format!("DB open: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?
            .execute_batch(
                "
            -- Pending/delayed throttler items, one row per WorkItem
            CREATE TABLE IF NOT EXISTS throttler_items (
                id TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                not_before TEXT,                 -- RFC3339, NULL = ready now
                item TEXT NOT NULL               -- JSON WorkItem
            );
            CREATE INDEX IF NOT EXISTS idx_items_account
                ON throttler_items(account_id);

            -- Active restrictions per (account, action)
            CREATE TABLE IF NOT EXISTS restrictions (
                account_id TEXT NOT NULL,
                action TEXT NOT NULL,
                kind TEXT NOT NULL,              -- 'weekly' | 'permanent'
                message TEXT NOT NULL DEFAULT '',
                expires_at TEXT,                 -- NULL = permanent
                PRIMARY KEY (account_id, action)
            );
            ",
            )
            .map_err(|e| OutClawError::store(format!("Migrate: {e}")))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, rusqlite::Connection>> {
        self.conn
            .lock()
            .map_err(|_| OutClawError::store("DB lock poisoned"))
    }

    /// Replace an account's queued items with the given snapshot.
    pub fn save_items(&self, account_id: &str, items: &[PersistedItem]) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| OutClawError::store(format!("Tx: {e}")))?;
        tx.execute(
            "DELETE FROM throttler_items WHERE account_id = ?1",
            [account_id],
        )
        .map_err(|e| OutClawError::store(format!("Delete items: {e}")))?;
        for entry in items {
            let json = serde_json::to_string(&entry.item)
                .map_err(|e| OutClawError::store(format!("Serialize item: {e}")))?;
            tx.execute(
                "INSERT INTO throttler_items (id, account_id, seq, not_before, item)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    entry.item.id,
                    account_id,
                    entry.seq as i64,
                    entry.not_before.map(|t| t.to_rfc3339()),
                    json,
                ],
            )
            .map_err(|e| OutClawError::store(format!("Insert item: {e}")))?;
        }
        tx.commit()
            .map_err(|e| OutClawError::store(format!("Commit: {e}")))
    }

    /// Load an account's queued items, oldest arrival first.
    pub fn load_items(&self, account_id: &str) -> Result<Vec<PersistedItem>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT seq, not_before, item FROM throttler_items
                 WHERE account_id = ?1 ORDER BY seq",
            )
            .map_err(|e| OutClawError::store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map([account_id], |row| {
                let seq: i64 = row.get(0)?;
                let not_before: Option<String> = row.get(1)?;
                let item: String = row.get(2)?;
                Ok((seq, not_before, item))
            })
            .map_err(|e| OutClawError::store(format!("Query items: {e}")))?;

        let mut items = Vec::new();
        for row in rows {
            let (seq, not_before, json) =
                row.map_err(|e| OutClawError::store(format!("Row: {e}")))?;
            let item: WorkItem = match serde_json::from_str(&json) {
                Ok(item) => item,
                Err(e) => {
                    tracing::warn!("⚠️ Skipping unreadable checkpoint item: {e}");
                    continue;
                }
            };
            items.push(PersistedItem {
                item,
                seq: seq as u64,
                not_before: not_before.and_then(|s| parse_rfc3339(&s)),
            });
        }
        Ok(items)
    }

    /// Replace an account's restriction table.
    pub fn save_restrictions(
        &self,
        account_id: &str,
        restrictions: &[PersistedRestriction],
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| OutClawError::store(format!("Tx: {e}")))?;
        tx.execute(
            "DELETE FROM restrictions WHERE account_id = ?1",
            [account_id],
        )
        .map_err(|e| OutClawError::store(format!("Delete restrictions: {e}")))?;
        for r in restrictions {
            let kind = match r.kind {
                RestrictionKind::Weekly => "weekly",
                RestrictionKind::Permanent => "permanent",
            };
            tx.execute(
                "INSERT INTO restrictions (account_id, action, kind, message, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    account_id,
                    r.action,
                    kind,
                    r.message,
                    r.expires_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| OutClawError::store(format!("Insert restriction: {e}")))?;
        }
        tx.commit()
            .map_err(|e| OutClawError::store(format!("Commit: {e}")))
    }

    /// Load an account's active restrictions.
    pub fn load_restrictions(&self, account_id: &str) -> Result<Vec<PersistedRestriction>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT action, kind, message, expires_at FROM restrictions
                 WHERE account_id = ?1",
            )
            .map_err(|e| OutClawError::store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map([account_id], |row| {
                let action: String = row.get(0)?;
                let kind: String = row.get(1)?;
                let message: String = row.get(2)?;
                let expires_at: Option<String> = row.get(3)?;
                Ok((action, kind, message, expires_at))
            })
            .map_err(|e| OutClawError::store(format!("Query restrictions: {e}")))?;

        let mut restrictions = Vec::new();
        for row in rows {
            let (action, kind, message, expires_at) =
                row.map_err(|e| OutClawError::store(format!("Row: {e}")))?;
            let kind = match kind.as_str() {
                "weekly" => RestrictionKind::Weekly,
                _ => RestrictionKind::Permanent,
            };
            restrictions.push(PersistedRestriction {
                action,
                kind,
                message,
                expires_at: expires_at.and_then(|s| parse_rfc3339(&s)),
            });
        }
        Ok(restrictions)
    }
}

fn parse_rfc3339(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(account: &str, step: &str) -> WorkItem {
        WorkItem::step(
            account,
            "t1",
            "wi-1",
            "wd-1",
            "n1",
            step,
            "lead-1",
            "linkedin.visit",
            "https://example.com/in/a",
            serde_json::Value::Null,
        )
    }

    #[test]
    fn test_items_roundtrip() {
        let db = SchedulerDb::open_in_memory().unwrap();
        let entries = vec![
            PersistedItem {
                item: item("acc-1", "s1"),
                seq: 1,
                not_before: None,
            },
            PersistedItem {
                item: item("acc-1", "s2"),
                seq: 2,
                not_before: Some(Utc::now() + chrono::Duration::minutes(5)),
            },
        ];
        db.save_items("acc-1", &entries).unwrap();
        db.save_items("acc-2", &[PersistedItem {
            item: item("acc-2", "s9"),
            seq: 1,
            not_before: None,
        }])
        .unwrap();

        let loaded = db.load_items("acc-1").unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].item.step_id, "s1");
        assert!(loaded[1].not_before.is_some());

        // Replacing a snapshot drops rows that are no longer queued.
        db.save_items("acc-1", &entries[1..]).unwrap();
        let loaded = db.load_items("acc-1").unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].item.step_id, "s2");
        // Other accounts untouched.
        assert_eq!(db.load_items("acc-2").unwrap().len(), 1);
    }

    #[test]
    fn test_restrictions_roundtrip() {
        let db = SchedulerDb::open_in_memory().unwrap();
        db.save_restrictions(
            "acc-1",
            &[
                PersistedRestriction {
                    action: "linkedin.send_invite".into(),
                    kind: RestrictionKind::Weekly,
                    message: "weekly invite limit".into(),
                    expires_at: Some(Utc::now() + chrono::Duration::days(7)),
                },
                PersistedRestriction {
                    action: "linkedin.inmail".into(),
                    kind: RestrictionKind::Permanent,
                    message: "feature blocked".into(),
                    expires_at: None,
                },
            ],
        )
        .unwrap();

        let loaded = db.load_restrictions("acc-1").unwrap();
        assert_eq!(loaded.len(), 2);
        let permanent = loaded
            .iter()
            .find(|r| r.kind == RestrictionKind::Permanent)
            .unwrap();
        assert!(permanent.expires_at.is_none());
    }
}
