use std::{
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use core_model::{ArchiveStore, StoredMessage, User, UserMap};
use rusqlite::{Connection, Row, params};
use serde::de::DeserializeOwned;
use tracing::debug;

/// SQLite-backed message archive.
///
/// All access goes through one connection guarded by a mutex, so a shared
/// `&SqliteStore` can take inserts from every channel importer at once.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

const MESSAGE_COLUMNS: &str =
    "timestamp, txt, user, parent, subtype, top_level, attachments, reacts, replies";

impl SqliteStore {
    pub fn default_path() -> PathBuf {
        let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        base.join("slack-archive").join("slack.db")
    }

    /// Opens `path`, creating its parent directory first.
    pub fn create(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating parent dir for {}", path.display()))?;
        }
        Self::open(path)
    }

    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening sqlite db {}", path.as_ref().display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> anyhow::Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("sqlite connection lock poisoned"))
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        self.conn()?.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
              channel TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              txt TEXT NOT NULL,
              user TEXT NOT NULL,
              parent TEXT,
              subtype TEXT,
              top_level INTEGER NOT NULL,
              attachments TEXT NOT NULL,
              reacts TEXT NOT NULL,
              replies TEXT NOT NULL,
              UNIQUE(channel, timestamp)
            );
            CREATE INDEX IF NOT EXISTS messages_parent ON messages(channel, parent);
            CREATE TABLE IF NOT EXISTS users (
              id TEXT PRIMARY KEY,
              real_name TEXT NOT NULL,
              display_name TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    pub fn list_channels(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT channel FROM messages ORDER BY channel")?;
        let rows = stmt.query_map([], |r| r.get(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Top-level messages of `channel` with `from <= ts < to`, oldest first.
    pub fn get_parent_messages(
        &self,
        channel: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE channel = ?1 AND top_level = 1
               AND CAST(timestamp AS REAL) >= ?2 AND CAST(timestamp AS REAL) < ?3
             ORDER BY timestamp"
        ))?;
        let rows = stmt.query_map(
            params![channel, epoch_seconds(from), epoch_seconds(to)],
            message_from_row,
        )?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn get_thread_replies(
        &self,
        channel: &str,
        parent_timestamp: &str,
    ) -> anyhow::Result<Vec<StoredMessage>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE channel = ?1 AND parent = ?2
             ORDER BY timestamp"
        ))?;
        let rows = stmt.query_map(params![channel, parent_timestamp], message_from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    pub fn get_users(&self) -> anyhow::Result<UserMap> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT id, real_name, display_name FROM users")?;
        let rows = stmt.query_map([], |r| {
            Ok(User {
                id: r.get(0)?,
                real_name: r.get(1)?,
                display_name: r.get(2)?,
            })
        })?;
        let mut users = UserMap::new();
        for user in rows {
            let user = user?;
            users.insert(user.id.clone(), user);
        }
        Ok(users)
    }

    pub fn integrity_check(&self) -> anyhow::Result<String> {
        self.conn()?
            .query_row("PRAGMA integrity_check;", [], |r| r.get(0))
            .map_err(Into::into)
    }
}

impl ArchiveStore for SqliteStore {
    fn insert_message(&self, channel: &str, message: &StoredMessage) -> anyhow::Result<()> {
        let attachments = serde_json::to_string(&message.attachments)?;
        let reactions = serde_json::to_string(&message.reactions)?;
        let replies = serde_json::to_string(&message.reply_timestamps)?;
        let conn = self.conn()?;
        let mut stmt = conn.prepare_cached(
            r#"INSERT INTO messages
              (channel, timestamp, txt, user, parent, subtype, top_level, attachments, reacts, replies)
              VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
        )?;
        stmt.execute(params![
            channel,
            message.timestamp,
            message.text,
            message.author,
            message.parent_timestamp,
            message.subtype,
            message.is_top_level,
            attachments,
            reactions,
            replies
        ])
        .with_context(|| format!("inserting message {} into {channel}", message.timestamp))?;
        Ok(())
    }

    fn insert_users(&self, users: &UserMap) -> anyhow::Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO users (id, real_name, display_name) VALUES (?1, ?2, ?3)",
            )?;
            for (id, user) in users {
                stmt.execute(params![id, user.real_name, user.display_name])
                    .with_context(|| format!("inserting user {id}"))?;
            }
        }
        tx.commit()?;
        debug!(users = users.len(), "users stored");
        Ok(())
    }
}

fn epoch_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1e6
}

fn message_from_row(r: &Row<'_>) -> rusqlite::Result<StoredMessage> {
    Ok(StoredMessage {
        timestamp: r.get(0)?,
        text: r.get(1)?,
        author: r.get(2)?,
        parent_timestamp: r.get(3)?,
        subtype: r.get(4)?,
        is_top_level: r.get(5)?,
        attachments: json_column(r, 6)?,
        reactions: json_column(r, 7)?,
        reply_timestamps: json_column(r, 8)?,
    })
}

fn json_column<T: DeserializeOwned>(r: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = r.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_model::Attachment;

    fn store() -> SqliteStore {
        let store = SqliteStore::open(":memory:").expect("open");
        store.init_schema().expect("schema");
        store
    }

    fn msg(ts: &str, text: &str, parent: Option<&str>, top_level: bool) -> StoredMessage {
        StoredMessage {
            timestamp: ts.to_string(),
            text: text.to_string(),
            author: "Ann".to_string(),
            parent_timestamp: parent.map(str::to_string),
            is_top_level: top_level,
            ..StoredMessage::default()
        }
    }

    fn secs(s: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(s, 0).unwrap()
    }

    #[test]
    fn schema_and_integrity() {
        let store = store();
        store.init_schema().expect("schema is idempotent");
        assert_eq!(store.integrity_check().unwrap(), "ok");
        assert!(store.list_channels().unwrap().is_empty());
    }

    #[test]
    fn list_channels_distinct_sorted() {
        let store = store();
        store.insert_message("random", &msg("1.0", "a", None, true)).unwrap();
        store.insert_message("general", &msg("1.0", "b", None, true)).unwrap();
        store.insert_message("general", &msg("2.0", "c", None, true)).unwrap();
        assert_eq!(store.list_channels().unwrap(), vec!["general", "random"]);
    }

    #[test]
    fn parent_messages_filter_range_and_top_level() {
        let store = store();
        store.insert_message("general", &msg("100.000200", "early", None, true)).unwrap();
        store.insert_message("general", &msg("200.000100", "root", None, true)).unwrap();
        store
            .insert_message("general", &msg("250.000000", "reply", Some("200.000100"), false))
            .unwrap();
        let mut broadcast = msg("260.000000", "also here", Some("200.000100"), true);
        broadcast.subtype = Some("thread_broadcast".to_string());
        store.insert_message("general", &broadcast).unwrap();
        store.insert_message("general", &msg("300.000000", "late", None, true)).unwrap();
        store.insert_message("random", &msg("210.000000", "elsewhere", None, true)).unwrap();

        let parents = store
            .get_parent_messages("general", secs(150), secs(300))
            .unwrap();
        let texts: Vec<&str> = parents.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["root", "also here"]);
        assert_eq!(parents[1].subtype.as_deref(), Some("thread_broadcast"));
    }

    #[test]
    fn thread_replies_ordered() {
        let store = store();
        store.insert_message("general", &msg("5.0", "second", Some("1.0"), false)).unwrap();
        store.insert_message("general", &msg("3.0", "first", Some("1.0"), false)).unwrap();
        store.insert_message("general", &msg("4.0", "other", Some("2.0"), false)).unwrap();
        let replies = store.get_thread_replies("general", "1.0").unwrap();
        let ts: Vec<&str> = replies.iter().map(|m| m.timestamp.as_str()).collect();
        assert_eq!(ts, vec!["3.0", "5.0"]);
        assert!(store.get_thread_replies("general", "9.0").unwrap().is_empty());
    }

    #[test]
    fn message_columns_round_trip() {
        let store = store();
        let mut m = msg("7.0", "with extras", None, true);
        m.attachments = vec![Attachment {
            url: "https://example.com".to_string(),
            fallback_text: String::new(),
            title: "link".to_string(),
        }];
        m.reactions
            .insert("tada".to_string(), vec!["Ann".to_string(), String::new()]);
        m.reply_timestamps = vec!["8.0".to_string(), "9.0".to_string()];
        store.insert_message("general", &m).unwrap();
        let got = store.get_parent_messages("general", secs(0), secs(10)).unwrap();
        assert_eq!(got, vec![m]);
    }

    #[test]
    fn empty_collections_stored_as_json() {
        let store = store();
        store.insert_message("general", &msg("1.0", "plain", None, true)).unwrap();
        let raw: (String, String, String) = store
            .conn()
            .unwrap()
            .query_row(
                "SELECT attachments, reacts, replies FROM messages",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .unwrap();
        assert_eq!(raw, ("[]".to_string(), "{}".to_string(), "[]".to_string()));
    }

    #[test]
    fn duplicate_message_rejected() {
        let store = store();
        store.insert_message("general", &msg("1.0", "a", None, true)).unwrap();
        assert!(store.insert_message("general", &msg("1.0", "b", None, true)).is_err());
    }

    #[test]
    fn insert_users_is_insert_or_ignore() {
        let store = store();
        let mut users = UserMap::new();
        users.insert("USLACKBOT".to_string(), User::slackbot());
        store.insert_users(&users).unwrap();

        let mut renamed = users.clone();
        renamed.get_mut("USLACKBOT").unwrap().real_name = "Other".to_string();
        store.insert_users(&renamed).unwrap();

        let got = store.get_users().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["USLACKBOT"].real_name, "Slackbot");
    }

    #[test]
    fn concurrent_inserts_from_threads() {
        let store = store();
        std::thread::scope(|s| {
            for channel in ["a", "b", "c", "d"] {
                let store = &store;
                s.spawn(move || {
                    for i in 0..25 {
                        store
                            .insert_message(channel, &msg(&format!("{i}.0"), "x", None, true))
                            .unwrap();
                    }
                });
            }
        });
        assert_eq!(store.list_channels().unwrap().len(), 4);
        let all = store.get_parent_messages("c", secs(0), secs(100)).unwrap();
        assert_eq!(all.len(), 25);
    }

    #[test]
    fn create_makes_parent_dir() {
        let dir = std::env::temp_dir().join(format!("slack_archive_store_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("slack.db");
        let store = SqliteStore::create(&path).unwrap();
        store.init_schema().unwrap();
        assert!(path.exists());
        drop(store);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
