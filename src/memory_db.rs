//! Append-only SQLite log of conversation turns.
//!
//! Schema is created on open. Rows are never updated or deleted; `wipe`
//! removes the whole database file.

use std::collections::BTreeMap;
use std::path::Path;

use rusqlite::{params, Connection};
use serde_json::json;

use crate::error::Result;
use crate::files;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    User,
    Assistant,
}

impl Role {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

pub(crate) struct MemoryDb {
    conn: Connection,
}

impl MemoryDb {
    pub(crate) fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            files::ensure_dir(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS memory (role TEXT, time TEXT, message TEXT)",
            [],
        )?;
        Ok(Self { conn })
    }

    pub(crate) fn append(&self, role: Role, message: &str) -> Result<()> {
        let time = chrono::Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO memory (role, time, message) VALUES (?1, ?2, ?3)",
            params![role.as_str(), time, message],
        )?;
        Ok(())
    }

    pub(crate) fn turns(&self) -> Result<Vec<(String, String, String)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT role, time, message FROM memory ORDER BY rowid")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Export as `{role: {time: {"message": msg}}}` for re-upload as a
    /// context file on the remote identity.
    pub(crate) fn export_json(&self, path: &Path) -> Result<()> {
        let mut doc: BTreeMap<String, BTreeMap<String, serde_json::Value>> = BTreeMap::new();
        for (role, time, message) in self.turns()? {
            doc.entry(role)
                .or_default()
                .insert(time, json!({ "message": message }));
        }
        files::save_json(path, &doc)
    }

    pub(crate) fn wipe(path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        // WAL sidecar files, if present
        for ext in ["db-wal", "db-shm"] {
            let side = path.with_extension(ext);
            if side.exists() {
                std::fs::remove_file(side)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn temp_db_path(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "buranya-memory-{}-{}.db",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test]
    fn test_append_and_read_back() {
        let path = temp_db_path("append");
        let db = MemoryDb::open_or_create(&path).unwrap();
        db.append(Role::User, "hello").unwrap();
        db.append(Role::Assistant, "hi there").unwrap();
        let turns = db.turns().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].0, "user");
        assert_eq!(turns[0].2, "hello");
        assert_eq!(turns[1].0, "assistant");
        drop(db);
        let _ = MemoryDb::wipe(&path);
    }

    #[test]
    fn test_export_shape() {
        let path = temp_db_path("export");
        let db = MemoryDb::open_or_create(&path).unwrap();
        db.append(Role::User, "first").unwrap();
        db.append(Role::User, "second").unwrap();
        db.append(Role::Assistant, "reply").unwrap();

        let export = temp_db_path("export-json").with_extension("json");
        db.export_json(&export).unwrap();
        let doc: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&export).unwrap()).unwrap();
        assert_eq!(doc["user"].as_object().unwrap().len(), 2);
        let (_, entry) = doc["assistant"].as_object().unwrap().iter().next().unwrap();
        assert_eq!(entry["message"], "reply");

        drop(db);
        let _ = std::fs::remove_file(&export);
        let _ = MemoryDb::wipe(&path);
    }

    #[test]
    fn test_wipe_removes_file() {
        let path = temp_db_path("wipe");
        let db = MemoryDb::open_or_create(&path).unwrap();
        db.append(Role::User, "x").unwrap();
        drop(db);
        MemoryDb::wipe(&path).unwrap();
        assert!(!path.exists());
        // wiping an absent file is fine
        MemoryDb::wipe(&path).unwrap();
    }
}
