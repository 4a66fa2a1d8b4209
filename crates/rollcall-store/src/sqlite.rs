//! SQLite-backed document store.
//!
//! Each class is one JSON document in `classes`, with `join_code` as a
//! unique secondary index and `revision` guarding whole-document writes.
//! Several processes (teacher dashboard, student sessions) may open the
//! same file; they coordinate only through these rows.

use crate::document::{DocumentStore, WriteOutcome};
use chrono::Utc;
use rollcall_core::{Class, ClassSnapshot, RosterError};
use rusqlite::{params, ErrorCode, OptionalExtension};
use std::path::Path;
use tokio_rusqlite::Connection;

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS classes (
        id TEXT PRIMARY KEY,
        join_code TEXT NOT NULL UNIQUE,
        revision INTEGER NOT NULL,
        document TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS images (
        digest TEXT PRIMARY KEY,
        bytes BLOB NOT NULL,
        created_at TEXT NOT NULL
    );
";

pub struct SqliteDocumentStore {
    conn: Connection,
}

impl SqliteDocumentStore {
    /// Open or create the roster database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RosterError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(RosterError::store)?;
            }
        }
        let conn = Connection::open(path).await.map_err(RosterError::store)?;
        tracing::info!(path = %path.display(), "opened roster database");
        Self::initialize(conn).await
    }

    /// Open an in-memory database (for testing).
    pub async fn open_in_memory() -> Result<Self, RosterError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(RosterError::store)?;
        Self::initialize(conn).await
    }

    async fn initialize(conn: Connection) -> Result<Self, RosterError> {
        conn.call(|db| {
            // Other sessions may hold the write lock briefly.
            db.busy_timeout(std::time::Duration::from_secs(5))?;
            db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
            db.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await
        .map_err(RosterError::store)?;
        Ok(Self { conn })
    }

    fn decode(document: &str, revision: i64) -> Result<ClassSnapshot, RosterError> {
        let class: Class = serde_json::from_str(document).map_err(RosterError::store)?;
        Ok(ClassSnapshot {
            class,
            revision: revision as u64,
        })
    }

    async fn fetch_where(&self, column: &'static str, key: &str) -> Result<Option<ClassSnapshot>, RosterError> {
        let key = key.to_string();
        let row = self
            .conn
            .call(move |db| {
                let sql = format!("SELECT document, revision FROM classes WHERE {column} = ?1");
                let row = db
                    .query_row(&sql, params![key], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                    })
                    .optional()?;
                Ok(row)
            })
            .await
            .map_err(RosterError::store)?;

        row.map(|(document, revision)| Self::decode(&document, revision))
            .transpose()
    }
}

impl DocumentStore for SqliteDocumentStore {
    async fn insert(&self, class: &Class) -> Result<u64, RosterError> {
        let document = serde_json::to_string(class).map_err(RosterError::store)?;
        let id = class.id.clone();
        let join_code = class.join_code.clone();
        let updated_at = Utc::now().to_rfc3339();

        let inserted = self
            .conn
            .call(move |db| {
                match db.execute(
                    "INSERT INTO classes (id, join_code, revision, document, updated_at)
                     VALUES (?1, ?2, 1, ?3, ?4)",
                    params![id, join_code, document, updated_at],
                ) {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(err, _))
                        if err.code == ErrorCode::ConstraintViolation =>
                    {
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(RosterError::store)?;

        if inserted {
            Ok(1)
        } else {
            Err(RosterError::JoinCodeTaken(class.join_code.clone()))
        }
    }

    async fn fetch(&self, class_id: &str) -> Result<Option<ClassSnapshot>, RosterError> {
        self.fetch_where("id", class_id).await
    }

    async fn fetch_by_join_code(&self, join_code: &str) -> Result<Option<ClassSnapshot>, RosterError> {
        self.fetch_where("join_code", join_code).await
    }

    async fn replace(&self, class: &Class, expected_revision: u64) -> Result<WriteOutcome, RosterError> {
        let document = serde_json::to_string(class).map_err(RosterError::store)?;
        let id = class.id.clone();
        let updated_at = Utc::now().to_rfc3339();
        let expected = expected_revision as i64;

        self.conn
            .call(move |db| {
                // Join codes are immutable once indexed; the stored column wins.
                let changed = db.execute(
                    "UPDATE classes
                     SET document = json_set(?1, '$.join_code', join_code),
                         revision = revision + 1, updated_at = ?2
                     WHERE id = ?3 AND revision = ?4",
                    params![document, updated_at, id, expected],
                )?;
                if changed == 1 {
                    return Ok(WriteOutcome::Committed {
                        revision: expected_revision + 1,
                    });
                }
                let current: Option<i64> = db
                    .query_row(
                        "SELECT revision FROM classes WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(match current {
                    Some(current) => WriteOutcome::Stale {
                        current: current as u64,
                    },
                    None => WriteOutcome::Missing,
                })
            })
            .await
            .map_err(RosterError::store)
    }

    async fn list(&self) -> Result<Vec<ClassSnapshot>, RosterError> {
        let rows = self
            .conn
            .call(|db| {
                let mut stmt = db.prepare(
                    "SELECT document, revision FROM classes ORDER BY rowid DESC",
                )?;
                let rows = stmt
                    .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
            .map_err(RosterError::store)?;

        rows.iter()
            .map(|(document, revision)| Self::decode(document, *revision))
            .collect()
    }

    async fn put_image(&self, digest: &str, bytes: &[u8]) -> Result<(), RosterError> {
        let digest = digest.to_string();
        let bytes = bytes.to_vec();
        let created_at = Utc::now().to_rfc3339();
        self.conn
            .call(move |db| {
                db.execute(
                    "INSERT OR IGNORE INTO images (digest, bytes, created_at) VALUES (?1, ?2, ?3)",
                    params![digest, bytes, created_at],
                )?;
                Ok(())
            })
            .await
            .map_err(RosterError::store)
    }

    async fn fetch_image(&self, digest: &str) -> Result<Option<Vec<u8>>, RosterError> {
        let digest = digest.to_string();
        self.conn
            .call(move |db| {
                let bytes = db
                    .query_row(
                        "SELECT bytes FROM images WHERE digest = ?1",
                        params![digest],
                        |row| row.get::<_, Vec<u8>>(0),
                    )
                    .optional()?;
                Ok(bytes)
            })
            .await
            .map_err(RosterError::store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::NewStudent;

    #[tokio::test]
    async fn test_insert_fetch_roundtrip() {
        let store = SqliteDocumentStore::open_in_memory().await.unwrap();
        let mut class = Class::new("Web Programming", "WEB2024");
        class
            .add_students(vec![NewStudent::new("A1", "Nguyen", "K1")])
            .unwrap();
        store.insert(&class).await.unwrap();

        let snap = store.fetch(&class.id).await.unwrap().unwrap();
        assert_eq!(snap.class, class);
        assert_eq!(snap.revision, 1);

        let by_code = store.fetch_by_join_code("WEB2024").await.unwrap().unwrap();
        assert_eq!(by_code.class.id, class.id);
    }

    #[tokio::test]
    async fn test_join_code_is_case_sensitive_and_unique() {
        let store = SqliteDocumentStore::open_in_memory().await.unwrap();
        store.insert(&Class::new("a", "WEB2024")).await.unwrap();

        assert!(store.fetch_by_join_code("web2024").await.unwrap().is_none());
        assert!(store.fetch_by_join_code("NOPE").await.unwrap().is_none());

        let err = store.insert(&Class::new("b", "WEB2024")).await.unwrap_err();
        assert!(matches!(err, RosterError::JoinCodeTaken(_)));
        // A differently-cased code is a different class.
        store.insert(&Class::new("c", "web2024")).await.unwrap();
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_replace_checks_revision() {
        let store = SqliteDocumentStore::open_in_memory().await.unwrap();
        let mut class = Class::new("a", "X");
        store.insert(&class).await.unwrap();

        class.display_name = "renamed".into();
        assert_eq!(
            store.replace(&class, 1).await.unwrap(),
            WriteOutcome::Committed { revision: 2 }
        );
        assert_eq!(
            store.replace(&class, 1).await.unwrap(),
            WriteOutcome::Stale { current: 2 }
        );
        assert_eq!(
            store.replace(&Class::new("b", "Y"), 1).await.unwrap(),
            WriteOutcome::Missing
        );

        let snap = store.fetch(&class.id).await.unwrap().unwrap();
        assert_eq!(snap.class.display_name, "renamed");
        assert_eq!(snap.revision, 2);
    }

    #[tokio::test]
    async fn test_images_are_content_addressed() {
        let store = SqliteDocumentStore::open_in_memory().await.unwrap();
        store.put_image("abc", b"first").await.unwrap();
        store.put_image("abc", b"second").await.unwrap();
        assert_eq!(store.fetch_image("abc").await.unwrap().unwrap(), b"first");
        assert!(store.fetch_image("missing").await.unwrap().is_none());
    }
}
