//! SQLite-backed durable store.
//!
//! A single-file stand-in for the hosted document store, used by the CLI.
//! Change feeds are in-process only: writers in another process are not
//! observed.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use super::watch::WatchRegistry;
use super::{ChangeSink, DocPath, DurableStore, FieldValue, StoreChange, StoreDocument, StoreError, StoreResult};
use crate::subscription::SubscriptionHandle;

const SCHEMA: &str = r#"
-- Documents, keyed by full path
CREATE TABLE IF NOT EXISTS documents (
    path TEXT PRIMARY KEY,
    parent TEXT,
    name TEXT NOT NULL,
    updated_at INTEGER DEFAULT (unixepoch())
);
CREATE INDEX IF NOT EXISTS idx_documents_parent ON documents(parent, name);

-- Field values (one row per field)
CREATE TABLE IF NOT EXISTS fields (
    path TEXT NOT NULL,
    field TEXT NOT NULL,
    kind TEXT NOT NULL,
    text_value TEXT,
    blob_value BLOB,
    PRIMARY KEY (path, field)
);
"#;

/// Durable store in a SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    watchers: WatchRegistry,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> StoreResult<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            watchers: WatchRegistry::default(),
        })
    }

    fn read_document(conn: &Connection, path: &DocPath) -> StoreResult<Option<StoreDocument>> {
        let key = path.to_string();
        let exists: Option<String> = conn
            .query_row("SELECT path FROM documents WHERE path = ?1", params![key], |row| row.get(0))
            .optional()?;
        if exists.is_none() {
            return Ok(None);
        }

        let mut stmt = conn.prepare(
            "SELECT field, kind, text_value, blob_value FROM fields WHERE path = ?1 ORDER BY field",
        )?;
        let rows = stmt.query_map(params![key], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, Option<Vec<u8>>>(3)?,
            ))
        })?;

        let mut doc = StoreDocument::new();
        for row in rows {
            let (field, kind, text, blob) = row?;
            let value = match kind.as_str() {
                "str" => FieldValue::Str(text.unwrap_or_default()),
                "bytes" => FieldValue::Bytes(blob.unwrap_or_default()),
                "str_list" => FieldValue::StrList(serde_json::from_str(text.as_deref().unwrap_or("[]"))?),
                _ => {
                    return Err(StoreError::FieldType {
                        path: key.clone(),
                        field,
                    });
                }
            };
            doc.set(&field, value);
        }
        Ok(Some(doc))
    }

    fn write_fields(conn: &Connection, path: &DocPath, fields: &StoreDocument) -> StoreResult<()> {
        let key = path.to_string();
        let parent = path.parent().map(|p| p.to_string());
        conn.execute(
            "INSERT INTO documents (path, parent, name) VALUES (?1, ?2, ?3)
             ON CONFLICT(path) DO UPDATE SET updated_at = unixepoch()",
            params![key, parent, path.name()],
        )?;

        for (field, value) in fields.iter() {
            let (text, blob): (Option<String>, Option<&[u8]>) = match value {
                FieldValue::Str(s) => (Some(s.clone()), None),
                FieldValue::Bytes(b) => (None, Some(b.as_slice())),
                FieldValue::StrList(list) => (Some(serde_json::to_string(list)?), None),
            };
            conn.execute(
                "INSERT INTO fields (path, field, kind, text_value, blob_value)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(path, field) DO UPDATE SET
                    kind = excluded.kind,
                    text_value = excluded.text_value,
                    blob_value = excluded.blob_value",
                params![key, field, value.kind(), text, blob],
            )?;
        }
        Ok(())
    }

    /// Run a read-modify-write in one transaction, then notify watchers.
    fn commit(
        &self,
        path: &DocPath,
        update: impl FnOnce(Option<StoreDocument>) -> StoreResult<StoreDocument>,
    ) -> StoreResult<()> {
        let snapshot = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let current = Self::read_document(&tx, path)?;
            let fields = update(current)?;
            Self::write_fields(&tx, path, &fields)?;
            let snapshot = Self::read_document(&tx, path)?;
            tx.commit()?;
            snapshot
        };
        self.watchers.notify(StoreChange {
            path: path.clone(),
            document: snapshot,
        });
        Ok(())
    }
}

#[async_trait]
impl DurableStore for SqliteStore {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<StoreDocument>> {
        let conn = self.conn.lock();
        Self::read_document(&conn, path)
    }

    async fn set_merge(&self, path: &DocPath, fields: StoreDocument) -> StoreResult<()> {
        self.commit(path, |_| Ok(fields))
    }

    async fn array_union(&self, path: &DocPath, field: &str, values: &[String]) -> StoreResult<()> {
        self.commit(path, |current| {
            let mut list = match current.as_ref().and_then(|doc| doc.get(field)) {
                None => Vec::new(),
                Some(FieldValue::StrList(list)) => list.clone(),
                Some(_) => {
                    return Err(StoreError::FieldType {
                        path: path.to_string(),
                        field: field.to_string(),
                    });
                }
            };
            for value in values {
                if !list.contains(value) {
                    list.push(value.clone());
                }
            }
            Ok(StoreDocument::new().with(field, FieldValue::StrList(list)))
        })
    }

    async fn list_collection(&self, collection: &DocPath) -> StoreResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM documents WHERE parent = ?1 ORDER BY name")?;
        let rows = stmt.query_map(params![collection.to_string()], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<String>, _>>()?)
    }

    fn subscribe(&self, path: &DocPath, sink: ChangeSink) -> SubscriptionHandle {
        self.watchers.register(path, sink)
    }
}
