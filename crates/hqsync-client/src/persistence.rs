//! Local replica persistence.
//!
//! Each session keeps a full snapshot of its document on the device, keyed
//! by room name, so it can show data before any network path responds.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use hqsync_types::RoomName;
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("local persistence unavailable: {0}")]
    Unavailable(String),
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub trait LocalPersistence: Send + Sync {
    fn attach(&self, room: &RoomName) -> Result<Box<dyn ReplicaHandle>, PersistenceError>;
}

/// Attached storage slot for one room.
pub trait ReplicaHandle: Send {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError>;
    fn store(&mut self, snapshot: &[u8]) -> Result<(), PersistenceError>;
    fn close(self: Box<Self>);
}

// ============================================================================
// In-memory
// ============================================================================

/// Persistence that lives as long as the value (and its clones).
#[derive(Clone, Default)]
pub struct MemoryPersistence {
    slots: Arc<Mutex<HashMap<RoomName, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate storage failure: attach fails while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn snapshot(&self, room: &RoomName) -> Option<Vec<u8>> {
        self.slots.lock().get(room).cloned()
    }
}

impl LocalPersistence for MemoryPersistence {
    fn attach(&self, room: &RoomName) -> Result<Box<dyn ReplicaHandle>, PersistenceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable(format!("cannot attach {room}")));
        }
        Ok(Box::new(MemoryHandle {
            slots: self.slots.clone(),
            room: room.clone(),
        }))
    }
}

struct MemoryHandle {
    slots: Arc<Mutex<HashMap<RoomName, Vec<u8>>>>,
    room: RoomName,
}

impl ReplicaHandle for MemoryHandle {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        Ok(self.slots.lock().get(&self.room).cloned())
    }

    fn store(&mut self, snapshot: &[u8]) -> Result<(), PersistenceError> {
        self.slots.lock().insert(self.room.clone(), snapshot.to_vec());
        Ok(())
    }

    fn close(self: Box<Self>) {}
}

// ============================================================================
// SQLite
// ============================================================================

const SCHEMA: &str = r#"
-- Latest snapshot per room
CREATE TABLE IF NOT EXISTS replicas (
    room TEXT PRIMARY KEY,
    snapshot BLOB NOT NULL,
    updated_at INTEGER DEFAULT (unixepoch())
);
"#;

/// Replica snapshots in a SQLite database.
#[derive(Clone)]
pub struct SqlitePersistence {
    conn: Arc<Mutex<Connection>>,
}

impl SqlitePersistence {
    /// Open or create a database at the given path, creating parent dirs.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PersistenceError::Unavailable(format!("{}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

impl LocalPersistence for SqlitePersistence {
    fn attach(&self, room: &RoomName) -> Result<Box<dyn ReplicaHandle>, PersistenceError> {
        Ok(Box::new(SqliteHandle {
            conn: self.conn.clone(),
            room: room.clone(),
        }))
    }
}

struct SqliteHandle {
    conn: Arc<Mutex<Connection>>,
    room: RoomName,
}

impl ReplicaHandle for SqliteHandle {
    fn load(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        let conn = self.conn.lock();
        let snapshot = conn
            .query_row(
                "SELECT snapshot FROM replicas WHERE room = ?1",
                params![self.room.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(snapshot)
    }

    fn store(&mut self, snapshot: &[u8]) -> Result<(), PersistenceError> {
        self.conn.lock().execute(
            "INSERT INTO replicas (room, snapshot) VALUES (?1, ?2)
             ON CONFLICT(room) DO UPDATE SET snapshot = excluded.snapshot, updated_at = unixepoch()",
            params![self.room.as_str(), snapshot],
        )?;
        Ok(())
    }

    fn close(self: Box<Self>) {}
}
