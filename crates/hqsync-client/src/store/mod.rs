//! Durable document store abstraction.
//!
//! Documents live at slash-separated paths under a collection root:
//!
//! ```text
//! Primary/{month}                     teams, monthState, last_updated
//! Primary/{month}/{team}/{hq}         hqUpdate, hq, sales_team, last_updated
//! ```
//!
//! Writes merge field-by-field; fields not named in a write are untouched.
//! Change feeds are push-based and delivered through a [`ChangeSink`].

mod memory;
mod sqlite;
mod watch;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use hqsync_types::{Month, ScopeKey};
use thiserror::Error;

use crate::subscription::SubscriptionHandle;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid document path: {0:?}")]
    InvalidPath(String),
    #[error("field {field} of {path} has unexpected type")]
    FieldType { path: String, field: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Slash-separated document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(Vec<String>);

impl DocPath {
    pub fn new<I, S>(segments: I) -> StoreResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() || segments.iter().any(|s| s.is_empty() || s.contains('/')) {
            return Err(StoreError::InvalidPath(segments.join("/")));
        }
        Ok(Self(segments))
    }

    pub fn parse(path: &str) -> StoreResult<Self> {
        Self::new(path.split('/'))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Last path segment (the document id within its collection).
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    pub fn parent(&self) -> Option<DocPath> {
        if self.0.len() <= 1 {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    pub fn child(&self, name: &str) -> StoreResult<DocPath> {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self::new(segments)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

/// Maps scopes to document paths under a collection root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: String,
}

impl StoreLayout {
    pub fn new(root: impl Into<String>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// `Primary/{month}`: team list and month summary.
    pub fn month_doc(&self, month: &Month) -> StoreResult<DocPath> {
        DocPath::new([self.root.as_str(), month.as_str()])
    }

    /// `Primary/{month}/{team}`: collection of HQ documents.
    pub fn team_collection(&self, month: &Month, team: &str) -> StoreResult<DocPath> {
        DocPath::new([self.root.as_str(), month.as_str(), team])
    }

    /// `Primary/{month}/{team}/{hq}`: the HQ snapshot document.
    pub fn hq_doc(&self, scope: &ScopeKey) -> StoreResult<DocPath> {
        match (scope.team(), scope.hq()) {
            (Some(team), Some(hq)) => DocPath::new([self.root.as_str(), scope.month().as_str(), team, hq]),
            _ => Err(StoreError::InvalidPath(format!("{scope} is not an HQ scope"))),
        }
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Str(String),
    Bytes(Vec<u8>),
    StrList(Vec<String>),
}

impl FieldValue {
    pub fn kind(&self) -> &'static str {
        match self {
            FieldValue::Str(_) => "str",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::StrList(_) => "str_list",
        }
    }
}

/// Field map of one stored document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreDocument(BTreeMap<String, FieldValue>);

impl StoreDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field: &str, value: FieldValue) -> Self {
        self.set(field, value);
        self
    }

    pub fn set(&mut self, field: &str, value: FieldValue) {
        self.0.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn str(&self, field: &str) -> Option<&str> {
        match self.0.get(field) {
            Some(FieldValue::Str(s)) => Some(s),
            _ => None,
        }
    }

    pub fn bytes(&self, field: &str) -> Option<&[u8]> {
        match self.0.get(field) {
            Some(FieldValue::Bytes(b)) => Some(b),
            _ => None,
        }
    }

    pub fn str_list(&self, field: &str) -> Option<&[String]> {
        match self.0.get(field) {
            Some(FieldValue::StrList(v)) => Some(v),
            _ => None,
        }
    }

    /// Merge `other` into self, replacing fields it names.
    pub fn merge(&mut self, other: StoreDocument) {
        self.0.extend(other.0);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A change pushed by a store subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreChange {
    pub path: DocPath,
    /// Full document after the change; `None` if it does not exist.
    pub document: Option<StoreDocument>,
}

/// Callback receiving change notifications.
pub type ChangeSink = Arc<dyn Fn(StoreChange) + Send + Sync>;

/// Durable document store.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> StoreResult<Option<StoreDocument>>;

    /// Merge-style write: creates the document if missing.
    async fn set_merge(&self, path: &DocPath, fields: StoreDocument) -> StoreResult<()>;

    /// Add `values` to a string-list field, skipping ones already present.
    async fn array_union(&self, path: &DocPath, field: &str, values: &[String]) -> StoreResult<()>;

    /// Names of documents directly under `collection`, sorted.
    async fn list_collection(&self, collection: &DocPath) -> StoreResult<Vec<String>>;

    /// Watch a single document. The sink may be invoked on the writer's
    /// thread; it must not block.
    fn subscribe(&self, path: &DocPath, sink: ChangeSink) -> SubscriptionHandle;
}
