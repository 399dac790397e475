//! Client configuration constants.
//!
//! Centralizes hardcoded values for easier configuration and documentation.

use std::time::Duration;

/// Top-level collection in the durable store.
pub const DEFAULT_COLLECTION_ROOT: &str = "Primary";

/// Largest HQ snapshot the relay will attempt to write. The hosted document
/// store rejects documents over 1 MiB; this leaves room for metadata fields.
pub const DEFAULT_MAX_SNAPSHOT_BYTES: usize = 1_000_000;

/// Largest month summary snapshot written to the month document.
pub const DEFAULT_MAX_MONTH_SNAPSHOT_BYTES: usize = 900_000;

/// Quiet period after the last local edit before a coalesced save is sent.
pub const DEFAULT_SAVE_DEBOUNCE: Duration = Duration::from_millis(250);

/// Resident scopes beyond this count are served read-only from the month
/// cache instead of opening a live session (and a peer room) each.
pub const DEFAULT_MAX_LIVE_SESSIONS: usize = 8;

/// File name of the local replica database under the data directory.
pub const LOCAL_DB_FILE: &str = "replicas.sqlite";

/// Application directory name under the platform data directory.
pub const APP_DIR: &str = "hqsync";

/// Capacity of the client event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// Durable store field names.

pub const FIELD_TEAMS: &str = "teams";
pub const FIELD_MONTH: &str = "month";
pub const FIELD_MONTH_STATE: &str = "monthState";
pub const FIELD_HQ_UPDATE: &str = "hqUpdate";
pub const FIELD_LAST_UPDATED: &str = "last_updated";
pub const FIELD_HQ_NAME: &str = "hq";
pub const FIELD_TEAM_NAME: &str = "sales_team";
