//! Shared scope and record types for hqsync.
//!
//! This crate is the leaf of the workspace: scope identifiers for the
//! Month → Team → HQ hierarchy and the flat transaction records that live
//! inside HQ documents. It has **no internal hqsync dependencies**.
//!
//! # Hierarchy
//!
//! ```text
//! Month (Month, "2025-01")
//!     └── Team ("North")
//!         └── HQ ("Delhi")  ← one replicated document per HQ
//!             └── Record { invoice_no, sales_team, hq, ... }
//! ```
//!
//! # Key Types
//!
//! |-----------------|------------------------------------------------|
//! | Type            | Purpose                                        |
//! |-----------------|------------------------------------------------|
//! | [`Month`]       | Validated `YYYY-MM` month                      |
//! | [`ScopeKey`]    | Point in the hierarchy (month, team?, hq?)     |
//! | [`HqRef`]       | A (team, hq) pair within a month               |
//! | [`RoomName`]    | Deterministic peer-transport channel name      |
//! | [`Record`]      | Flat scalar field map for one transaction line |
//! | [`RecordDraft`] | User input, stamped into a [`Record`]          |
//! |-----------------|------------------------------------------------|

pub mod record;
pub mod scope;

pub use record::{
    FIELD_CUSTOMER, FIELD_HQ, FIELD_INVOICE_NO, FIELD_ITEM_NAME, FIELD_POSTING_DATE, FIELD_QTY,
    FIELD_SALES_TEAM, FIELD_VALUE, InvoiceNo, Record, RecordDraft, RecordError,
};
pub use scope::{HqRef, Month, RoomName, ScopeError, ScopeKey, validate_segment};

/// Current time as an RFC 3339 string (UTC). Used for heartbeat timestamps.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Today's UTC date as `YYYY-MM-DD`.
pub fn today() -> String {
    chrono::Utc::now().date_naive().format("%Y-%m-%d").to_string()
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
