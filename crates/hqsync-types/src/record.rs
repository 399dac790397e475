//! Flat transaction records.
//!
//! A [`Record`] is an opaque mapping of scalar fields. The engine only ever
//! looks at three of them: `invoice_no` (identity), `sales_team` and `hq`
//! (ownership tags). Records are never edited in place; an edit is a delete
//! followed by an append.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::scope::HqRef;

pub const FIELD_INVOICE_NO: &str = "invoice_no";
pub const FIELD_SALES_TEAM: &str = "sales_team";
pub const FIELD_HQ: &str = "hq";
pub const FIELD_CUSTOMER: &str = "customer";
pub const FIELD_ITEM_NAME: &str = "item_name";
pub const FIELD_QTY: &str = "qty";
pub const FIELD_VALUE: &str = "value";
pub const FIELD_POSTING_DATE: &str = "posting_date";

/// Errors from decoding records.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("record JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// A unique invoice identifier.
#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InvoiceNo(String);

impl InvoiceNo {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Generate a fresh invoice number (`INV-` + 12 hex chars).
    ///
    /// The hex is the random tail of a UUIDv7, so numbers are unique but not
    /// ordered by time.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::now_v7().as_simple().to_string();
        Self(format!("INV-{}", &hex[hex.len() - 12..]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InvoiceNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One transaction line: a flat map of scalar fields.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

fn is_scalar(v: &Value) -> bool {
    matches!(v, Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))
}

impl Record {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build a record from arbitrary JSON fields, keeping only scalars.
    ///
    /// Returns the record and the names of dropped non-scalar fields.
    pub fn flatten(fields: Map<String, Value>) -> (Self, Vec<String>) {
        let mut dropped = Vec::new();
        let mut kept = Map::new();
        for (k, v) in fields {
            if is_scalar(&v) {
                kept.insert(k, v);
            } else {
                dropped.push(k);
            }
        }
        (Self(kept), dropped)
    }

    /// Builder-style scalar field setter. Non-scalar values are ignored.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if is_scalar(&value) {
            self.0.insert(field.to_string(), value);
        }
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    pub fn invoice_no(&self) -> Option<&str> {
        self.get_str(FIELD_INVOICE_NO)
    }

    pub fn sales_team(&self) -> Option<&str> {
        self.get_str(FIELD_SALES_TEAM)
    }

    pub fn hq(&self) -> Option<&str> {
        self.get_str(FIELD_HQ)
    }

    /// The (team, hq) tags, if both are present.
    pub fn hq_ref(&self) -> Option<HqRef> {
        Some(HqRef::new(self.sales_team()?, self.hq()?))
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_fields(self) -> Map<String, Value> {
        self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compact JSON encoding used as the element payload in documents.
    pub fn to_json_string(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Decode an element payload. Non-scalar fields are dropped.
    pub fn from_json_str(s: &str) -> Result<Self, RecordError> {
        match serde_json::from_str::<Value>(s)? {
            Value::Object(map) => Ok(Self::flatten(map).0),
            _ => Err(RecordError::NotAnObject),
        }
    }
}

/// User input for a new record, before it is stamped with its scope.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordDraft {
    pub customer: String,
    pub item_name: String,
    pub qty: i64,
    pub value: f64,
    /// Additional scalar fields carried through verbatim.
    #[serde(default)]
    pub extra: Map<String, Value>,
}

impl RecordDraft {
    pub fn new(customer: impl Into<String>, item_name: impl Into<String>, qty: i64, value: f64) -> Self {
        Self {
            customer: customer.into(),
            item_name: item_name.into(),
            qty,
            value,
            extra: Map::new(),
        }
    }

    /// Stamp the draft for an HQ: ownership tags, a fresh invoice number and
    /// the posting date. Tags always override anything in `extra`.
    pub fn stamp(self, hq: &HqRef, posting_date: &str) -> Record {
        let (mut record, _) = Record::flatten(self.extra);
        record = record
            .with(FIELD_CUSTOMER, self.customer)
            .with(FIELD_ITEM_NAME, self.item_name)
            .with(FIELD_QTY, self.qty)
            .with(FIELD_VALUE, self.value)
            .with(FIELD_INVOICE_NO, InvoiceNo::generate().to_string())
            .with(FIELD_POSTING_DATE, posting_date)
            .with(FIELD_SALES_TEAM, hq.team.clone())
            .with(FIELD_HQ, hq.name.clone());
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_drops_nested_fields() {
        let Value::Object(map) = json!({
            "invoice_no": "INV-1",
            "qty": 5,
            "items": [{"qty": 1}],
            "customer": {"name": "X"},
            "is_return": false,
            "note": null,
        }) else {
            unreachable!()
        };
        let (record, mut dropped) = Record::flatten(map);
        dropped.sort();
        assert_eq!(dropped, vec!["customer".to_string(), "items".to_string()]);
        assert_eq!(record.invoice_no(), Some("INV-1"));
        assert_eq!(record.len(), 4);
    }

    #[test]
    fn test_json_string_roundtrip_preserves_fields() {
        let record = Record::new().with("invoice_no", "INV-1").with("qty", 5).with("ok", true);
        let back = Record::from_json_str(&record.to_json_string()).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_from_json_str_rejects_non_object() {
        assert!(matches!(Record::from_json_str("[1,2]"), Err(RecordError::NotAnObject)));
        assert!(matches!(Record::from_json_str("{"), Err(RecordError::Json(_))));
    }

    #[test]
    fn test_stamp_tags_and_invoice() {
        let mut draft = RecordDraft::new("X", "Y", 2, 100.0);
        draft.extra.insert("sales_team".into(), json!("Spoofed"));
        draft.extra.insert("batch".into(), json!("B-7"));

        let record = draft.stamp(&HqRef::new("North", "Delhi"), "2025-01-15");
        assert_eq!(record.sales_team(), Some("North"));
        assert_eq!(record.hq(), Some("Delhi"));
        assert_eq!(record.get("batch"), Some(&json!("B-7")));
        assert_eq!(record.get("qty"), Some(&json!(2)));
        assert_eq!(record.get("posting_date"), Some(&json!("2025-01-15")));
        assert!(record.invoice_no().unwrap().starts_with("INV-"));
    }

    #[test]
    fn test_generated_invoices_are_unique() {
        let a = InvoiceNo::generate();
        let b = InvoiceNo::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), "INV-".len() + 12);
    }
}
