use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

mod validation;

pub use validation::{parse_record, short_label, RecordError};

/// LocationRecord is the canonical position of one tracked agent.
///
/// Records are only ever constructed through [`parse_record`], which
/// enforces the finite-coordinate invariant. A record that exists is a
/// valid record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    /// Storage key; unique within the reconciled map
    pub id: String,

    /// Finite latitude in decimal degrees
    pub latitude: f64,

    /// Finite longitude in decimal degrees
    pub longitude: f64,

    /// Human label; see [`LocationRecord::label`] for the fallback
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    /// When the sample was produced (advisory; arrival order governs
    /// reconciliation)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,

    /// Route the agent is serving, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_label: Option<String>,

    /// Contact value used for self-matching
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact_identity: Option<String>,
}

impl LocationRecord {
    /// Display label: the record's name, or a truncated form of the id
    pub fn label(&self) -> String {
        match &self.display_name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => short_label(&self.id),
        }
    }
}

/// Change-feed operation tag
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

/// ChangeEvent is one entry of a collection's change feed.
///
/// The payload is an opaque JSON object carrying the record fields; it
/// is ignored for `delete`. Event ids are UUIDv7 (time-ordered),
/// stamped by the store when the event is emitted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "eventId")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,

    pub operation: Operation,

    /// Key of the affected record
    pub id: String,

    /// Record fields (JSON object); ignored for deletes
    pub payload: Value,
}
