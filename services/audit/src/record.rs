//! Audit record wire type shared by the catalog service and the audit sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of mutation an audit record describes
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable fact describing one catalog mutation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// What happened to the item
    pub action: AuditAction,
    /// String form of the affected item identity
    #[serde(rename = "itemID")]
    pub item_id: String,
    /// When the record was generated
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    /// Generate a record for `action` on `item_id`, stamped now
    pub fn new(action: AuditAction, item_id: impl Into<String>) -> Self {
        Self {
            action,
            item_id: item_id.into(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_record_wire_format() {
        let record = AuditRecord::new(AuditAction::Delete, "42");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["action"], "delete");
        assert_eq!(json["itemID"], "42");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_deserialize_audit_record() {
        let json = r#"{
            "action": "update",
            "itemID": "7",
            "timestamp": "2024-01-15T10:30:00Z"
        }"#;

        let record: AuditRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.action, AuditAction::Update);
        assert_eq!(record.item_id, "7");
    }

    #[test]
    fn test_unknown_action_rejected() {
        let json = r#"{"action": "patch", "itemID": "1", "timestamp": "2024-01-15T10:30:00Z"}"#;
        assert!(serde_json::from_str::<AuditRecord>(json).is_err());
    }
}
