//! The unit of work flowing through the processor.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// A record: identifier, declared type tag, untyped payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(id: impl Into<String>, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            payload,
        }
    }

    /// Deterministic cache key: `kind:id:<payload hash>`.
    ///
    /// `serde_json` keeps object keys sorted unless `preserve_order` is on,
    /// so equal payloads serialize identically.
    pub fn cache_key(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.payload.to_string().hash(&mut hasher);
        format!("{}:{}:{:016x}", self.kind, self.id, hasher.finish())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_cache_key_is_stable() {
        let a = Record::new("r1", "invoice", json!({"price": 10, "date": "01/02/2024"}));
        let b = Record::new("r1", "invoice", json!({"date": "01/02/2024", "price": 10}));
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().starts_with("invoice:r1:"));

        let c = Record::new("r1", "invoice", json!({"price": 11, "date": "01/02/2024"}));
        assert_ne!(a.cache_key(), c.cache_key());
    }

    #[test]
    fn test_missing_payload_defaults_to_null() {
        let record: Record = serde_json::from_str(r#"{"id":"x","kind":"k"}"#).unwrap();
        assert!(record.payload.is_null());
    }
}
