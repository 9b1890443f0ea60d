//! Validated request values.
//!
//! The core never parses HTTP. Controllers hand over an already-validated
//! map of submitted key to JSON value; this wrapper adds the typed accessors
//! field extraction needs.

use serde_json::{Map, Value as Json};

/// Submitted field values, addressable by key.
#[derive(Debug, Clone, Default)]
pub struct RequestValues {
    values: Map<String, Json>,
}

impl RequestValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a JSON object; any other JSON value yields an empty set.
    pub fn from_json(json: Json) -> Self {
        match json {
            Json::Object(values) => Self { values },
            _ => Self::default(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Json>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }

    pub fn set(&mut self, key: &str, value: impl Into<Json>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Raw JSON value under a key.
    pub fn raw(&self, key: &str) -> Option<&Json> {
        self.values.get(key)
    }

    /// String form of the value under a key; numbers stringify.
    pub fn str(&self, key: &str) -> Option<String> {
        self.values.get(key).map(|v| match v {
            Json::String(s) => s.clone(),
            Json::Null => String::new(),
            other => other.to_string(),
        })
    }

    pub fn int(&self, key: &str) -> Option<i64> {
        match self.values.get(key)? {
            Json::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Json::String(s) => s.trim().parse().ok(),
            Json::Bool(b) => Some(*b as i64),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            Json::Number(n) => n.as_f64(),
            Json::String(s) => s.trim().replace(',', ".").parse().ok(),
            _ => None,
        }
    }

    /// Truthiness of the value under a key; absent keys are false.
    pub fn bool(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Json::Bool(b)) => *b,
            Some(Json::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
            Some(Json::String(s)) => matches!(s.as_str(), "1" | "true" | "on" | "yes"),
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_accessors() {
        let request = RequestValues::from_json(serde_json::json!({
            "title": "Hello",
            "count": 7,
            "ratio": "2,5",
            "active": "on"
        }));
        assert_eq!(request.str("title").as_deref(), Some("Hello"));
        assert_eq!(request.int("count"), Some(7));
        assert_eq!(request.float("ratio"), Some(2.5));
        assert!(request.bool("active"));
        assert!(!request.bool("missing"));
        assert!(request.has("count"));
        assert!(!request.has("missing"));
    }

    #[test]
    fn numbers_stringify() {
        let request = RequestValues::new().with("n", 42);
        assert_eq!(request.str("n").as_deref(), Some("42"));
    }
}
