//! Record: one resolved, display-ready row.

use serde_json::{Map, Value as Json};

/// A resolved row: the flat display-key map produced by selection.
///
/// A lookup that matched nothing yields an empty record, never an error;
/// callers distinguish "absent" from "failed" with [`Record::is_empty`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    values: Map<String, Json>,
}

impl Record {
    pub fn new(values: Map<String, Json>) -> Self {
        Self { values }
    }

    /// The empty record: the soft "not found" value.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Json> {
        self.values.get(key)
    }

    /// The row id, 0 when absent.
    pub fn id(&self) -> i64 {
        self.int("id").unwrap_or(0)
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
            Json::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.values.get(key)?.as_str()
    }

    pub fn bool(&self, key: &str) -> bool {
        match self.values.get(key) {
            Some(Json::Bool(b)) => *b,
            Some(Json::Number(n)) => n.as_f64().unwrap_or(0.0) != 0.0,
            _ => false,
        }
    }

    pub(crate) fn insert(&mut self, key: String, value: Json) {
        self.values.insert(key, value);
    }

    pub(crate) fn values_mut(&mut self) -> &mut Map<String, Json> {
        &mut self.values
    }

    /// Consume into the underlying JSON object.
    pub fn into_json(self) -> Json {
        Json::Object(self.values)
    }

    pub fn as_map(&self) -> &Map<String, Json> {
        &self.values
    }
}

impl From<Record> for Json {
    fn from(record: Record) -> Json {
        record.into_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_record_is_the_not_found_value() {
        let record = Record::empty();
        assert!(record.is_empty());
        assert_eq!(record.id(), 0);
        assert_eq!(record.get("anything"), None);
    }

    #[test]
    fn typed_getters() {
        let mut record = Record::empty();
        record.insert("id".into(), serde_json::json!(7));
        record.insert("title".into(), serde_json::json!("Hello"));
        record.insert("isActive".into(), serde_json::json!(true));
        assert_eq!(record.id(), 7);
        assert_eq!(record.str("title"), Some("Hello"));
        assert!(record.bool("isActive"));
        assert!(!record.is_empty());
    }
}
