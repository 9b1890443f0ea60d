//! Modification: INSERT/UPDATE field-set building.
//!
//! Write statements are assembled from an ordered field-value list plus the
//! structural bookkeeping columns (timestamps, acting user, soft-delete
//! flag). Update expressions ([`UpdateValue`]) are consumed explicitly here;
//! they never leak into statements as literal scalars.

use atrium_db::{quote_ident, Value};

use crate::error::{Result, SchemaError};
use crate::query::{Query, UpdateValue};
use crate::request::RequestValues;
use crate::structure::Structure;

/// An ordered column -> value assignment list.
#[derive(Debug, Clone, Default)]
pub struct FieldValues {
    entries: Vec<(String, UpdateValue)>,
}

impl FieldValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a column to an update expression, replacing an earlier assignment.
    pub fn set(&mut self, column: &str, value: UpdateValue) -> &mut Self {
        match self.entries.iter_mut().find(|(name, _)| name == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column.to_string(), value)),
        }
        self
    }

    /// Set a column to a plain scalar.
    pub fn set_value(&mut self, column: &str, value: impl Into<Value>) -> &mut Self {
        self.set(column, UpdateValue::Set(value.into()))
    }

    /// Builder-style scalar assignment.
    pub fn with(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.set_value(column, value);
        self
    }

    pub fn has(&self, column: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == column)
    }

    pub fn get(&self, column: &str) -> Option<&UpdateValue> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// The scalar integer assigned to a column, when it is a plain set.
    pub fn int(&self, column: &str) -> Option<i64> {
        match self.get(column)? {
            UpdateValue::Set(value) => value.as_int(),
            _ => None,
        }
    }

    pub fn remove(&mut self, column: &str) {
        self.entries.retain(|(name, _)| name != column);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, UpdateValue)> {
        self.entries.iter()
    }
}

/// Write-side SQL assembly for one structure.
pub struct Modification<'a> {
    structure: &'a Structure,
}

impl<'a> Modification<'a> {
    pub fn new(structure: &'a Structure) -> Self {
        Self { structure }
    }

    /// Extract every editable field addressed by the request.
    ///
    /// The id field is never written; fields the request does not address
    /// stay untouched.
    pub fn from_request(&self, request: &RequestValues) -> FieldValues {
        let id_key = self.structure.id_key();
        let mut values = FieldValues::new();
        for field in &self.structure.fields {
            if Some(field.name.as_str()) == id_key || !field.can_edit {
                continue;
            }
            if let Some(value) = field.from_request(request) {
                values.set_value(&field.name, value);
            }
        }
        values
    }

    /// Bookkeeping columns stamped on create.
    pub fn apply_create_bookkeeping(&self, values: &mut FieldValues, actor: Option<i64>, now: i64) {
        let s = self.structure;
        if s.has_status && !values.has("status") {
            values.set_value("status", 1i64);
        }
        if s.has_fem_status && !values.has("femStatus") {
            values.set_value("femStatus", 1i64);
        }
        if s.has_timestamps {
            values.set_value("createdTime", now);
            values.set_value("modifiedTime", now);
        }
        if s.has_users {
            values.set_value("createdUser", actor.unwrap_or(0));
            values.set_value("modifiedUser", actor.unwrap_or(0));
        }
        if s.soft_deletes() && !values.has("isDeleted") {
            values.set_value("isDeleted", 0i64);
        }
    }

    /// Bookkeeping columns stamped on edit.
    pub fn apply_edit_bookkeeping(&self, values: &mut FieldValues, actor: Option<i64>, now: i64) {
        if self.structure.has_timestamps {
            values.set_value("modifiedTime", now);
        }
        if self.structure.has_users {
            values.set_value("modifiedUser", actor.unwrap_or(0));
        }
    }

    /// `INSERT INTO ... VALUES (...)`.
    ///
    /// Only plain scalar assignments are valid on insert; an update
    /// expression has no current row to act on.
    pub fn insert_sql(&self, values: &FieldValues) -> Result<(String, Vec<Value>)> {
        self.insert_like_sql("INSERT", values)
    }

    /// `REPLACE INTO ...`: insert-or-replace by primary key.
    pub fn replace_sql(&self, values: &FieldValues) -> Result<(String, Vec<Value>)> {
        self.insert_like_sql("REPLACE", values)
    }

    fn insert_like_sql(&self, verb: &str, values: &FieldValues) -> Result<(String, Vec<Value>)> {
        let mut columns = Vec::new();
        let mut params = Vec::new();
        for (column, value) in values.iter() {
            match value {
                UpdateValue::Set(scalar) => {
                    columns.push(quote_ident(column));
                    params.push(scalar.clone());
                }
                other => {
                    return Err(SchemaError::definition(format!(
                        "Column '{}': {:?} is not insertable",
                        column, other
                    )))
                }
            }
        }
        let sql = format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            quote_ident(&self.structure.table),
            columns.join(", "),
            vec!["?"; columns.len()].join(", ")
        );
        Ok((sql, params))
    }

    /// `UPDATE ... SET ... [WHERE ...]` with explicit expression rendering.
    pub fn update_sql(&self, values: &FieldValues, query: &Query) -> (String, Vec<Value>) {
        let mut sets = Vec::new();
        let mut params = Vec::new();
        for (column, value) in values.iter() {
            let column_sql = quote_ident(column);
            match value {
                UpdateValue::Set(scalar) => {
                    sets.push(format!("{} = ?", column_sql));
                    params.push(scalar.clone());
                }
                UpdateValue::Increment(amount) => {
                    sets.push(format!("{} = {} + ?", column_sql, column_sql));
                    params.push(Value::Int(*amount));
                }
                UpdateValue::Decrement(amount) => {
                    sets.push(format!("{} = {} - ?", column_sql, column_sql));
                    params.push(Value::Int(*amount));
                }
                UpdateValue::Toggle => {
                    sets.push(format!("{} = 1 - {}", column_sql, column_sql));
                }
                UpdateValue::CopyFrom(other) => {
                    sets.push(format!("{} = {}", column_sql, quote_ident(other)));
                }
                UpdateValue::Replace { from, to } => {
                    sets.push(format!("{} = REPLACE({}, ?, ?)", column_sql, column_sql));
                    params.push(Value::Text(from.clone()));
                    params.push(Value::Text(to.clone()));
                }
                UpdateValue::Raw { sql, params: raw } => {
                    sets.push(format!("{} = {}", column_sql, sql));
                    params.extend(raw.iter().cloned());
                }
            }
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            quote_ident(&self.structure.table),
            sets.join(", ")
        );
        let where_body = query.where_sql();
        if !where_body.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_body);
        }
        params.extend(query.params());
        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::StructureDef;

    fn structure() -> Structure {
        let def: StructureDef = serde_json::from_value(serde_json::json!({
            "table": "articles",
            "fields": [
                {"key": "id", "type": "ID"},
                {"key": "title", "type": "String"},
                {"key": "price", "type": "Price"},
                {"key": "locked", "type": "String", "canEdit": false}
            ],
            "hasTimestamps": true,
            "hasUsers": true,
            "canDelete": true
        }))
        .unwrap();
        Structure::from_def("article", &def).unwrap()
    }

    #[test]
    fn request_extraction_skips_id_and_uneditable() {
        let structure = structure();
        let modification = Modification::new(&structure);
        let request = RequestValues::new()
            .with("id", 99)
            .with("title", "Hello")
            .with("price", "12.34")
            .with("locked", "nope");
        let values = modification.from_request(&request);
        assert!(!values.has("id"));
        assert!(!values.has("locked"));
        assert_eq!(values.int("price"), Some(1234));
        assert_eq!(
            values.get("title"),
            Some(&UpdateValue::Set(Value::Text("Hello".into())))
        );
    }

    #[test]
    fn create_bookkeeping_stamps_fixed_columns() {
        let structure = structure();
        let modification = Modification::new(&structure);
        let mut values = FieldValues::new().with("title", "x");
        modification.apply_create_bookkeeping(&mut values, Some(42), 1000);
        assert_eq!(values.int("createdTime"), Some(1000));
        assert_eq!(values.int("modifiedTime"), Some(1000));
        assert_eq!(values.int("createdUser"), Some(42));
        assert_eq!(values.int("isDeleted"), Some(0));
    }

    #[test]
    fn insert_rejects_expressions() {
        let structure = structure();
        let modification = Modification::new(&structure);
        let mut values = FieldValues::new();
        values.set("price", UpdateValue::Increment(1));
        assert!(modification.insert_sql(&values).is_err());
    }

    #[test]
    fn update_renders_expressions() {
        let structure = structure();
        let modification = Modification::new(&structure);
        let mut values = FieldValues::new();
        values.set_value("title", "New");
        values.set("price", UpdateValue::Increment(5));
        values.set("isDeleted", UpdateValue::Toggle);
        values.set(
            "title2",
            UpdateValue::Replace {
                from: "a".into(),
                to: "b".into(),
            },
        );
        let query = Query::create("id", "=", 3);
        let (sql, params) = modification.update_sql(&values, &query);
        assert_eq!(
            sql,
            "UPDATE \"articles\" SET \"title\" = ?, \"price\" = \"price\" + ?, \
             \"isDeleted\" = 1 - \"isDeleted\", \"title2\" = REPLACE(\"title2\", ?, ?) \
             WHERE id = ?"
        );
        assert_eq!(params.len(), 5);
        assert_eq!(params[4], Value::Int(3));
    }
}
