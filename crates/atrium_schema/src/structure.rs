//! Structure: the declarative metadata for one entity.

use crate::count::Count;
use crate::definition::StructureDef;
use crate::error::{Result, SchemaError};
use crate::field::{Field, FieldKind};
use crate::join::Join;

/// Which part of a structure owns a referenced column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnOwner {
    /// A field of the main table; the column name.
    Own(String),
    /// A field of a join: (join index, raw column name on the joined table).
    Joined(usize, String),
    /// A count aggregate: the count index.
    Aggregate(usize),
}

/// Fields, joins, counts and capability flags for one entity.
///
/// Built once per schema key, memoized by the registry, and shared read-only
/// afterwards.
#[derive(Debug, Clone)]
pub struct Structure {
    pub key: String,
    pub table: String,
    pub fields: Vec<Field>,
    pub joins: Vec<Join>,
    pub counts: Vec<Count>,
    pub has_status: bool,
    pub has_fem_status: bool,
    pub has_position: bool,
    pub has_timestamps: bool,
    pub has_users: bool,
    pub can_create: bool,
    pub can_edit: bool,
    pub can_delete: bool,
    id_key: Option<String>,
    name_key: Option<String>,
}

impl Structure {
    pub(crate) fn from_def(key: &str, def: &StructureDef) -> Result<Self> {
        let mut fields: Vec<Field> = def.fields.iter().map(|f| Field::from_def(f, "")).collect();
        inject_implicit_fields(&mut fields, def);

        let id_key = find_id_key(&fields);
        let name_key = fields.iter().find(|f| f.is_name).map(|f| f.name.clone());

        let mut seen = std::collections::BTreeSet::new();
        for field in &fields {
            if !seen.insert(field.name.clone()) {
                return Err(SchemaError::definition(format!(
                    "Schema '{}': duplicate field '{}'",
                    key, field.name
                )));
            }
        }

        Ok(Self {
            key: key.to_string(),
            table: def.table.clone(),
            fields,
            joins: def.joins.iter().map(Join::from_def).collect(),
            counts: def.counts.iter().map(Count::from_def).collect(),
            has_status: def.has_status,
            has_fem_status: def.has_fem_status,
            has_position: def.has_position,
            has_timestamps: def.has_timestamps,
            has_users: def.has_users,
            can_create: def.can_create,
            can_edit: def.can_edit,
            can_delete: def.can_delete,
            id_key,
            name_key,
        })
    }

    /// The single id column, when the structure has one.
    ///
    /// Composite-key structures (several `isPrimary` fields and no `ID`
    /// field) track no id and id-shortcut operations are unavailable.
    pub fn id_key(&self) -> Option<&str> {
        self.id_key.as_deref()
    }

    /// The column used for natural ordering and labeling.
    pub fn name_key(&self) -> Option<&str> {
        self.name_key.as_deref()
    }

    /// Columns used for free-text search: all name fields, else the id.
    pub fn search_keys(&self) -> Vec<String> {
        let names: Vec<String> = self
            .fields
            .iter()
            .filter(|f| f.is_name)
            .map(|f| f.name.clone())
            .collect();
        if names.is_empty() {
            self.id_key.iter().map(|k| k.to_string()).collect()
        } else {
            names
        }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether deletes mark rows instead of removing them.
    pub fn soft_deletes(&self) -> bool {
        self.can_delete && self.field("isDeleted").is_some()
    }

    /// Resolve which part of the structure owns a column reference.
    ///
    /// Checked in order: own fields by column name, join fields by display
    /// key, count aliases. First match wins; unknown columns yield `None`
    /// and stay unqualified.
    pub fn owner_of(&self, column: &str) -> Option<ColumnOwner> {
        if self.fields.iter().any(|f| f.name == column) {
            return Some(ColumnOwner::Own(column.to_string()));
        }
        for (index, join) in self.joins.iter().enumerate() {
            if let Some(field) = join.fields.iter().find(|f| f.key == column) {
                return Some(ColumnOwner::Joined(index, field.name.clone()));
            }
        }
        for (index, count) in self.counts.iter().enumerate() {
            if count.key == column {
                return Some(ColumnOwner::Aggregate(index));
            }
        }
        None
    }

    /// Fields whose `isPrimary` flag contributes to the primary key.
    pub fn primary_fields(&self) -> Vec<&Field> {
        self.fields.iter().filter(|f| f.is_primary).collect()
    }
}

/// Capability-driven bookkeeping columns, appended after declared fields.
///
/// The order of these steps is a compatibility invariant: migrations diff
/// live tables against declared order, so it must never change.
fn inject_implicit_fields(fields: &mut Vec<Field>, def: &StructureDef) {
    let steps: [(bool, fn() -> Field); 8] = [
        (def.has_status, status_field),
        (def.has_fem_status, fem_status_field),
        (def.has_position, position_field),
        (def.has_timestamps, created_time_field),
        (def.has_users, created_user_field),
        (def.has_timestamps, modified_time_field),
        (def.has_users, modified_user_field),
        (def.can_delete, is_deleted_field),
    ];
    for (enabled, build) in steps {
        if enabled {
            fields.push(build());
        }
    }
}

fn status_field() -> Field {
    Field::implicit("status", FieldKind::Status, Some("1"))
}

fn fem_status_field() -> Field {
    Field::implicit("femStatus", FieldKind::FemStatus, Some("1"))
}

fn position_field() -> Field {
    Field::implicit("position", FieldKind::Number, Some("0"))
}

fn created_time_field() -> Field {
    Field::implicit("createdTime", FieldKind::Date, None)
}

fn created_user_field() -> Field {
    Field::implicit("createdUser", FieldKind::Number, None)
}

fn modified_time_field() -> Field {
    Field::implicit("modifiedTime", FieldKind::Date, None)
}

fn modified_user_field() -> Field {
    Field::implicit("modifiedUser", FieldKind::Number, None)
}

fn is_deleted_field() -> Field {
    Field::implicit("isDeleted", FieldKind::Boolean, Some("0"))
}

fn find_id_key(fields: &[Field]) -> Option<String> {
    let id_fields: Vec<&Field> = fields.iter().filter(|f| f.kind == FieldKind::Id).collect();
    if let [only] = id_fields.as_slice() {
        return Some(only.name.clone());
    }
    let primary: Vec<&Field> = fields.iter().filter(|f| f.is_primary).collect();
    if let [only] = primary.as_slice() {
        return Some(only.name.clone());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(json: serde_json::Value) -> Structure {
        let def: StructureDef = serde_json::from_value(json).unwrap();
        Structure::from_def("test", &def).unwrap()
    }

    #[test]
    fn implicit_fields_appear_in_fixed_order() {
        let structure = build(serde_json::json!({
            "table": "articles",
            "fields": [{"key": "id", "type": "ID"}, {"key": "title", "type": "String"}],
            "hasStatus": true,
            "hasFemStatus": true,
            "hasPosition": true,
            "hasTimestamps": true,
            "hasUsers": true,
            "canDelete": true
        }));
        let names: Vec<&str> = structure.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "id",
                "title",
                "status",
                "femStatus",
                "position",
                "createdTime",
                "createdUser",
                "modifiedTime",
                "modifiedUser",
                "isDeleted"
            ]
        );
    }

    #[test]
    fn partial_capabilities_skip_their_steps() {
        let structure = build(serde_json::json!({
            "table": "labels",
            "fields": [{"key": "id", "type": "ID"}],
            "hasPosition": true,
            "hasTimestamps": true
        }));
        let names: Vec<&str> = structure.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["id", "position", "createdTime", "modifiedTime"]);
        assert!(!structure.soft_deletes());
    }

    #[test]
    fn id_tracking() {
        let structure = build(serde_json::json!({
            "table": "a",
            "fields": [{"key": "id", "type": "ID"}, {"key": "x", "type": "Number"}]
        }));
        assert_eq!(structure.id_key(), Some("id"));

        let single_primary = build(serde_json::json!({
            "table": "a",
            "fields": [{"key": "code", "type": "String", "isPrimary": true}]
        }));
        assert_eq!(single_primary.id_key(), Some("code"));

        let composite = build(serde_json::json!({
            "table": "a",
            "fields": [
                {"key": "left", "type": "Number", "isPrimary": true},
                {"key": "right", "type": "Number", "isPrimary": true}
            ]
        }));
        assert_eq!(composite.id_key(), None);
    }

    #[test]
    fn owner_resolution_order() {
        let structure = build(serde_json::json!({
            "table": "articles",
            "fields": [{"key": "id", "type": "ID"}, {"key": "title", "type": "String"}],
            "joins": [{
                "key": "author", "table": "users",
                "leftKey": "id", "rightKey": "authorId",
                "fields": [{"key": "name", "type": "String"}]
            }],
            "counts": [{"key": "commentCount", "table": "comments", "column": "articleId"}]
        }));
        assert_eq!(
            structure.owner_of("title"),
            Some(ColumnOwner::Own("title".into()))
        );
        assert_eq!(
            structure.owner_of("authorName"),
            Some(ColumnOwner::Joined(0, "name".into()))
        );
        assert_eq!(
            structure.owner_of("commentCount"),
            Some(ColumnOwner::Aggregate(0))
        );
        assert_eq!(structure.owner_of("nope"), None);
    }
}
