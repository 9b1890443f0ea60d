//! The JSON schema definition format.
//!
//! Definitions are the stable contract between schema authoring and the core:
//! camelCase flag names and the exact field-type strings are preserved. A
//! definition set is a map of schema key to [`StructureDef`]; it can be loaded
//! from a JSON string, a single file, or a directory of `*.json` files.
//!
//! Everything is validated up front: field types must be known, every
//! table/column/alias must be a plain SQL identifier, and subrequests must
//! reference a declared schema. Malformed input fails here, before any
//! structure is built.

use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Result, SchemaError};
use crate::field::FieldKind;

/// One field declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDef {
    pub key: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub length: Option<u32>,
    #[serde(default)]
    pub decimals: Option<u32>,
    #[serde(default)]
    pub default: Option<Json>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default)]
    pub is_key: bool,
    #[serde(default)]
    pub is_name: bool,
    #[serde(default)]
    pub no_empty: bool,
    #[serde(default)]
    pub is_signed: bool,
    #[serde(default = "default_true")]
    pub can_edit: bool,
    #[serde(default)]
    pub no_prefix: bool,
    /// Name of the merge group this field contributes to (joins only).
    #[serde(default)]
    pub merge: Option<String>,
}

/// Extra `AND` condition on a join.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinAndDef {
    pub column: String,
    pub value: Json,
}

/// One join declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDef {
    /// Key prefix for the joined fields.
    pub key: String,
    pub table: String,
    #[serde(default)]
    pub alias: Option<String>,
    /// Table the join condition matches against; defaults to the main table.
    #[serde(default)]
    pub on: Option<String>,
    pub left_key: String,
    pub right_key: String,
    #[serde(default)]
    pub and: Option<JoinAndDef>,
    #[serde(default)]
    pub fields: Vec<FieldDef>,
    /// Glue string for merge groups, default a single space.
    #[serde(default)]
    pub merge_glue: Option<String>,
}

/// One aggregate count/sum declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountDef {
    /// Result alias.
    pub key: String,
    pub table: String,
    /// Group/join key in the counted table.
    pub column: String,
    /// Summed column (SUM only).
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub is_sum: bool,
    #[serde(default)]
    pub multiplier: Option<f64>,
    /// Parent column the aggregate joins against; defaults to the id key.
    #[serde(default)]
    pub left_key: Option<String>,
    #[serde(default)]
    pub on: Option<String>,
    /// Optional `Float`/`Price` formatting of the aggregate value.
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub decimals: Option<u32>,
    /// Skip soft-deleted child rows.
    #[serde(default)]
    pub exclude_deleted: bool,
}

/// A fixed filter on a subrequest.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubFilterDef {
    pub column: String,
    pub value: Json,
}

/// One subrequest (eager-loaded child relation) declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubrequestDef {
    /// Name the children are attached under on each parent row.
    pub key: String,
    /// Child schema key.
    pub schema: String,
    /// Child column holding the parent id.
    pub column: String,
    /// When set, children attach as a map keyed by this field's value.
    #[serde(default)]
    pub map_key: Option<String>,
    #[serde(default)]
    pub query: Vec<SubFilterDef>,
    #[serde(default)]
    pub order_by: Option<String>,
}

/// One schema declaration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructureDef {
    pub table: String,
    pub fields: Vec<FieldDef>,
    #[serde(default)]
    pub joins: Vec<JoinDef>,
    #[serde(default)]
    pub counts: Vec<CountDef>,
    #[serde(default)]
    pub subrequests: Vec<SubrequestDef>,
    #[serde(default)]
    pub has_status: bool,
    #[serde(default)]
    pub has_fem_status: bool,
    #[serde(default)]
    pub has_position: bool,
    #[serde(default)]
    pub has_timestamps: bool,
    #[serde(default)]
    pub has_users: bool,
    #[serde(default = "default_true")]
    pub can_create: bool,
    #[serde(default = "default_true")]
    pub can_edit: bool,
    #[serde(default)]
    pub can_delete: bool,
}

fn default_true() -> bool {
    true
}

/// A validated set of schema definitions, keyed by schema key.
#[derive(Debug, Clone, Default)]
pub struct Definitions {
    defs: BTreeMap<String, StructureDef>,
}

impl Definitions {
    /// Parse definitions from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let defs: BTreeMap<String, StructureDef> = serde_json::from_str(json)?;
        let definitions = Self { defs };
        definitions.validate()?;
        Ok(definitions)
    }

    /// Load definitions from one JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| SchemaError::definition(format!("{}: {}", path.as_ref().display(), e)))?;
        Self::from_json(&json)
    }

    /// Load and merge every `*.json` file in a directory.
    ///
    /// Files are read in name order; a schema key declared twice is an error.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        let entries = std::fs::read_dir(dir)
            .map_err(|e| SchemaError::definition(format!("{}: {}", dir.display(), e)))?;
        for entry in entries {
            let entry = entry.map_err(SchemaError::from_io)?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut merged: BTreeMap<String, StructureDef> = BTreeMap::new();
        for path in paths {
            let json = std::fs::read_to_string(&path)
                .map_err(|e| SchemaError::definition(format!("{}: {}", path.display(), e)))?;
            let defs: BTreeMap<String, StructureDef> = serde_json::from_str(&json)?;
            for (key, def) in defs {
                if merged.contains_key(&key) {
                    return Err(SchemaError::definition(format!(
                        "Schema '{}' declared more than once ({})",
                        key,
                        path.display()
                    )));
                }
                merged.insert(key, def);
            }
        }
        let definitions = Self { defs: merged };
        definitions.validate()?;
        Ok(definitions)
    }

    /// Iterate (key, definition) pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &StructureDef)> {
        self.defs.iter()
    }

    pub fn get(&self, key: &str) -> Option<&StructureDef> {
        self.defs.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    fn validate(&self) -> Result<()> {
        for (key, def) in &self.defs {
            check_ident(key, "schema key")?;
            check_ident(&def.table, "table")?;
            if def.fields.is_empty() {
                return Err(SchemaError::definition(format!(
                    "Schema '{}' declares no fields",
                    key
                )));
            }
            for field in &def.fields {
                check_field(key, field)?;
            }
            for join in &def.joins {
                check_ident(&join.key, "join key")?;
                check_ident(&join.table, "join table")?;
                check_ident(&join.left_key, "join leftKey")?;
                check_ident(&join.right_key, "join rightKey")?;
                if let Some(alias) = &join.alias {
                    check_ident(alias, "join alias")?;
                }
                if let Some(on) = &join.on {
                    check_ident(on, "join on-table")?;
                }
                if let Some(and) = &join.and {
                    check_ident(&and.column, "join and-column")?;
                }
                for field in &join.fields {
                    check_field(key, field)?;
                }
            }
            for count in &def.counts {
                check_ident(&count.key, "count key")?;
                check_ident(&count.table, "count table")?;
                check_ident(&count.column, "count column")?;
                if let Some(value) = &count.value {
                    check_ident(value, "count value column")?;
                }
                if count.is_sum && count.value.is_none() {
                    return Err(SchemaError::definition(format!(
                        "Schema '{}': sum count '{}' needs a value column",
                        key, count.key
                    )));
                }
                if let Some(kind) = &count.kind {
                    match FieldKind::parse(kind) {
                        Some(FieldKind::Float) | Some(FieldKind::Price) => {}
                        _ => {
                            return Err(SchemaError::definition(format!(
                                "Schema '{}': count '{}' type must be Float or Price, got '{}'",
                                key, count.key, kind
                            )))
                        }
                    }
                }
            }
            for sub in &def.subrequests {
                check_ident(&sub.key, "subrequest key")?;
                check_ident(&sub.column, "subrequest column")?;
                if !self.defs.contains_key(&sub.schema) {
                    return Err(SchemaError::definition(format!(
                        "Schema '{}': subrequest '{}' references undeclared schema '{}'",
                        key, sub.key, sub.schema
                    )));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn default_string(value: &Json) -> Option<String> {
        match value {
            Json::Null => None,
            Json::String(s) => Some(s.clone()),
            Json::Number(n) => Some(n.to_string()),
            Json::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
            _ => None,
        }
    }
}

fn check_field(schema: &str, field: &FieldDef) -> Result<()> {
    check_ident(&field.key, "field key")?;
    if FieldKind::parse(&field.kind).is_none() {
        return Err(SchemaError::definition(format!(
            "Schema '{}': field '{}' has unknown type '{}'",
            schema, field.key, field.kind
        )));
    }
    if let Some(merge) = &field.merge {
        check_ident(merge, "merge key")?;
    }
    Ok(())
}

/// Identifiers embedded in SQL must be plain: `[A-Za-z_][A-Za-z0-9_]*`.
pub(crate) fn check_ident(name: &str, what: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SchemaError::definition(format!(
            "Invalid {} '{}': must match [A-Za-z_][A-Za-z0-9_]*",
            what, name
        )))
    }
}

impl SchemaError {
    fn from_io(e: std::io::Error) -> Self {
        SchemaError::definition(e.to_string())
    }
}
