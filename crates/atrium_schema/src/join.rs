//! Join: a LEFT JOIN relation and the fields it contributes.

use serde_json::{Map, Value as Json};

use atrium_db::Row;

use crate::definition::JoinDef;
use crate::field::{prefixed_key, Field};
use crate::registry::MediaConfig;

/// Several member fields glued into one derived string value.
#[derive(Debug, Clone)]
pub struct Merge {
    /// Display key of the derived value (carries the join prefix).
    pub key: String,
    /// Display keys of the member fields, in declaration order.
    pub fields: Vec<String>,
    pub glue: String,
}

/// A declared relation to a secondary table.
///
/// Constructed once at structure build time and reused across queries; the
/// SQL clause itself is emitted by [`Selection`](crate::Selection), which
/// owns alias allocation.
#[derive(Debug, Clone)]
pub struct Join {
    /// Key prefix shared by the joined fields.
    pub key: String,
    pub table: String,
    pub alias: Option<String>,
    /// Table the right side of the join condition lives on; `None` means the
    /// main table.
    pub on_table: Option<String>,
    pub left_key: String,
    pub right_key: String,
    /// Extra `AND` condition on the joined table.
    pub and: Option<(String, atrium_db::Value)>,
    pub fields: Vec<Field>,
    pub merges: Vec<Merge>,
}

impl Join {
    pub(crate) fn from_def(def: &JoinDef) -> Self {
        let fields: Vec<Field> = def
            .fields
            .iter()
            .map(|f| Field::from_def(f, &def.key))
            .collect();

        let glue = def.merge_glue.clone().unwrap_or_else(|| " ".to_string());
        let mut merges: Vec<Merge> = Vec::new();
        for field in &fields {
            if let Some(target) = &field.merge {
                let merge_key = prefixed_key(target, &def.key, false);
                match merges.iter_mut().find(|m| m.key == merge_key) {
                    Some(merge) => merge.fields.push(field.key.clone()),
                    None => merges.push(Merge {
                        key: merge_key,
                        fields: vec![field.key.clone()],
                        glue: glue.clone(),
                    }),
                }
            }
        }

        Self {
            key: def.key.clone(),
            table: def.table.clone(),
            alias: def.alias.clone(),
            on_table: def.on.clone(),
            left_key: def.left_key.clone(),
            right_key: def.right_key.clone(),
            and: def
                .and
                .as_ref()
                .map(|and| (and.column.clone(), json_to_value(&and.value))),
            fields,
            merges,
        }
    }

    /// Expand every member field, then compute the merge values.
    ///
    /// Merge members that expanded to empty strings are skipped, so e.g. a
    /// missing middle name does not produce doubled glue.
    pub fn to_values(&self, row: &Row, out: &mut Map<String, Json>, media: &MediaConfig) {
        for field in &self.fields {
            field.to_values(row.raw(&field.key), out, media);
        }
        for merge in &self.merges {
            let joined = merge
                .fields
                .iter()
                .filter_map(|key| out.get(key))
                .filter_map(display_text)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(&merge.glue);
            out.insert(merge.key.clone(), Json::from(joined));
        }
    }
}

fn display_text(value: &Json) -> Option<String> {
    match value {
        Json::String(s) => Some(s.clone()),
        Json::Number(n) => Some(n.to_string()),
        Json::Bool(b) => Some(if *b { "1".into() } else { "0".into() }),
        Json::Null => None,
        _ => None,
    }
}

fn json_to_value(value: &Json) -> atrium_db::Value {
    match value {
        Json::Null => atrium_db::Value::Null,
        Json::Bool(b) => atrium_db::Value::Int(*b as i64),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                atrium_db::Value::Int(i)
            } else {
                atrium_db::Value::Float(n.as_f64().unwrap_or(0.0))
            }
        }
        Json::String(s) => atrium_db::Value::Text(s.clone()),
        other => atrium_db::Value::Text(other.to_string()),
    }
}
