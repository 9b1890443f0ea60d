//! Subrequest: eager loading of one-to-many child rows.
//!
//! After the primary rows resolve, each subrequest issues exactly one
//! `IN (parent ids)` query against the child schema and attaches the grouped
//! children back onto the parents. One query per relation, never per row.

use std::sync::Arc;

use serde_json::{Map, Value as Json};

use atrium_db::Database;

use crate::definition::SubrequestDef;
use crate::query::Query;
use crate::record::Record;
use crate::registry::MediaConfig;
use crate::selection::Selection;
use crate::structure::Structure;

/// One declared child relation.
#[derive(Debug, Clone)]
pub struct Subrequest {
    /// Name the children attach under on each parent record.
    pub key: String,
    /// Child column holding the parent id.
    pub column: String,
    /// When set, children attach as a map keyed by this field's value.
    pub map_key: Option<String>,
    filters: Query,
    order_by: Option<String>,
    child: Arc<Structure>,
}

impl Subrequest {
    pub(crate) fn from_def(def: &SubrequestDef, child: Arc<Structure>) -> Self {
        let mut filters = Query::new();
        for filter in &def.query {
            match &filter.value {
                Json::Number(n) => {
                    filters.add(&filter.column, "=", n.as_i64().unwrap_or(0));
                }
                Json::Bool(b) => {
                    filters.add(&filter.column, "=", *b);
                }
                other => {
                    let text = match other {
                        Json::String(s) => s.clone(),
                        v => v.to_string(),
                    };
                    filters.add(&filter.column, "=", text);
                }
            }
        }
        Self {
            key: def.key.clone(),
            column: def.column.clone(),
            map_key: def.map_key.clone(),
            filters,
            order_by: def.order_by.clone(),
            child,
        }
    }

    /// Load and attach children for the given parents.
    pub async fn apply(
        &self,
        db: &Database,
        media: &MediaConfig,
        parents: &mut [Record],
    ) -> crate::error::Result<()> {
        let mut ids: Vec<i64> = parents.iter().map(Record::id).filter(|id| *id != 0).collect();
        ids.sort_unstable();
        ids.dedup();

        let mut grouped: std::collections::HashMap<i64, Vec<Record>> =
            std::collections::HashMap::new();
        if !ids.is_empty() {
            let mut query = self.filters.clone();
            query.add(&self.column, "IN", ids);
            if self.child.soft_deletes() && !query.has_column("isDeleted") {
                query.add("isDeleted", "=", 0);
            }
            match &self.order_by {
                Some(column) => {
                    query.order_by(column, false);
                }
                None => {
                    if let Some(id_key) = self.child.id_key() {
                        query.order_by(id_key, false);
                    }
                }
            };

            let selection = Selection::new(&self.child, db, media);
            let rows = selection.rows(&query).await?;
            for child in selection.resolve(&rows, &[]) {
                let parent_id = child.int(&self.column).unwrap_or(0);
                grouped.entry(parent_id).or_default().push(child);
            }
        }

        for parent in parents.iter_mut() {
            let children = grouped.remove(&parent.id()).unwrap_or_default();
            let attached = match &self.map_key {
                Some(map_key) => {
                    let mut map = Map::new();
                    for child in children {
                        let key = child
                            .get(map_key)
                            .map(json_key_text)
                            .unwrap_or_default();
                        map.insert(key, child.into_json());
                    }
                    Json::Object(map)
                }
                None => Json::Array(children.into_iter().map(Record::into_json).collect()),
            };
            parent.insert(self.key.clone(), attached);
        }
        Ok(())
    }
}

fn json_key_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}
