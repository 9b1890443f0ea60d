//! Registry: process-wide schema construction and lookup.
//!
//! Replaces hidden global state with one explicitly constructed object:
//! every structure and schema is built eagerly from the definitions (so a
//! malformed definition fails the whole load, fast) and memoized for the
//! process lifetime. Callers receive cheap [`Schema`] clones.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use atrium_db::Database;

use crate::definition::Definitions;
use crate::error::{Result, SchemaError};
use crate::schema::Schema;
use crate::structure::Structure;
use crate::subrequest::Subrequest;

/// URL base for File/Image display expansion.
#[derive(Debug, Clone)]
pub struct MediaConfig {
    pub base_url: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            base_url: "/media".to_string(),
        }
    }
}

impl MediaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Public URL of an original file; empty input stays empty.
    pub fn url(&self, file: &str) -> String {
        if file.is_empty() {
            return String::new();
        }
        format!("{}/{}", self.base_url, file)
    }

    /// Public URL of a sized variant.
    pub fn sized(&self, size: &str, file: &str) -> String {
        if file.is_empty() {
            return String::new();
        }
        format!("{}/{}/{}", self.base_url, size, file)
    }
}

/// Built schemas, keyed by schema key.
pub struct Registry {
    db: Database,
    media: MediaConfig,
    structures: BTreeMap<String, Arc<Structure>>,
    schemas: BTreeMap<String, Schema>,
}

impl Registry {
    /// Build every structure and schema from the definitions.
    pub fn new(db: Database, definitions: &Definitions, media: MediaConfig) -> Result<Self> {
        let mut structures = BTreeMap::new();
        for (key, def) in definitions.iter() {
            let structure = Arc::new(Structure::from_def(key, def)?);
            structures.insert(key.clone(), structure);
        }

        let mut schemas = BTreeMap::new();
        for (key, def) in definitions.iter() {
            let structure = Arc::clone(&structures[key]);
            let subrequests = def
                .subrequests
                .iter()
                .map(|sub| {
                    let child = structures.get(&sub.schema).ok_or_else(|| {
                        SchemaError::definition(format!(
                            "Schema '{}': subrequest '{}' references undeclared schema '{}'",
                            key, sub.key, sub.schema
                        ))
                    })?;
                    Ok(Subrequest::from_def(sub, Arc::clone(child)))
                })
                .collect::<Result<Vec<_>>>()?;
            schemas.insert(
                key.clone(),
                Schema::new(structure, db.clone(), media.clone(), subrequests),
            );
        }

        info!(schemas = schemas.len(), "Registry built");
        Ok(Self {
            db,
            media,
            structures,
            schemas,
        })
    }

    /// A schema by key.
    pub fn schema(&self, key: &str) -> Result<Schema> {
        self.schemas
            .get(key)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownSchema(key.to_string()))
    }

    /// A structure by key.
    pub fn structure(&self, key: &str) -> Result<Arc<Structure>> {
        self.structures
            .get(key)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownSchema(key.to_string()))
    }

    /// Every structure, in key order; the migrator's input.
    pub fn structures(&self) -> Vec<Arc<Structure>> {
        self.structures.values().cloned().collect()
    }

    /// Loaded schema keys, in order.
    pub fn keys(&self) -> Vec<&str> {
        self.schemas.keys().map(String::as_str).collect()
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn media(&self) -> &MediaConfig {
        &self.media
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_urls() {
        let media = MediaConfig::default();
        assert_eq!(media.url("cat.jpg"), "/media/cat.jpg");
        assert_eq!(media.sized("thumb", "cat.jpg"), "/media/thumb/cat.jpg");
        assert_eq!(media.url(""), "");

        let media = MediaConfig::new("https://cdn.example/files/");
        assert_eq!(media.url("a.png"), "https://cdn.example/files/a.png");
    }
}
