//! CLI commands for the atrium binary.

use std::path::Path;

use anyhow::{Context, Result};

use atrium_db::Database;
use atrium_schema::{Definitions, MediaConfig, Registry};

pub mod migrate;
pub mod schemas;

/// Open the database and build the registry from the definition directory.
pub async fn open_registry(db_path: &Path, schema_dir: &Path) -> Result<Registry> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let db = Database::connect(db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    let definitions = Definitions::from_dir(schema_dir)
        .with_context(|| format!("Failed to load schemas from {}", schema_dir.display()))?;
    let registry = Registry::new(db, &definitions, MediaConfig::default())?;
    Ok(registry)
}
