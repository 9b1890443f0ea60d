//! Schemas command - list loaded schemas or show one in detail.

use std::path::Path;

use anyhow::Result;
use clap::Args;

#[derive(Debug, Args)]
pub struct SchemasArgs {
    /// Schema key to show in detail
    pub key: Option<String>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(db_path: &Path, schema_dir: &Path, args: SchemasArgs) -> Result<()> {
    let registry = super::open_registry(db_path, schema_dir).await?;

    match args.key {
        Some(key) => show_schema(&registry, &key, args.json),
        None => list_schemas(&registry, args.json),
    }
}

fn list_schemas(registry: &atrium_schema::Registry, json: bool) -> Result<()> {
    if json {
        let keys: Vec<&str> = registry.keys();
        println!("{}", serde_json::to_string_pretty(&keys)?);
        return Ok(());
    }
    for key in registry.keys() {
        let structure = registry.structure(key)?;
        println!(
            "{:<24} table={} fields={} joins={} counts={}",
            key,
            structure.table,
            structure.fields.len(),
            structure.joins.len(),
            structure.counts.len()
        );
    }
    Ok(())
}

fn show_schema(registry: &atrium_schema::Registry, key: &str, json: bool) -> Result<()> {
    let structure = registry.structure(key)?;

    if json {
        let fields: Vec<serde_json::Value> = structure
            .fields
            .iter()
            .map(|f| {
                serde_json::json!({
                    "name": f.name,
                    "type": f.kind.as_str(),
                    "column": f.column_type(),
                })
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "key": key,
                "table": structure.table,
                "fields": fields,
            }))?
        );
        return Ok(());
    }

    println!("Schema: {}", key);
    println!("Table:  {}", structure.table);
    println!("Fields:");
    for field in &structure.fields {
        let mut flags = Vec::new();
        if field.is_primary {
            flags.push("primary");
        }
        if field.is_key {
            flags.push("indexed");
        }
        if field.is_name {
            flags.push("name");
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!("  [{}]", flags.join(", "))
        };
        println!(
            "  {:<20} {:<10} {}{}",
            field.name,
            field.kind.as_str(),
            field.column_type(),
            flags
        );
    }
    for join in &structure.joins {
        println!("Join:   {} -> {} ({} fields)", join.key, join.table, join.fields.len());
    }
    for count in &structure.counts {
        println!("Count:  {} over {}", count.key, count.table);
    }
    Ok(())
}
