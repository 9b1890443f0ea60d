//! Migration: reconcile live tables with declared structures.
//!
//! The migrator diffs each declared structure against the live database and
//! produces a plain-text transcript of the work: tables created, columns
//! added, renamed, retyped or dropped, indexes created, and numbered data
//! migrations run. `plan()` only reports; `apply()` executes. Destructive
//! drops additionally require the structure's `canDelete` flag and the
//! operator's explicit drop opt-in - without both, the transcript reports
//! what would be dropped and nothing happens.
//!
//! SQLite has no `MODIFY COLUMN`; a type or primary-key change runs the
//! standard rebuild (create `<table>__new`, copy, drop, rename). Undeclared
//! live columns survive a rebuild unless dropping them was allowed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use atrium_db::{quote_ident, Database, LiveColumn, Value};

use crate::error::Result;
use crate::field::Field;
use crate::structure::Structure;

/// Settings key tracking the last applied data-migration number.
const MIGRATION_SETTING: &str = "migration";

/// A numbered, one-shot data migration.
///
/// Migrations run in ascending number order, starting after the last number
/// recorded in the settings table.
#[async_trait]
pub trait DataMigration: Send + Sync {
    fn number(&self) -> u32;
    fn name(&self) -> &str;
    async fn run(&self, db: &Database) -> Result<()>;
}

/// Human-readable outcome of a migration run.
#[derive(Debug, Default)]
pub struct MigrationReport {
    pub lines: Vec<String>,
    /// Whether anything was (or would be) changed.
    pub changed: bool,
}

impl MigrationReport {
    fn note(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    fn change(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
        self.changed = true;
    }
}

impl std::fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// Reconciles declared structures with the live database.
pub struct Migrator<'a> {
    db: &'a Database,
    structures: Vec<Arc<Structure>>,
    migrations: Vec<Box<dyn DataMigration>>,
    allow_drops: bool,
}

impl<'a> Migrator<'a> {
    pub fn new(db: &'a Database, structures: Vec<Arc<Structure>>) -> Self {
        Self {
            db,
            structures,
            migrations: Vec::new(),
            allow_drops: false,
        }
    }

    /// Register numbered data migrations.
    pub fn with_migrations(mut self, mut migrations: Vec<Box<dyn DataMigration>>) -> Self {
        migrations.sort_by_key(|m| m.number());
        self.migrations = migrations;
        self
    }

    /// Allow destructive drops (still gated per-structure by `canDelete`).
    pub fn allow_drops(mut self, allow: bool) -> Self {
        self.allow_drops = allow;
        self
    }

    /// Report what a run would do, executing nothing.
    pub async fn plan(&self) -> Result<MigrationReport> {
        self.run(false).await
    }

    /// Execute the migration and report what was done.
    pub async fn apply(&self) -> Result<MigrationReport> {
        let report = self.run(true).await?;
        info!(changed = report.changed, "Migration applied");
        Ok(report)
    }

    async fn run(&self, execute: bool) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();

        for structure in &self.structures {
            self.migrate_table(structure, execute, &mut report).await?;
        }
        self.report_unknown_tables(execute, &mut report).await?;
        self.run_data_migrations(execute, &mut report).await?;

        Ok(report)
    }

    // ------------------------------------------------------------------
    // Table-level migration
    // ------------------------------------------------------------------

    async fn migrate_table(
        &self,
        structure: &Structure,
        execute: bool,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let table = &structure.table;
        if !self.db.table_exists(table).await? {
            report.change(format!("{}: create table", table));
            if execute {
                self.db.execute(&create_table_sql(structure), &[]).await?;
            }
            for field in structure.fields.iter().filter(|f| f.is_key) {
                report.change(format!("{}: create index on '{}'", table, field.name));
                if execute {
                    self.db.execute(&create_index_sql(table, &field.name), &[]).await?;
                }
            }
            return Ok(());
        }

        let mut live = self.db.table_columns(table).await?;

        // Case-only key differences are renames, not add+drop pairs.
        let mut renames: Vec<(String, String)> = Vec::new();
        for field in &structure.fields {
            let exact = live.iter().any(|col| col.name == field.name);
            if exact {
                continue;
            }
            if let Some(col) = live
                .iter_mut()
                .find(|col| col.name.eq_ignore_ascii_case(&field.name))
            {
                renames.push((col.name.clone(), field.name.clone()));
                col.name = field.name.clone();
            }
        }
        for (from, to) in &renames {
            report.change(format!("{}: rename column '{}' to '{}'", table, from, to));
            if execute {
                let sql = format!(
                    "ALTER TABLE {} RENAME COLUMN {} TO {}",
                    quote_ident(table),
                    quote_ident(from),
                    quote_ident(to)
                );
                self.db.execute(&sql, &[]).await?;
            }
        }

        let mut adds: Vec<&Field> = Vec::new();
        let mut needs_rebuild = false;
        for field in &structure.fields {
            match live.iter().find(|col| col.name == field.name) {
                Some(col) => {
                    if !column_matches(field, col) {
                        report.change(format!(
                            "{}: modify column '{}' ({} -> {})",
                            table,
                            field.name,
                            col.col_type,
                            field.column_type()
                        ));
                        needs_rebuild = true;
                    }
                }
                None => adds.push(field),
            }
        }

        let declared_names: Vec<&str> = structure.fields.iter().map(|f| f.name.as_str()).collect();
        let mut drops: Vec<String> = Vec::new();
        for col in &live {
            if !declared_names.contains(&col.name.as_str()) {
                drops.push(col.name.clone());
            }
        }
        let drops_allowed = structure.can_delete && self.allow_drops;

        if needs_rebuild {
            report.change(format!("{}: rebuild table", table));
            if execute {
                self.rebuild_table(structure, &live, &drops, drops_allowed)
                    .await?;
            }
            for name in &drops {
                if drops_allowed {
                    report.change(format!("{}: drop column '{}'", table, name));
                } else {
                    report.note(format!(
                        "{}: column '{}' is undeclared (pass the drop flag to remove)",
                        table, name
                    ));
                }
            }
            return Ok(());
        }

        for field in &adds {
            report.change(format!(
                "{}: add column '{}' {}",
                table,
                field.name,
                field.column_type()
            ));
            if execute {
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {} {}",
                    quote_ident(table),
                    quote_ident(&field.name),
                    field.ddl()
                );
                self.db.execute(&sql, &[]).await?;
            }
        }

        for name in &drops {
            if drops_allowed {
                report.change(format!("{}: drop column '{}'", table, name));
                if execute {
                    let sql = format!(
                        "ALTER TABLE {} DROP COLUMN {}",
                        quote_ident(table),
                        quote_ident(name)
                    );
                    self.db.execute(&sql, &[]).await?;
                }
            } else {
                report.note(format!(
                    "{}: column '{}' is undeclared (pass the drop flag to remove)",
                    table, name
                ));
            }
        }

        let mut index_changes = false;
        let indexes = self.db.table_indexes(table).await?;
        for field in structure.fields.iter().filter(|f| f.is_key) {
            let covered = indexes
                .iter()
                .any(|index| index.columns == vec![field.name.clone()]);
            if !covered {
                index_changes = true;
                report.change(format!("{}: create index on '{}'", table, field.name));
                if execute {
                    self.db.execute(&create_index_sql(table, &field.name), &[]).await?;
                }
            }
        }

        if renames.is_empty() && adds.is_empty() && drops.is_empty() && !index_changes {
            report.note(format!("{}: no changes", table));
        }
        Ok(())
    }

    /// The SQLite rebuild path for column type or primary-key changes.
    async fn rebuild_table(
        &self,
        structure: &Structure,
        live: &[LiveColumn],
        drops: &[String],
        drops_allowed: bool,
    ) -> Result<()> {
        let table = &structure.table;
        let staging = format!("{}__new", table);

        // Undeclared columns ride along unless dropping them was allowed.
        let mut extra_columns: Vec<&LiveColumn> = Vec::new();
        if !drops_allowed {
            for col in live {
                if drops.contains(&col.name) {
                    extra_columns.push(col);
                }
            }
        }
        let create = create_table_sql_as(structure, &staging, &extra_columns);
        self.db.execute(&create, &[]).await?;

        let mut shared: Vec<String> = structure
            .fields
            .iter()
            .filter(|f| live.iter().any(|col| col.name == f.name))
            .map(|f| quote_ident(&f.name))
            .collect();
        shared.extend(extra_columns.iter().map(|col| quote_ident(&col.name)));
        if !shared.is_empty() {
            let columns = shared.join(", ");
            let copy = format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                quote_ident(&staging),
                columns,
                columns,
                quote_ident(table)
            );
            self.db.execute(&copy, &[]).await?;
        }

        self.db
            .execute(&format!("DROP TABLE {}", quote_ident(table)), &[])
            .await?;
        self.db
            .execute(
                &format!(
                    "ALTER TABLE {} RENAME TO {}",
                    quote_ident(&staging),
                    quote_ident(table)
                ),
                &[],
            )
            .await?;
        for field in structure.fields.iter().filter(|f| f.is_key) {
            self.db.execute(&create_index_sql(table, &field.name), &[]).await?;
        }
        Ok(())
    }

    async fn report_unknown_tables(
        &self,
        execute: bool,
        report: &mut MigrationReport,
    ) -> Result<()> {
        let declared: Vec<&str> = self.structures.iter().map(|s| s.table.as_str()).collect();
        for table in self.db.table_names().await? {
            if declared.contains(&table.as_str()) || table == "settings" {
                continue;
            }
            if self.allow_drops {
                report.change(format!("{}: drop table (no declared schema)", table));
                if execute {
                    self.db
                        .execute(&format!("DROP TABLE {}", quote_ident(&table)), &[])
                        .await?;
                }
            } else {
                report.note(format!(
                    "{}: no declared schema (pass the drop flag to remove)",
                    table
                ));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Data migrations
    // ------------------------------------------------------------------

    async fn run_data_migrations(
        &self,
        execute: bool,
        report: &mut MigrationReport,
    ) -> Result<()> {
        if self.migrations.is_empty() {
            return Ok(());
        }
        self.ensure_settings_table().await?;
        let last = self.last_applied().await?;

        for migration in &self.migrations {
            if migration.number() <= last {
                continue;
            }
            report.change(format!(
                "data migration {}: {}",
                migration.number(),
                migration.name()
            ));
            if execute {
                migration.run(self.db).await?;
                self.record_applied(migration.number()).await?;
            }
        }
        Ok(())
    }

    async fn ensure_settings_table(&self) -> Result<()> {
        self.db
            .execute(
                "CREATE TABLE IF NOT EXISTS \"settings\" (\
                 \"key\" varchar(255) PRIMARY KEY, \"value\" text)",
                &[],
            )
            .await?;
        Ok(())
    }

    async fn last_applied(&self) -> Result<u32> {
        let row = self
            .db
            .fetch_optional(
                "SELECT \"value\" FROM \"settings\" WHERE \"key\" = ?",
                &[Value::from(MIGRATION_SETTING)],
            )
            .await?;
        Ok(row
            .and_then(|row| row.get_by_name::<String>("value").ok())
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(0))
    }

    async fn record_applied(&self, number: u32) -> Result<()> {
        self.db
            .execute(
                "INSERT INTO \"settings\" (\"key\", \"value\") VALUES (?, ?) \
                 ON CONFLICT(\"key\") DO UPDATE SET \"value\" = excluded.\"value\"",
                &[
                    Value::from(MIGRATION_SETTING),
                    Value::from(number.to_string()),
                ],
            )
            .await?;
        Ok(())
    }
}

/// Declared type and default against the live column, primary key included.
fn column_matches(field: &Field, col: &LiveColumn) -> bool {
    if !field.column_type().eq_ignore_ascii_case(&col.col_type) {
        return false;
    }
    let declared_default = field
        .default
        .as_ref()
        .map(|value| format!("'{}'", value.replace('\'', "''")));
    if declared_default != col.default_value {
        return false;
    }
    field.is_primary == (col.primary_key > 0)
}

fn create_table_sql(structure: &Structure) -> String {
    create_table_sql_as(structure, &structure.table, &[])
}

fn create_table_sql_as(structure: &Structure, table: &str, extras: &[&LiveColumn]) -> String {
    let has_id = structure
        .fields
        .iter()
        .any(|f| f.kind == crate::field::FieldKind::Id);

    let mut columns = Vec::new();
    let mut primary: Vec<String> = Vec::new();
    for field in &structure.fields {
        if field.kind == crate::field::FieldKind::Id {
            columns.push(format!(
                "{} integer PRIMARY KEY AUTOINCREMENT",
                quote_ident(&field.name)
            ));
        } else {
            columns.push(format!("{} {}", quote_ident(&field.name), field.ddl()));
            if field.is_primary {
                primary.push(quote_ident(&field.name));
            }
        }
    }
    for col in extras {
        let mut ddl = format!("{} {}", quote_ident(&col.name), col.col_type);
        if let Some(default) = &col.default_value {
            ddl.push_str(&format!(" DEFAULT {}", default));
        }
        columns.push(ddl);
    }
    if !has_id && !primary.is_empty() {
        columns.push(format!("PRIMARY KEY ({})", primary.join(", ")));
    }
    format!("CREATE TABLE {} ({})", quote_ident(table), columns.join(", "))
}

fn create_index_sql(table: &str, column: &str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
        quote_ident(&format!("idx_{}_{}", table, column)),
        quote_ident(table),
        quote_ident(column)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::StructureDef;

    fn structure(json: serde_json::Value) -> Structure {
        let def: StructureDef = serde_json::from_value(json).unwrap();
        Structure::from_def("test", &def).unwrap()
    }

    #[test]
    fn create_table_renders_types_and_primary_key() {
        let structure = structure(serde_json::json!({
            "table": "articles",
            "fields": [
                {"key": "id", "type": "ID"},
                {"key": "title", "type": "String", "length": 120, "isKey": true}
            ],
            "hasStatus": true
        }));
        assert_eq!(
            create_table_sql(&structure),
            "CREATE TABLE \"articles\" (\
             \"id\" integer PRIMARY KEY AUTOINCREMENT, \
             \"title\" varchar(120), \
             \"status\" unsigned tinyint(1) DEFAULT '1')"
        );
    }

    #[test]
    fn composite_primary_key_without_id() {
        let structure = structure(serde_json::json!({
            "table": "links",
            "fields": [
                {"key": "leftId", "type": "Number", "isPrimary": true},
                {"key": "rightId", "type": "Number", "isPrimary": true}
            ]
        }));
        assert_eq!(
            create_table_sql(&structure),
            "CREATE TABLE \"links\" (\
             \"leftId\" unsigned int(10), \
             \"rightId\" unsigned int(10), \
             PRIMARY KEY (\"leftId\", \"rightId\"))"
        );
    }

    #[test]
    fn column_match_compares_type_default_and_pk() {
        let structure = structure(serde_json::json!({
            "table": "a",
            "fields": [{"key": "n", "type": "Number", "default": 0}]
        }));
        let field = &structure.fields[0];
        let live = LiveColumn {
            name: "n".into(),
            col_type: "unsigned int(10)".into(),
            not_null: false,
            default_value: Some("'0'".into()),
            primary_key: 0,
        };
        assert!(column_matches(field, &live));

        let retyped = LiveColumn {
            col_type: "unsigned bigint(12)".into(),
            ..live.clone()
        };
        assert!(!column_matches(field, &retyped));

        let default_changed = LiveColumn {
            default_value: Some("'7'".into()),
            ..live
        };
        assert!(!column_matches(field, &default_changed));
    }
}
