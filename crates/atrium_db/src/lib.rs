//! Database access layer for Atrium.
//!
//! All SQL in Atrium is assembled at runtime from schema definitions, so this
//! crate exposes a deliberately dynamic surface: statements are plain strings
//! with `?` placeholders, parameters travel as [`Value`] lists bound in
//! emission order, and results come back as [`Row`]s addressable by column
//! name. Schema introspection (tables, columns, indexes) is included for the
//! migrator.

mod error;
mod row;
mod value;

pub use error::{DbError, Result};
pub use row::Row;
pub use value::{FromValue, Value};

use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqlitePoolOptions};
use sqlx::Sqlite;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// SQLite limits a single statement to 999 bound parameters by default.
const MAX_PARAMS: usize = 999;

/// Handle to one SQLite database.
///
/// Cheap to clone; all clones share one connection pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.apply_pragmas().await?;
        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    ///
    /// A single connection is used: every SQLite `:memory:` connection is its
    /// own database, so a larger pool would scatter tables across databases.
    pub async fn connect_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool })
    }

    async fn apply_pragmas(&self) -> Result<()> {
        // WAL mode for better concurrent access
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Execute a statement, returning the number of affected rows.
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let start = Instant::now();
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        log_query(sql, start);
        Ok(result.rows_affected())
    }

    /// Execute an INSERT, returning the new rowid.
    pub async fn insert(&self, sql: &str, params: &[Value]) -> Result<i64> {
        let start = Instant::now();
        let result = bind_params(sqlx::query(sql), params)
            .execute(&self.pool)
            .await?;
        log_query(sql, start);
        Ok(result.last_insert_rowid())
    }

    /// Query and return all rows.
    pub async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let start = Instant::now();
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await?;
        log_query(sql, start);
        rows.iter().map(Row::from_sqlite).collect()
    }

    /// Query and return the first row, if any.
    pub async fn fetch_optional(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let start = Instant::now();
        let row = bind_params(sqlx::query(sql), params)
            .fetch_optional(&self.pool)
            .await?;
        log_query(sql, start);
        row.as_ref().map(Row::from_sqlite).transpose()
    }

    /// Query and return exactly one row.
    pub async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Row> {
        let start = Instant::now();
        let row = bind_params(sqlx::query(sql), params)
            .fetch_one(&self.pool)
            .await?;
        log_query(sql, start);
        Row::from_sqlite(&row)
    }

    /// Query and return a single scalar value.
    pub async fn fetch_scalar<T: FromValue>(&self, sql: &str, params: &[Value]) -> Result<T> {
        let row = self.fetch_one(sql, params).await?;
        row.get(0)
    }

    /// Insert many rows in chunks that stay under the parameter limit.
    ///
    /// Column order must match the row value order.
    pub async fn insert_many(
        &self,
        table: &str,
        columns: &[&str],
        rows: &[Vec<Value>],
    ) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        if columns.is_empty() {
            return Err(DbError::invalid_input(
                "insert_many requires at least one column",
            ));
        }
        for (index, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(DbError::invalid_input(format!(
                    "Row {} has {} values, expected {}",
                    index,
                    row.len(),
                    columns.len()
                )));
            }
        }
        let rows_per_chunk = MAX_PARAMS / columns.len();
        if rows_per_chunk == 0 {
            return Err(DbError::invalid_input(format!(
                "Too many columns ({}) for max params ({})",
                columns.len(),
                MAX_PARAMS
            )));
        }

        let quoted_cols = columns
            .iter()
            .map(|col| quote_ident(col))
            .collect::<Vec<_>>()
            .join(", ");
        let row_clause = format!("({})", vec!["?"; columns.len()].join(", "));

        let mut total = 0;
        for chunk in rows.chunks(rows_per_chunk) {
            let values_clause = vec![row_clause.as_str(); chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO {} ({}) VALUES {}",
                quote_ident(table),
                quoted_cols,
                values_clause
            );
            let mut params = Vec::with_capacity(chunk.len() * columns.len());
            for row in chunk {
                params.extend(row.iter().cloned());
            }
            total += self.execute(&sql, &params).await?;
        }
        Ok(total)
    }

    /// Begin a transaction.
    pub async fn begin(&self) -> Result<Transaction<'static>> {
        Ok(Transaction {
            inner: self.pool.begin().await?,
        })
    }

    // ------------------------------------------------------------------
    // Schema introspection
    // ------------------------------------------------------------------

    /// Whether a table exists.
    pub async fn table_exists(&self, table: &str) -> Result<bool> {
        let row = self
            .fetch_optional(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?",
                &[Value::from(table)],
            )
            .await?;
        Ok(row.is_some())
    }

    /// All user table names, sorted.
    pub async fn table_names(&self) -> Result<Vec<String>> {
        let rows = self
            .fetch_all(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
                &[],
            )
            .await?;
        rows.iter().map(|r| r.get_by_name("name")).collect()
    }

    /// Column definitions of a live table, in declaration order.
    pub async fn table_columns(&self, table: &str) -> Result<Vec<LiveColumn>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let rows = self.fetch_all(&sql, &[]).await?;
        rows.iter()
            .map(|row| {
                Ok(LiveColumn {
                    name: row.get_by_name("name")?,
                    col_type: row.get_by_name("type")?,
                    not_null: row.get_by_name("notnull")?,
                    default_value: row.get_by_name("dflt_value")?,
                    primary_key: row.get_by_name("pk")?,
                })
            })
            .collect()
    }

    /// Indexes of a live table, with their column lists.
    pub async fn table_indexes(&self, table: &str) -> Result<Vec<LiveIndex>> {
        let sql = format!("PRAGMA index_list({})", quote_ident(table));
        let rows = self.fetch_all(&sql, &[]).await?;
        let mut indexes = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row.get_by_name("name")?;
            let info_sql = format!("PRAGMA index_info({})", quote_ident(&name));
            let info_rows = self.fetch_all(&info_sql, &[]).await?;
            let mut columns = Vec::with_capacity(info_rows.len());
            for info in &info_rows {
                // Expression index members report a NULL column name.
                if let Some(col) = info.get_by_name::<Option<String>>("name")? {
                    columns.push(col);
                }
            }
            indexes.push(LiveIndex {
                name,
                unique: row.get_by_name("unique")?,
                origin: row.get_by_name("origin")?,
                columns,
            });
        }
        Ok(indexes)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// One column reported by `PRAGMA table_info`.
#[derive(Debug, Clone)]
pub struct LiveColumn {
    pub name: String,
    /// Declared type, verbatim as written in the CREATE TABLE statement.
    pub col_type: String,
    pub not_null: bool,
    /// Default expression, verbatim (string literals keep their quotes).
    pub default_value: Option<String>,
    /// 1-based position within the primary key, 0 when not part of it.
    pub primary_key: i64,
}

/// One index reported by `PRAGMA index_list`.
#[derive(Debug, Clone)]
pub struct LiveIndex {
    pub name: String,
    pub unique: bool,
    /// 'c' for CREATE INDEX, 'u' for UNIQUE constraint, 'pk' for primary key.
    pub origin: String,
    pub columns: Vec<String>,
}

/// An open transaction.
///
/// All statements issued through this handle commit or roll back together.
pub struct Transaction<'c> {
    inner: sqlx::Transaction<'c, Sqlite>,
}

impl Transaction<'_> {
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut *self.inner)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert(&mut self, sql: &str, params: &[Value]) -> Result<i64> {
        let result = bind_params(sqlx::query(sql), params)
            .execute(&mut *self.inner)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn fetch_all(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let rows = bind_params(sqlx::query(sql), params)
            .fetch_all(&mut *self.inner)
            .await?;
        rows.iter().map(Row::from_sqlite).collect()
    }

    pub async fn fetch_optional(&mut self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let row = bind_params(sqlx::query(sql), params)
            .fetch_optional(&mut *self.inner)
            .await?;
        row.as_ref().map(Row::from_sqlite).transpose()
    }

    pub async fn fetch_scalar<T: FromValue>(&mut self, sql: &str, params: &[Value]) -> Result<T> {
        let rows = self.fetch_all(sql, params).await?;
        let row = rows
            .first()
            .ok_or_else(|| DbError::decode("Expected one row, got none"))?;
        row.get(0)
    }

    pub async fn commit(self) -> Result<()> {
        self.inner.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<()> {
        self.inner.rollback().await?;
        Ok(())
    }
}

/// Quote an identifier for embedding in SQL.
pub fn quote_ident(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('"');
    for ch in name.chars() {
        if ch == '"' {
            escaped.push('"');
        }
        escaped.push(ch);
    }
    escaped.push('"');
    escaped
}

fn bind_params<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    params: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<i64>),
            Value::Int(v) => query.bind(*v),
            Value::Float(v) => query.bind(*v),
            Value::Text(s) => query.bind(s.clone()),
            Value::Blob(b) => query.bind(b.clone()),
        };
    }
    query
}

fn log_query(sql: &str, start: Instant) {
    let op = sql.split_whitespace().next().unwrap_or("unknown");
    debug!(
        op,
        duration_ms = start.elapsed().as_millis() as u64,
        "db.query"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_and_fetch() {
        let db = Database::connect_memory().await.unwrap();
        db.execute(
            "CREATE TABLE t (id integer PRIMARY KEY AUTOINCREMENT, name varchar(255))",
            &[],
        )
        .await
        .unwrap();

        let id = db
            .insert("INSERT INTO t (name) VALUES (?)", &[Value::from("alpha")])
            .await
            .unwrap();
        assert_eq!(id, 1);

        let row = db
            .fetch_one("SELECT id, name FROM t WHERE id = ?", &[Value::Int(id)])
            .await
            .unwrap();
        assert_eq!(row.get_by_name::<i64>("id").unwrap(), 1);
        assert_eq!(row.get_by_name::<String>("name").unwrap(), "alpha");

        let total: i64 = db.fetch_scalar("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(total, 1);

        let missing = db
            .fetch_optional("SELECT * FROM t WHERE id = ?", &[Value::Int(99)])
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn insert_many_chunks_and_validates() {
        let db = Database::connect_memory().await.unwrap();
        db.execute("CREATE TABLE t (a integer, b varchar(255))", &[])
            .await
            .unwrap();

        let rows: Vec<Vec<Value>> = (0..600)
            .map(|i| vec![Value::Int(i), Value::from(format!("row{}", i))])
            .collect();
        let inserted = db.insert_many("t", &["a", "b"], &rows).await.unwrap();
        assert_eq!(inserted, 600);

        let total: i64 = db.fetch_scalar("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(total, 600);

        let bad = vec![vec![Value::Int(1)]];
        assert!(matches!(
            db.insert_many("t", &["a", "b"], &bad).await,
            Err(DbError::InvalidInput(_))
        ));
        assert_eq!(db.insert_many("t", &["a", "b"], &[]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn introspection_round_trips_declared_types() {
        let db = Database::connect_memory().await.unwrap();
        db.execute(
            "CREATE TABLE widgets (\
             id integer PRIMARY KEY AUTOINCREMENT, \
             name varchar(120), \
             price unsigned int(10) DEFAULT '0')",
            &[],
        )
        .await
        .unwrap();
        db.execute("CREATE INDEX idx_widgets_name ON widgets (name)", &[])
            .await
            .unwrap();

        assert!(db.table_exists("widgets").await.unwrap());
        assert!(!db.table_exists("gadgets").await.unwrap());
        assert_eq!(db.table_names().await.unwrap(), vec!["widgets".to_string()]);

        let columns = db.table_columns("widgets").await.unwrap();
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0].name, "id");
        assert_eq!(columns[0].primary_key, 1);
        assert_eq!(columns[1].col_type, "varchar(120)");
        assert_eq!(columns[2].col_type, "unsigned int(10)");
        assert_eq!(columns[2].default_value.as_deref(), Some("'0'"));

        let indexes = db.table_indexes("widgets").await.unwrap();
        let named: Vec<_> = indexes.iter().filter(|i| i.origin == "c").collect();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].name, "idx_widgets_name");
        assert_eq!(named[0].columns, vec!["name".to_string()]);
    }

    #[tokio::test]
    async fn transaction_commit_and_rollback() {
        let db = Database::connect_memory().await.unwrap();
        db.execute("CREATE TABLE t (n integer)", &[]).await.unwrap();

        let mut tx = db.begin().await.unwrap();
        tx.execute("INSERT INTO t (n) VALUES (?)", &[Value::Int(1)])
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut tx = db.begin().await.unwrap();
        tx.execute("INSERT INTO t (n) VALUES (?)", &[Value::Int(2)])
            .await
            .unwrap();
        tx.rollback().await.unwrap();

        let total: i64 = db.fetch_scalar("SELECT COUNT(*) FROM t", &[]).await.unwrap();
        assert_eq!(total, 1);
    }
}
