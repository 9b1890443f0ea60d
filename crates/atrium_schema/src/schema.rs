//! Schema: the CRUD façade for one entity.
//!
//! Binds a structure, a database handle and the declared subrequests into
//! the operations controllers call. Reads apply the soft-delete filter and a
//! default id ordering; writes maintain the position-density and
//! flag-uniqueness invariants. Every multi-statement maintenance sequence
//! runs inside one transaction, so concurrent edits cannot interleave
//! half-applied shifts.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use atrium_db::{quote_ident, Database, Transaction, Value};

use crate::error::{Result, SchemaError};
use crate::modification::{FieldValues, Modification};
use crate::query::{Query, UpdateValue};
use crate::record::Record;
use crate::registry::MediaConfig;
use crate::request::RequestValues;
use crate::selection::Selection;
use crate::structure::Structure;
use crate::subrequest::Subrequest;

/// CRUD entry point for one schema key.
///
/// Cheap to clone; clones share the structure and database handle.
#[derive(Clone)]
pub struct Schema {
    structure: Arc<Structure>,
    db: Database,
    media: MediaConfig,
    subrequests: Arc<Vec<Subrequest>>,
    actor: Option<i64>,
}

impl Schema {
    pub(crate) fn new(
        structure: Arc<Structure>,
        db: Database,
        media: MediaConfig,
        subrequests: Vec<Subrequest>,
    ) -> Self {
        Self {
            structure,
            db,
            media,
            subrequests: Arc::new(subrequests),
            actor: None,
        }
    }

    /// A copy of this schema acting as the given user; write bookkeeping
    /// columns record that user id.
    pub fn with_actor(&self, user_id: i64) -> Self {
        let mut schema = self.clone();
        schema.actor = Some(user_id);
        schema
    }

    pub fn structure(&self) -> &Structure {
        &self.structure
    }

    pub fn key(&self) -> &str {
        &self.structure.key
    }

    fn selection(&self) -> Selection<'_> {
        Selection::new(&self.structure, &self.db, &self.media)
    }

    fn modification(&self) -> Modification<'_> {
        Modification::new(&self.structure)
    }

    fn id_key(&self) -> Result<&str> {
        self.structure
            .id_key()
            .ok_or_else(|| SchemaError::MissingId(self.structure.key.clone()))
    }

    /// Default read filtering and ordering.
    ///
    /// With `exclude_deleted` (the default on every public read),
    /// soft-deleted rows are filtered out unless the caller already filters
    /// on `isDeleted` explicitly. A query without an ORDER BY is ordered by
    /// the id key so listings and pagination stay stable.
    fn read_query(&self, query: Option<&Query>, exclude_deleted: bool) -> Query {
        let mut query = query.cloned().unwrap_or_default();
        if exclude_deleted && self.structure.soft_deletes() && !query.has_column("isDeleted") {
            query.add("isDeleted", "=", 0);
        }
        if !query.has_order() {
            if let Some(id_key) = self.structure.id_key() {
                query.order_by(id_key, false);
            }
        }
        query
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// All matching rows, resolved, with subrequests attached.
    pub async fn get_all(&self, query: Option<&Query>) -> Result<Vec<Record>> {
        self.get_all_filtered(query, true).await
    }

    /// `get_all` with explicit control over the soft-delete filter.
    pub async fn get_all_filtered(
        &self,
        query: Option<&Query>,
        exclude_deleted: bool,
    ) -> Result<Vec<Record>> {
        let query = self.read_query(query, exclude_deleted);
        let selection = self.selection();
        let rows = selection.rows(&query).await?;
        let mut records = selection.resolve(&rows, &[]);
        for subrequest in self.subrequests.iter() {
            subrequest.apply(&self.db, &self.media, &mut records).await?;
        }
        Ok(records)
    }

    /// First matching row, or the empty record.
    pub async fn get_one(&self, query: Option<&Query>) -> Result<Record> {
        let mut query = self.read_query(query, true);
        query.limit(0, 0);
        Ok(self
            .get_all_filtered(Some(&query), false)
            .await?
            .into_iter()
            .next()
            .unwrap_or_else(Record::empty))
    }

    /// Row by id; requires a single-column id.
    pub async fn get_by_id(&self, id: i64) -> Result<Record> {
        let id_key = self.id_key()?;
        self.get_one(Some(&Query::create(id_key, "=", id))).await
    }

    /// Matching rows as a map, keyed by a field value or the id.
    pub async fn get_map(
        &self,
        query: Option<&Query>,
        key: Option<&str>,
    ) -> Result<BTreeMap<String, Record>> {
        let records = self.get_all(query).await?;
        let mut map = BTreeMap::new();
        for record in records {
            let map_key = match key {
                Some(field) => record
                    .get(field)
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .unwrap_or_default(),
                None => record.id().to_string(),
            };
            map.insert(map_key, record);
        }
        Ok(map)
    }

    /// Number of matching rows.
    pub async fn get_total(&self, query: Option<&Query>) -> Result<i64> {
        let query = self.read_query(query, true);
        self.selection().total(&query).await
    }

    /// Sum of a column across matching rows.
    pub async fn get_sum(&self, column: &str, query: Option<&Query>) -> Result<i64> {
        let query = self.read_query(query, true);
        self.selection().sum(column, &query).await
    }

    /// Raw values of one column across matching rows.
    pub async fn get_column(&self, column: &str, query: Option<&Query>) -> Result<Vec<Value>> {
        let query = self.read_query(query, true);
        self.selection().column_values(column, &query).await
    }

    /// `{id, name}` pairs for dropdowns, ordered by the name field.
    pub async fn get_select(&self, query: Option<&Query>) -> Result<Vec<Record>> {
        let name_key = self
            .structure
            .name_key()
            .map(str::to_string)
            .or_else(|| self.structure.id_key().map(str::to_string))
            .ok_or_else(|| SchemaError::MissingId(self.structure.key.clone()))?;

        let mut query = query.cloned().unwrap_or_default();
        if !query.has_order() {
            query.order_by(&name_key, false);
        }
        let query = self.read_query(Some(&query), true);

        let selection = self.selection();
        let rows = selection.some(&[&name_key], &query).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut record = Record::empty();
                if let Some(id) = row.raw("id") {
                    record.insert("id".into(), crate::selection::value_json(id));
                }
                let name = row.raw(&name_key).map(Value::to_text).unwrap_or_default();
                record.insert("name".into(), serde_json::Value::String(name));
                record
            })
            .collect())
    }

    /// Tokenized free-text search across the name fields.
    pub async fn get_search(&self, term: &str, limit: i64) -> Result<Vec<Record>> {
        let columns = self.structure.search_keys();
        let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        let mut query = Query::create_search(&column_refs, term);
        query.limit(0, limit.max(1) - 1);
        self.get_all(Some(&query)).await
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Insert a row from request data; returns the new id.
    pub async fn create(&self, request: &RequestValues) -> Result<i64> {
        self.create_scoped(request, None).await
    }

    /// `create` with a sibling scope for position maintenance.
    ///
    /// An explicit in-range `position` in the request shifts later siblings
    /// up; otherwise the row appends at the next free position.
    pub async fn create_scoped(
        &self,
        request: &RequestValues,
        scope: Option<&Query>,
    ) -> Result<i64> {
        let modification = self.modification();
        let mut values = modification.from_request(request);
        modification.apply_create_bookkeeping(&mut values, self.actor, now());

        let mut tx = self.db.begin().await?;
        if self.structure.has_position {
            let next = self.next_position_tx(&mut tx, scope).await?;
            let position = match request.int("position").filter(|p| *p >= 1 && *p < next) {
                Some(requested) => {
                    self.shift_tx(&mut tx, None, Some(requested), scope).await?;
                    requested
                }
                None => next,
            };
            values.set_value("position", position);
        }
        let (sql, params) = modification.insert_sql(&values)?;
        let id = tx.insert(&sql, &params).await?;
        tx.commit().await?;
        debug!(schema = %self.structure.key, id, "schema.create");
        Ok(id)
    }

    /// Insert-or-replace by primary key.
    pub async fn replace(&self, request: &RequestValues) -> Result<i64> {
        let modification = self.modification();
        let mut values = modification.from_request(request);
        modification.apply_create_bookkeeping(&mut values, self.actor, now());
        if let Ok(id_key) = self.id_key() {
            if let Some(id) = request.int(id_key) {
                values.set_value(id_key, id);
            }
        }
        let (sql, params) = modification.replace_sql(&values)?;
        Ok(self.db.insert(&sql, &params).await?)
    }

    /// Update matching rows from request data; returns affected rows.
    pub async fn edit(&self, query: &Query, request: &RequestValues) -> Result<u64> {
        self.edit_scoped(query, request, None).await
    }

    /// `edit` with a sibling scope for position maintenance.
    ///
    /// A changed `position` shifts the siblings between the old and new slot
    /// by one; a target beyond the end clamps to the last position.
    pub async fn edit_scoped(
        &self,
        query: &Query,
        request: &RequestValues,
        scope: Option<&Query>,
    ) -> Result<u64> {
        let modification = self.modification();
        let mut values = modification.from_request(request);
        modification.apply_edit_bookkeeping(&mut values, self.actor, now());

        let mut tx = self.db.begin().await?;
        if self.structure.has_position {
            if let Some(requested) = request.int("position") {
                if let Some(old) = self.fetch_position_tx(&mut tx, query).await? {
                    let next = self.next_position_tx(&mut tx, scope).await?;
                    let new = requested.clamp(1, (next - 1).max(1));
                    if new != old {
                        self.shift_tx(&mut tx, Some(old), Some(new), scope).await?;
                    }
                    values.set_value("position", new);
                }
            }
        }

        if values.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }
        let (sql, params) = modification.update_sql(&values, query);
        let affected = tx.execute(&sql, &params).await?;
        tx.commit().await?;
        debug!(schema = %self.structure.key, affected, "schema.edit");
        Ok(affected)
    }

    /// Update matching rows with explicit update expressions.
    pub async fn edit_values(&self, query: &Query, mut values: FieldValues) -> Result<u64> {
        let modification = self.modification();
        modification.apply_edit_bookkeeping(&mut values, self.actor, now());
        if values.is_empty() {
            return Ok(0);
        }
        let (sql, params) = modification.update_sql(&values, query);
        Ok(self.db.execute(&sql, &params).await?)
    }

    /// Increment a numeric column on matching rows.
    pub async fn increase(&self, query: &Query, column: &str, amount: i64) -> Result<u64> {
        let mut values = FieldValues::new();
        values.set(column, UpdateValue::Increment(amount));
        let (sql, params) = self.modification().update_sql(&values, query);
        Ok(self.db.execute(&sql, &params).await?)
    }

    /// Insert many rows in one statement, bookkeeping included.
    pub async fn batch(&self, requests: &[RequestValues]) -> Result<u64> {
        if requests.is_empty() {
            return Ok(0);
        }
        let modification = self.modification();
        let now = now();

        let mut next_position = if self.structure.has_position {
            let mut tx = self.db.begin().await?;
            let next = self.next_position_tx(&mut tx, None).await?;
            tx.commit().await?;
            next
        } else {
            0
        };

        let mut per_row = Vec::with_capacity(requests.len());
        let mut columns: Vec<String> = Vec::new();
        for request in requests {
            let mut values = modification.from_request(request);
            modification.apply_create_bookkeeping(&mut values, self.actor, now);
            if self.structure.has_position {
                values.set_value("position", next_position);
                next_position += 1;
            }
            for (column, _) in values.iter() {
                if !columns.contains(column) {
                    columns.push(column.clone());
                }
            }
            per_row.push(values);
        }

        let column_refs: Vec<&str> = columns.iter().map(String::as_str).collect();
        let rows: Vec<Vec<Value>> = per_row
            .iter()
            .map(|values| {
                columns
                    .iter()
                    .map(|column| match values.get(column) {
                        Some(UpdateValue::Set(value)) => value.clone(),
                        _ => Value::Null,
                    })
                    .collect()
            })
            .collect();
        Ok(self
            .db
            .insert_many(&self.structure.table, &column_refs, &rows)
            .await?)
    }

    /// Delete matching rows: a soft delete when the structure supports it,
    /// else a physical delete. Returns whether anything was deleted.
    pub async fn delete(&self, query: &Query) -> Result<bool> {
        self.delete_scoped(query, None).await
    }

    /// `delete` with a sibling scope for position maintenance.
    pub async fn delete_scoped(&self, query: &Query, scope: Option<&Query>) -> Result<bool> {
        if !self.structure.soft_deletes() {
            let removed = self.remove(query).await?;
            return Ok(removed > 0);
        }

        let mut live = query.clone();
        if !live.has_column("isDeleted") {
            live.add("isDeleted", "=", 0);
        }

        let mut tx = self.db.begin().await?;
        let old_position = if self.structure.has_position {
            match self.fetch_position_tx(&mut tx, &live).await? {
                Some(position) => Some(position),
                None => {
                    tx.commit().await?;
                    return Ok(false);
                }
            }
        } else {
            let exists: i64 = {
                let (sql, params) = count_statement(&self.structure.table, &live);
                tx.fetch_scalar(&sql, &params).await?
            };
            if exists == 0 {
                tx.commit().await?;
                return Ok(false);
            }
            None
        };

        let modification = self.modification();
        let mut values = FieldValues::new().with("isDeleted", 1i64);
        modification.apply_edit_bookkeeping(&mut values, self.actor, now());
        let (sql, params) = modification.update_sql(&values, &live);
        tx.execute(&sql, &params).await?;

        if let Some(old) = old_position {
            self.shift_tx(&mut tx, Some(old), None, scope).await?;
        }
        tx.commit().await?;
        debug!(schema = %self.structure.key, "schema.delete");
        Ok(true)
    }

    /// Physically delete matching rows, bypassing soft deletion.
    pub async fn remove(&self, query: &Query) -> Result<u64> {
        let mut sql = format!("DELETE FROM {}", quote_ident(&self.structure.table));
        let where_body = query.where_sql();
        if !where_body.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_body);
        }
        Ok(self.db.execute(&sql, &query.params()).await?)
    }

    /// Delete every row and reset the id sequence.
    pub async fn truncate(&self) -> Result<()> {
        self.db
            .execute(&format!("DELETE FROM {}", quote_ident(&self.structure.table)), &[])
            .await?;
        self.db
            .execute(
                "DELETE FROM sqlite_sequence WHERE name = ?",
                &[Value::from(self.structure.table.as_str())],
            )
            .await
            .ok();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Position maintenance
    // ------------------------------------------------------------------

    /// Shift sibling positions for a move, insert, or removal.
    ///
    /// `old` and `new` describe the slot a row leaves and takes; `None` for
    /// `old` means an insertion, `None` for `new` a removal. Siblings are
    /// restricted by `scope` and soft-deleted rows never shift.
    pub async fn ensure_order(
        &self,
        old: Option<i64>,
        new: Option<i64>,
        scope: Option<&Query>,
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        self.shift_tx(&mut tx, old, new, scope).await?;
        tx.commit().await?;
        Ok(())
    }

    /// The position one past the current maximum among live siblings.
    pub async fn next_position(&self, scope: Option<&Query>) -> Result<i64> {
        let mut tx = self.db.begin().await?;
        let next = self.next_position_tx(&mut tx, scope).await?;
        tx.commit().await?;
        Ok(next)
    }

    async fn next_position_tx(
        &self,
        tx: &mut Transaction<'_>,
        scope: Option<&Query>,
    ) -> Result<i64> {
        let query = self.sibling_query(scope);
        let mut sql = format!(
            "SELECT COALESCE(MAX(\"position\"), 0) + 1 AS \"next\" FROM {}",
            quote_ident(&self.structure.table)
        );
        let where_body = query.where_sql();
        if !where_body.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_body);
        }
        Ok(tx.fetch_scalar(&sql, &query.params()).await?)
    }

    async fn fetch_position_tx(
        &self,
        tx: &mut Transaction<'_>,
        query: &Query,
    ) -> Result<Option<i64>> {
        let mut query = query.clone();
        if self.structure.soft_deletes() && !query.has_column("isDeleted") {
            query.add("isDeleted", "=", 0);
        }
        let mut sql = format!(
            "SELECT \"position\" FROM {}",
            quote_ident(&self.structure.table)
        );
        let where_body = query.where_sql();
        if !where_body.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_body);
        }
        sql.push_str(" LIMIT 1");
        let row = tx.fetch_optional(&sql, &query.params()).await?;
        Ok(match row {
            Some(row) => Some(row.get_by_name("position")?),
            None => None,
        })
    }

    async fn shift_tx(
        &self,
        tx: &mut Transaction<'_>,
        old: Option<i64>,
        new: Option<i64>,
        scope: Option<&Query>,
    ) -> Result<()> {
        let mut query = self.sibling_query(scope);
        let delta = match (old, new) {
            (Some(old), Some(new)) if new > old => {
                query.add("position", ">", old);
                query.add("position", "<=", new);
                UpdateValue::Decrement(1)
            }
            (Some(old), Some(new)) if new < old => {
                query.add("position", ">=", new);
                query.add("position", "<", old);
                UpdateValue::Increment(1)
            }
            (Some(_), Some(_)) => return Ok(()),
            (Some(old), None) => {
                query.add("position", ">", old);
                UpdateValue::Decrement(1)
            }
            (None, Some(new)) => {
                query.add("position", ">=", new);
                UpdateValue::Increment(1)
            }
            (None, None) => return Ok(()),
        };
        let mut values = FieldValues::new();
        values.set("position", delta);
        let (sql, params) = self.modification().update_sql(&values, &query);
        tx.execute(&sql, &params).await?;
        Ok(())
    }

    fn sibling_query(&self, scope: Option<&Query>) -> Query {
        let mut query = scope.cloned().unwrap_or_default();
        if self.structure.soft_deletes() && !query.has_column("isDeleted") {
            query.add("isDeleted", "=", 0);
        }
        query
    }

    // ------------------------------------------------------------------
    // Uniqueness maintenance
    // ------------------------------------------------------------------

    /// Keep "exactly one row holds this boolean flag" true.
    ///
    /// Enabling the flag on `id` clears it everywhere else in the scope.
    /// Disabling it on the holder promotes the first row by natural order;
    /// with no candidate left this degrades to a no-op and the flag count
    /// drops to zero, which is the accepted edge.
    pub async fn ensure_unique(
        &self,
        column: &str,
        id: i64,
        enabled: bool,
        scope: Option<&Query>,
    ) -> Result<()> {
        let id_key = self.id_key()?.to_string();
        crate::definition::check_ident(column, "unique column")?;
        let table = quote_ident(&self.structure.table);
        let column_sql = quote_ident(column);

        let mut tx = self.db.begin().await?;
        if enabled {
            let on_query = Query::create(&id_key, "=", id);
            let (sql, params) = update_flag_statement(&table, &column_sql, 1, &on_query);
            tx.execute(&sql, &params).await?;

            let mut others = self.sibling_query(scope);
            others.add(&id_key, "!=", id);
            let (sql, params) = update_flag_statement(&table, &column_sql, 0, &others);
            tx.execute(&sql, &params).await?;
        } else {
            let off_query = Query::create(&id_key, "=", id);
            let (sql, params) = update_flag_statement(&table, &column_sql, 0, &off_query);
            tx.execute(&sql, &params).await?;

            let mut holders = self.sibling_query(scope);
            holders.add(column, "=", 1);
            let (sql, params) = count_statement(&self.structure.table, &holders);
            let remaining: i64 = tx.fetch_scalar(&sql, &params).await?;

            if remaining == 0 {
                let mut candidates = self.sibling_query(scope);
                candidates.add(&id_key, "!=", id);
                let order = self
                    .structure
                    .name_key()
                    .unwrap_or(&id_key)
                    .to_string();
                candidates.order_by(&order, false);
                let mut sql = format!("SELECT {} AS \"id\" FROM {}", quote_ident(&id_key), table);
                let where_body = candidates.where_sql();
                if !where_body.is_empty() {
                    sql.push_str(" WHERE ");
                    sql.push_str(&where_body);
                }
                sql.push(' ');
                sql.push_str(&candidates.order_sql());
                sql.push_str(" LIMIT 1");
                if let Some(row) = tx.fetch_optional(&sql, &candidates.params()).await? {
                    let promote_id: i64 = row.get_by_name("id")?;
                    let promote = Query::create(&id_key, "=", promote_id);
                    let (sql, params) = update_flag_statement(&table, &column_sql, 1, &promote);
                    tx.execute(&sql, &params).await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("key", &self.structure.key)
            .field("table", &self.structure.table)
            .finish_non_exhaustive()
    }
}

fn update_flag_statement(
    table: &str,
    column: &str,
    value: i64,
    query: &Query,
) -> (String, Vec<Value>) {
    let mut sql = format!("UPDATE {} SET {} = {}", table, column, value);
    let where_body = query.where_sql();
    if !where_body.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_body);
    }
    (sql, query.params())
}

fn count_statement(table: &str, query: &Query) -> (String, Vec<Value>) {
    let mut sql = format!("SELECT COUNT(*) AS \"total\" FROM {}", quote_ident(table));
    let where_body = query.where_sql();
    if !where_body.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_body);
    }
    (sql, query.params())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
