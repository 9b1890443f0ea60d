//! Selection: assembles the full SELECT for a structure and decodes rows.
//!
//! Aliases for joined tables are allocated here, so callers can filter and
//! sort on bare display keys; [`Selection::qualify`] rewrites each referenced
//! column to the table or alias that actually owns it before rendering.

use serde_json::Value as Json;

use atrium_db::{quote_ident, Database, Row, Value};

use crate::error::Result;
use crate::query::Query;
use crate::record::Record;
use crate::registry::MediaConfig;
use crate::structure::{ColumnOwner, Structure};

/// Read-side SQL assembly for one structure.
pub struct Selection<'a> {
    structure: &'a Structure,
    db: &'a Database,
    media: &'a MediaConfig,
    /// Table alias per join, in join order.
    aliases: Vec<String>,
    /// Derived-table alias per count, in count order.
    count_aliases: Vec<String>,
}

impl<'a> Selection<'a> {
    pub fn new(structure: &'a Structure, db: &'a Database, media: &'a MediaConfig) -> Self {
        let aliases = allocate_aliases(structure);
        let count_aliases = structure
            .counts
            .iter()
            .map(|count| format!("{}_agg", count.key))
            .collect();
        Self {
            structure,
            db,
            media,
            aliases,
            count_aliases,
        }
    }

    /// The alias the join at `index` was given.
    pub fn join_alias(&self, index: usize) -> &str {
        &self.aliases[index]
    }

    // ------------------------------------------------------------------
    // Assembly
    // ------------------------------------------------------------------

    /// Rewrite every bare referenced column to its owning table or alias.
    ///
    /// Unknown columns stay bare; an explicit qualification set by the
    /// caller is left alone.
    pub fn qualify(&self, query: &mut Query) {
        query.for_each_column(|column| {
            if column.qualified.is_some() {
                return;
            }
            match self.structure.owner_of(&column.name) {
                Some(ColumnOwner::Own(name)) => {
                    column.qualified = Some(format!(
                        "{}.{}",
                        quote_ident(&self.structure.table),
                        quote_ident(&name)
                    ));
                }
                Some(ColumnOwner::Joined(index, raw)) => {
                    column.qualified = Some(format!(
                        "{}.{}",
                        quote_ident(&self.aliases[index]),
                        quote_ident(&raw)
                    ));
                }
                Some(ColumnOwner::Aggregate(index)) => {
                    column.qualified = Some(format!(
                        "{}.{}",
                        quote_ident(&self.count_aliases[index]),
                        quote_ident(&self.structure.counts[index].key)
                    ));
                }
                None => {}
            }
        });
    }

    /// Select expressions for every structure field, the id aliased as `id`.
    fn field_selects(&self) -> Vec<String> {
        let table = quote_ident(&self.structure.table);
        let id_key = self.structure.id_key();
        self.structure
            .fields
            .iter()
            .map(|field| {
                let column = format!("{}.{}", table, quote_ident(&field.name));
                if Some(field.name.as_str()) == id_key {
                    format!("{} AS \"id\"", column)
                } else {
                    column
                }
            })
            .collect()
    }

    /// Select expressions for joined fields, aliased by display key.
    fn join_selects(&self) -> Vec<String> {
        let mut selects = Vec::new();
        for (index, join) in self.structure.joins.iter().enumerate() {
            let alias = quote_ident(&self.aliases[index]);
            for field in &join.fields {
                selects.push(format!(
                    "{}.{} AS {}",
                    alias,
                    quote_ident(&field.name),
                    quote_ident(&field.key)
                ));
            }
        }
        selects
    }

    fn count_selects(&self) -> Vec<String> {
        self.structure
            .counts
            .iter()
            .zip(&self.count_aliases)
            .map(|(count, alias)| {
                format!(
                    "{}.{} AS {}",
                    quote_ident(alias),
                    quote_ident(&count.key),
                    quote_ident(&count.key)
                )
            })
            .collect()
    }

    /// LEFT JOIN clauses for joins and counts, with their bind parameters.
    fn join_sql(&self) -> (String, Vec<Value>) {
        let mut sql = String::new();
        let mut params = Vec::new();
        let main = quote_ident(&self.structure.table);

        for (index, join) in self.structure.joins.iter().enumerate() {
            let alias = &self.aliases[index];
            let on_table = match &join.on_table {
                Some(on) => self.resolve_on_table(on),
                None => main.clone(),
            };
            sql.push_str(&format!(
                " LEFT JOIN {} AS {} ON ({}.{} = {}.{}",
                quote_ident(&join.table),
                quote_ident(alias),
                quote_ident(alias),
                quote_ident(&join.left_key),
                on_table,
                quote_ident(&join.right_key)
            ));
            if let Some((column, value)) = &join.and {
                sql.push_str(&format!(" AND {}.{} = ?", quote_ident(alias), quote_ident(column)));
                params.push(value.clone());
            }
            sql.push(')');
        }

        for (count, count_alias) in self.structure.counts.iter().zip(&self.count_aliases) {
            let group = quote_ident(&count.column);
            let deleted_filter = if count.exclude_deleted {
                " WHERE \"isDeleted\" = 0"
            } else {
                ""
            };
            let left_key = count
                .left_key
                .clone()
                .or_else(|| self.structure.id_key().map(str::to_string))
                .unwrap_or_else(|| "id".to_string());
            let on_table = match &count.on_table {
                Some(on) => self.resolve_on_table(on),
                None => main.clone(),
            };
            sql.push_str(&format!(
                " LEFT JOIN (SELECT {}, {} AS {} FROM {}{} GROUP BY {}) AS {} ON ({}.{} = {}.{})",
                group,
                count.aggregate_sql(),
                quote_ident(&count.key),
                quote_ident(&count.table),
                deleted_filter,
                group,
                quote_ident(count_alias),
                quote_ident(count_alias),
                group,
                on_table,
                quote_ident(&left_key)
            ));
        }

        (sql, params)
    }

    /// An on-table name in a definition may reference another join's key, in
    /// which case the allocated alias is used.
    fn resolve_on_table(&self, on: &str) -> String {
        for (index, join) in self.structure.joins.iter().enumerate() {
            if join.key == on {
                return quote_ident(&self.aliases[index]);
            }
        }
        quote_ident(on)
    }

    fn statement(&self, selects: &str, query: &Query) -> (String, Vec<Value>) {
        let (joins, mut params) = self.join_sql();
        let mut sql = format!(
            "SELECT {} FROM {}{}",
            selects,
            quote_ident(&self.structure.table),
            joins
        );
        let where_body = query.where_sql();
        if !where_body.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_body);
        }
        for clause in [query.group_sql(), query.order_sql(), query.limit_sql()] {
            if !clause.is_empty() {
                sql.push(' ');
                sql.push_str(&clause);
            }
        }
        params.extend(query.params());
        (sql, params)
    }

    /// Full select statement for debugging and tests.
    pub fn select_sql(&self, query: &Query) -> String {
        let mut query = query.clone();
        self.qualify(&mut query);
        let mut selects = self.field_selects();
        selects.extend(self.join_selects());
        selects.extend(self.count_selects());
        self.statement(&selects.join(", "), &query).0
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run the full select and return raw rows.
    pub async fn rows(&self, query: &Query) -> Result<Vec<Row>> {
        let mut query = query.clone();
        self.qualify(&mut query);
        let mut selects = self.field_selects();
        selects.extend(self.join_selects());
        selects.extend(self.count_selects());
        let (sql, params) = self.statement(&selects.join(", "), &query);
        Ok(self.db.fetch_all(&sql, &params).await?)
    }

    /// Run the full select limited to one row.
    pub async fn row(&self, query: &Query) -> Result<Option<Row>> {
        let mut query = query.clone();
        if !query.has_limit() {
            query.limit(0, 0);
        }
        Ok(self.rows(&query).await?.into_iter().next())
    }

    /// `COUNT(*)` over the filtered set.
    pub async fn total(&self, query: &Query) -> Result<i64> {
        let mut query = query.clone();
        self.qualify(&mut query);
        let (sql, params) = self.statement("COUNT(*) AS \"total\"", &query);
        Ok(self.db.fetch_scalar(&sql, &params).await?)
    }

    /// `SUM(column)` over the filtered set, 0 when no rows match.
    pub async fn sum(&self, column: &str, query: &Query) -> Result<i64> {
        let mut query = query.clone();
        self.qualify(&mut query);
        let target = self.qualified_name(column);
        let selects = format!("COALESCE(SUM({}), 0) AS \"total\"", target);
        let (sql, params) = self.statement(&selects, &query);
        Ok(self.db.fetch_scalar(&sql, &params).await?)
    }

    /// The raw values of one column across the filtered set.
    pub async fn column_values(&self, column: &str, query: &Query) -> Result<Vec<Value>> {
        let mut query = query.clone();
        self.qualify(&mut query);
        let selects = format!("{} AS \"value\"", self.qualified_name(column));
        let (sql, params) = self.statement(&selects, &query);
        let rows = self.db.fetch_all(&sql, &params).await?;
        Ok(rows
            .iter()
            .map(|row| row.raw("value").cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Partial projection: only the named display columns, plus the id.
    pub async fn some(&self, columns: &[&str], query: &Query) -> Result<Vec<Row>> {
        let mut query = query.clone();
        self.qualify(&mut query);
        let mut selects = Vec::new();
        if let Some(id_key) = self.structure.id_key() {
            selects.push(format!(
                "{}.{} AS \"id\"",
                quote_ident(&self.structure.table),
                quote_ident(id_key)
            ));
        }
        for column in columns {
            selects.push(format!(
                "{} AS {}",
                self.qualified_name(column),
                quote_ident(column)
            ));
        }
        let (sql, params) = self.statement(&selects.join(", "), &query);
        Ok(self.db.fetch_all(&sql, &params).await?)
    }

    fn qualified_name(&self, column: &str) -> String {
        match self.structure.owner_of(column) {
            Some(ColumnOwner::Own(name)) => format!(
                "{}.{}",
                quote_ident(&self.structure.table),
                quote_ident(&name)
            ),
            Some(ColumnOwner::Joined(index, raw)) => format!(
                "{}.{}",
                quote_ident(&self.aliases[index]),
                quote_ident(&raw)
            ),
            Some(ColumnOwner::Aggregate(index)) => format!(
                "{}.{}",
                quote_ident(&self.count_aliases[index]),
                quote_ident(&self.structure.counts[index].key)
            ),
            None => quote_ident(column),
        }
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Expand raw rows into display-ready records.
    ///
    /// Missing columns expand to their empty/zero shapes; partial projections
    /// resolve without error. `extras` names raw columns copied through
    /// verbatim.
    pub fn resolve(&self, rows: &[Row], extras: &[String]) -> Vec<Record> {
        rows.iter().map(|row| self.resolve_row(row, extras)).collect()
    }

    fn resolve_row(&self, row: &Row, extras: &[String]) -> Record {
        let mut record = Record::empty();
        let out = record.values_mut();

        let id_raw = row
            .raw("id")
            .or_else(|| self.structure.id_key().and_then(|key| row.raw(key)))
            .or_else(|| self.structure.name_key().and_then(|key| row.raw(key)));
        if let Some(id) = id_raw {
            out.insert("id".to_string(), value_json(id));
        }

        let id_key = self.structure.id_key();
        for field in &self.structure.fields {
            let raw = if Some(field.name.as_str()) == id_key {
                row.raw("id").or_else(|| row.raw(&field.name))
            } else {
                row.raw(&field.name)
            };
            field.to_values(raw, out, self.media);
        }
        for join in &self.structure.joins {
            join.to_values(row, out, self.media);
        }
        for count in &self.structure.counts {
            count.resolve(row.raw(&count.key), out);
        }
        for extra in extras {
            if let Some(raw) = row.raw(extra) {
                out.insert(extra.clone(), value_json(raw));
            }
        }
        record
    }
}

/// Allocate a table alias per join.
///
/// An explicit alias wins; a table joined more than once (or shadowing the
/// main table) gets a fresh single-letter alias so the SQL never collides;
/// otherwise the table name itself serves as the alias.
fn allocate_aliases(structure: &Structure) -> Vec<String> {
    let mut used: std::collections::BTreeSet<String> =
        std::iter::once(structure.table.clone()).collect();
    for join in &structure.joins {
        if let Some(alias) = &join.alias {
            used.insert(alias.clone());
        }
    }

    let mut table_uses = std::collections::BTreeMap::new();
    for join in &structure.joins {
        *table_uses.entry(join.table.as_str()).or_insert(0usize) += 1;
    }

    let mut aliases = Vec::with_capacity(structure.joins.len());
    for (index, join) in structure.joins.iter().enumerate() {
        let alias = if let Some(alias) = &join.alias {
            alias.clone()
        } else if table_uses[join.table.as_str()] > 1
            || join.table == structure.table
            || used.contains(&join.table)
        {
            fresh_alias(&used, index)
        } else {
            join.table.clone()
        };
        used.insert(alias.clone());
        aliases.push(alias);
    }
    aliases
}

fn fresh_alias(used: &std::collections::BTreeSet<String>, index: usize) -> String {
    (b'a'..=b'z')
        .map(|c| (c as char).to_string())
        .find(|candidate| !used.contains(candidate))
        .unwrap_or_else(|| format!("j{}", index))
}

pub(crate) fn value_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Int(v) => Json::from(*v),
        Value::Float(v) => serde_json::Number::from_f64(*v)
            .map(Json::Number)
            .unwrap_or(Json::Null),
        Value::Text(s) => Json::from(s.clone()),
        Value::Blob(b) => Json::from(String::from_utf8_lossy(b).into_owned()),
    }
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
    fn twice_joined_table_gets_distinct_aliases() {
        let structure = structure(serde_json::json!({
            "table": "messages",
            "fields": [{"key": "id", "type": "ID"}],
            "joins": [
                {
                    "key": "sender", "table": "users",
                    "leftKey": "id", "rightKey": "senderId",
                    "fields": [{"key": "name", "type": "String"}]
                },
                {
                    "key": "recipient", "table": "users",
                    "leftKey": "id", "rightKey": "recipientId",
                    "fields": [{"key": "name", "type": "String"}]
                }
            ]
        }));
        let aliases = allocate_aliases(&structure);
        assert_eq!(aliases.len(), 2);
        assert_ne!(aliases[0], aliases[1]);
        assert_ne!(aliases[0], "users");
        assert_ne!(aliases[1], "users");
    }

    #[test]
    fn single_join_uses_table_name() {
        let structure = structure(serde_json::json!({
            "table": "articles",
            "fields": [{"key": "id", "type": "ID"}],
            "joins": [{
                "key": "author", "table": "users",
                "leftKey": "id", "rightKey": "authorId",
                "fields": [{"key": "name", "type": "String"}]
            }]
        }));
        assert_eq!(allocate_aliases(&structure), vec!["users".to_string()]);
    }

    #[test]
    fn explicit_alias_wins() {
        let structure = structure(serde_json::json!({
            "table": "articles",
            "fields": [{"key": "id", "type": "ID"}],
            "joins": [{
                "key": "author", "table": "users", "alias": "writer",
                "leftKey": "id", "rightKey": "authorId",
                "fields": [{"key": "name", "type": "String"}]
            }]
        }));
        assert_eq!(allocate_aliases(&structure), vec!["writer".to_string()]);
    }
}
