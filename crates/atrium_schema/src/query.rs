//! The filter/sort/group/limit builder.
//!
//! A query is a structured part list, not an accumulated SQL string: each
//! predicate keeps its column reference, operator and values separate until a
//! single render pass. That lets [`Selection`](crate::Selection) qualify bare
//! column names with the owning table alias after the fact, with no string
//! surgery, and guarantees placeholder/parameter parity by construction.

use atrium_db::Value;

/// A column reference inside a query.
///
/// Callers write bare column names; qualification with the owning
/// table/alias happens later, during selection assembly.
#[derive(Debug, Clone)]
pub struct ColumnRef {
    pub name: String,
    pub qualified: Option<String>,
    /// Render wrapped in `LOWER()` (case-insensitive search).
    pub lower: bool,
}

impl ColumnRef {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            qualified: None,
            lower: false,
        }
    }

    fn render(&self) -> String {
        let base = self.qualified.clone().unwrap_or_else(|| self.name.clone());
        if self.lower {
            format!("LOWER({})", base)
        } else {
            base
        }
    }
}

/// Conjunction placed before a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conj {
    And,
    Or,
}

impl Conj {
    fn sql(self) -> &'static str {
        match self {
            Conj::And => "AND",
            Conj::Or => "OR",
        }
    }
}

#[derive(Debug, Clone)]
enum Part {
    Cond {
        conj: Conj,
        column: ColumnRef,
        op: String,
        values: Vec<Value>,
    },
    Raw {
        conj: Conj,
        sql: String,
        params: Vec<Value>,
    },
    Open {
        conj: Conj,
    },
    Close,
}

/// A single or multi value passed to [`Query::add`].
///
/// A list value renders a `(?, ?, ...)` placeholder group, as used with `IN`.
#[derive(Debug, Clone)]
pub enum QueryValue {
    One(Value),
    Many(Vec<Value>),
}

impl QueryValue {
    fn is_empty(&self) -> bool {
        match self {
            QueryValue::One(v) => v.is_empty(),
            QueryValue::Many(values) => values.is_empty(),
        }
    }
}

impl From<Value> for QueryValue {
    fn from(v: Value) -> Self {
        QueryValue::One(v)
    }
}

impl From<i64> for QueryValue {
    fn from(v: i64) -> Self {
        QueryValue::One(Value::Int(v))
    }
}

impl From<i32> for QueryValue {
    fn from(v: i32) -> Self {
        QueryValue::One(Value::Int(v as i64))
    }
}

impl From<f64> for QueryValue {
    fn from(v: f64) -> Self {
        QueryValue::One(Value::Float(v))
    }
}

impl From<bool> for QueryValue {
    fn from(v: bool) -> Self {
        QueryValue::One(Value::Int(v as i64))
    }
}

impl From<&str> for QueryValue {
    fn from(v: &str) -> Self {
        QueryValue::One(Value::Text(v.to_string()))
    }
}

impl From<String> for QueryValue {
    fn from(v: String) -> Self {
        QueryValue::One(Value::Text(v))
    }
}

impl From<Vec<Value>> for QueryValue {
    fn from(v: Vec<Value>) -> Self {
        QueryValue::Many(v)
    }
}

impl From<Vec<i64>> for QueryValue {
    fn from(v: Vec<i64>) -> Self {
        QueryValue::Many(v.into_iter().map(Value::Int).collect())
    }
}

impl From<Vec<String>> for QueryValue {
    fn from(v: Vec<String>) -> Self {
        QueryValue::Many(v.into_iter().map(Value::Text).collect())
    }
}

/// A value assigned to a column during UPDATE.
///
/// The non-`Set` variants are SQL expressions over the current row, rendered
/// by [`Modification`](crate::modification::Modification); they never pass
/// through as literal scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateValue {
    Set(Value),
    Increment(i64),
    Decrement(i64),
    /// Boolean flip: `col = 1 - col`.
    Toggle,
    /// Assign from another column: `col = other`.
    CopyFrom(String),
    /// `col = REPLACE(col, ?, ?)`.
    Replace { from: String, to: String },
    /// Raw SQL fragment with its own bind parameters.
    Raw { sql: String, params: Vec<Value> },
}

impl UpdateValue {
    pub fn set(value: impl Into<Value>) -> Self {
        UpdateValue::Set(value.into())
    }
}

/// Declarative filter/sort/group/limit specification.
#[derive(Debug, Clone, Default)]
pub struct Query {
    parts: Vec<Part>,
    /// One-shot conjunction override set by [`Query::and`] / [`Query::or`].
    next_conj: Option<Conj>,
    /// Depth of open `start_or` blocks; inside them the default flips to OR.
    or_depth: usize,
    order: Vec<(ColumnRef, bool)>,
    group: Option<ColumnRef>,
    limit: Option<(i64, i64)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // One-liner constructors
    // ------------------------------------------------------------------

    pub fn create(column: &str, op: &str, value: impl Into<QueryValue>) -> Self {
        let mut query = Self::new();
        query.add(column, op, value);
        query
    }

    pub fn create_if(column: &str, op: &str, value: impl Into<QueryValue>) -> Self {
        let mut query = Self::new();
        query.add_if(column, op, value);
        query
    }

    pub fn create_search(columns: &[&str], value: &str) -> Self {
        let mut query = Self::new();
        query.search(columns, value, "LIKE", true, true);
        query
    }

    pub fn create_between(column: &str, from: Option<i64>, to: Option<i64>) -> Self {
        let mut query = Self::new();
        query.between_times(column, from, to);
        query
    }

    pub fn create_order_by(column: &str, descending: bool) -> Self {
        let mut query = Self::new();
        query.order_by(column, descending);
        query
    }

    // ------------------------------------------------------------------
    // Predicates
    // ------------------------------------------------------------------

    /// Append a predicate. A list value renders `(?, ?, ...)`; a `LIKE`
    /// operator wraps the value in `%...%`.
    pub fn add(&mut self, column: &str, op: &str, value: impl Into<QueryValue>) -> &mut Self {
        self.add_column(ColumnRef::new(column), op, value.into())
    }

    /// Append a predicate unless the value is empty (empty string, NULL, or
    /// an empty list) - the idiomatic optional filter.
    pub fn add_if(&mut self, column: &str, op: &str, value: impl Into<QueryValue>) -> &mut Self {
        let value = value.into();
        if !value.is_empty() {
            self.add_column(ColumnRef::new(column), op, value);
        }
        self
    }

    /// Append a predicate only when `condition` holds.
    pub fn add_if_cond(
        &mut self,
        column: &str,
        op: &str,
        value: impl Into<QueryValue>,
        condition: bool,
    ) -> &mut Self {
        if condition {
            self.add_column(ColumnRef::new(column), op, value.into());
        }
        self
    }

    fn add_column(&mut self, column: ColumnRef, op: &str, value: QueryValue) -> &mut Self {
        let values = match value {
            QueryValue::One(v) => {
                let v = if op.eq_ignore_ascii_case("LIKE") {
                    Value::Text(format!("%{}%", v.to_text()))
                } else {
                    v
                };
                vec![v]
            }
            QueryValue::Many(values) => values,
        };
        let conj = self.take_conj();
        self.parts.push(Part::Cond {
            conj,
            column,
            op: op.to_string(),
            values,
        });
        self
    }

    /// Append a raw SQL predicate with its own parameters.
    pub fn add_raw(&mut self, sql: &str, params: Vec<Value>) -> &mut Self {
        let conj = self.take_conj();
        self.parts.push(Part::Raw {
            conj,
            sql: sql.to_string(),
            params,
        });
        self
    }

    /// `>=` / `<=` bounds on a column; either bound may be absent.
    pub fn between_times(&mut self, column: &str, from: Option<i64>, to: Option<i64>) -> &mut Self {
        if let Some(from) = from {
            self.add(column, ">=", from);
        }
        if let Some(to) = to {
            self.add(column, "<=", to);
        }
        self
    }

    /// Free-text search: every token must match at least one column.
    ///
    /// With `split_value`, the value splits on whitespace and each token adds
    /// one AND-ed parenthesized OR-group across all columns.
    pub fn search(
        &mut self,
        columns: &[&str],
        value: &str,
        op: &str,
        case_insensitive: bool,
        split_value: bool,
    ) -> &mut Self {
        let tokens: Vec<&str> = if split_value {
            value.split_whitespace().collect()
        } else if value.is_empty() {
            Vec::new()
        } else {
            vec![value]
        };
        for token in tokens {
            let token = if case_insensitive {
                token.to_lowercase()
            } else {
                token.to_string()
            };
            self.start_paren();
            for (index, name) in columns.iter().enumerate() {
                if index > 0 {
                    self.or();
                }
                let mut column = ColumnRef::new(name);
                column.lower = case_insensitive;
                self.add_column(column, op, QueryValue::One(Value::Text(token.clone())));
            }
            self.end_paren();
        }
        self
    }

    // ------------------------------------------------------------------
    // Boolean composition
    // ------------------------------------------------------------------

    pub fn start_paren(&mut self) -> &mut Self {
        let conj = self.take_conj();
        self.parts.push(Part::Open { conj });
        self
    }

    pub fn end_paren(&mut self) -> &mut Self {
        self.parts.push(Part::Close);
        self
    }

    /// Open a parenthesized group whose inner default conjunction is OR.
    pub fn start_or(&mut self) -> &mut Self {
        self.start_paren();
        self.or_depth += 1;
        self
    }

    pub fn end_or(&mut self) -> &mut Self {
        self.or_depth = self.or_depth.saturating_sub(1);
        self.end_paren();
        self
    }

    /// Force AND before the next part.
    pub fn and(&mut self) -> &mut Self {
        self.next_conj = Some(Conj::And);
        self
    }

    /// Force OR before the next part.
    pub fn or(&mut self) -> &mut Self {
        self.next_conj = Some(Conj::Or);
        self
    }

    fn take_conj(&mut self) -> Conj {
        if let Some(conj) = self.next_conj.take() {
            return conj;
        }
        if self.or_depth > 0 {
            Conj::Or
        } else {
            Conj::And
        }
    }

    // ------------------------------------------------------------------
    // Sort / group / limit
    // ------------------------------------------------------------------

    pub fn order_by(&mut self, column: &str, descending: bool) -> &mut Self {
        self.order.push((ColumnRef::new(column), descending));
        self
    }

    pub fn group_by(&mut self, column: &str) -> &mut Self {
        self.group = Some(ColumnRef::new(column));
        self
    }

    pub fn limit(&mut self, from: i64, to: i64) -> &mut Self {
        self.limit = Some((from, to));
        self
    }

    /// Page windows: `from = page * amount`, `to = from + amount - 1`.
    pub fn paginate(&mut self, page: i64, amount: i64) -> &mut Self {
        let from = page * amount;
        self.limit(from, from + amount - 1)
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Whether any predicate references the column.
    pub fn has_column(&self, name: &str) -> bool {
        self.parts.iter().any(|part| match part {
            Part::Cond { column, .. } => column.name == name,
            _ => false,
        })
    }

    pub fn has_order(&self) -> bool {
        !self.order.is_empty()
    }

    pub fn has_limit(&self) -> bool {
        self.limit.is_some()
    }

    /// Visit every column reference (predicates, order, group) for
    /// qualification.
    pub fn for_each_column(&mut self, mut visit: impl FnMut(&mut ColumnRef)) {
        for part in &mut self.parts {
            if let Part::Cond { column, .. } = part {
                visit(column);
            }
        }
        for (column, _) in &mut self.order {
            visit(column);
        }
        if let Some(column) = &mut self.group {
            visit(column);
        }
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// The WHERE expression body, or an empty string when unfiltered.
    ///
    /// Placeholder count always equals [`Query::params`] length, in the same
    /// left-to-right order.
    pub fn where_sql(&self) -> String {
        let parts = self.pruned_parts();
        let mut sql = String::new();
        let mut need_conj = false;
        for part in &parts {
            match part {
                Part::Cond {
                    conj,
                    column,
                    op,
                    values,
                } => {
                    if need_conj {
                        sql.push_str(conj.sql());
                        sql.push(' ');
                    }
                    let grouped = values.len() != 1 || op.to_ascii_uppercase().ends_with("IN");
                    let placeholder = if grouped {
                        format!("({})", vec!["?"; values.len()].join(", "))
                    } else {
                        "?".to_string()
                    };
                    sql.push_str(&format!("{} {} {} ", column.render(), op, placeholder));
                    need_conj = true;
                }
                Part::Raw { conj, sql: raw, .. } => {
                    if need_conj {
                        sql.push_str(conj.sql());
                        sql.push(' ');
                    }
                    sql.push_str(raw);
                    sql.push(' ');
                    need_conj = true;
                }
                Part::Open { conj } => {
                    if need_conj {
                        sql.push_str(conj.sql());
                        sql.push(' ');
                    }
                    sql.push('(');
                    need_conj = false;
                }
                Part::Close => {
                    // Trim the space the previous part appended.
                    while sql.ends_with(' ') {
                        sql.pop();
                    }
                    sql.push_str(") ");
                    need_conj = true;
                }
            }
        }
        sql.trim_end().to_string()
    }

    /// Bound parameters in placeholder order.
    pub fn params(&self) -> Vec<Value> {
        let mut params = Vec::new();
        for part in self.pruned_parts() {
            match part {
                Part::Cond { values, .. } => params.extend(values),
                Part::Raw { params: p, .. } => params.extend(p),
                _ => {}
            }
        }
        params
    }

    pub fn order_sql(&self) -> String {
        if self.order.is_empty() {
            return String::new();
        }
        let clauses: Vec<String> = self
            .order
            .iter()
            .map(|(column, descending)| {
                format!(
                    "{} {}",
                    column.render(),
                    if *descending { "DESC" } else { "ASC" }
                )
            })
            .collect();
        format!("ORDER BY {}", clauses.join(", "))
    }

    pub fn group_sql(&self) -> String {
        match &self.group {
            Some(column) => format!("GROUP BY {}", column.render()),
            None => String::new(),
        }
    }

    pub fn limit_sql(&self) -> String {
        match self.limit {
            Some((from, to)) => format!("LIMIT {} OFFSET {}", (to - from + 1).max(0), from.max(0)),
            None => String::new(),
        }
    }

    /// Parts with empty parenthesis groups removed, so a fully-skipped
    /// `add_if` group never renders a dangling `()`.
    fn pruned_parts(&self) -> Vec<Part> {
        let mut parts = self.parts.clone();
        loop {
            let mut removed = false;
            let mut index = 0;
            while index + 1 < parts.len() {
                if matches!(parts[index], Part::Open { .. }) && matches!(parts[index + 1], Part::Close)
                {
                    parts.drain(index..=index + 1);
                    removed = true;
                } else {
                    index += 1;
                }
            }
            if !removed {
                return parts;
            }
        }
    }
}
