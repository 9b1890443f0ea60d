//! Dynamic result rows.

use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row as _, TypeInfo, ValueRef as _};

use crate::error::{DbError, Result};
use crate::value::{FromValue, Value};

/// Row data from a query result.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Create a new row with column names and values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    /// Decode a sqlx row into dynamic values, driven by each cell's type info.
    pub(crate) fn from_sqlite(row: &SqliteRow) -> Result<Self> {
        let count = row.len();
        let mut columns = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count);
        for (index, column) in row.columns().iter().enumerate() {
            columns.push(column.name().to_string());
            values.push(decode_cell(row, index)?);
        }
        Ok(Self { columns, values })
    }

    /// Get a value by column index.
    pub fn get<T: FromValue>(&self, index: usize) -> Result<T> {
        self.values
            .get(index)
            .ok_or_else(|| DbError::decode(format!("Column index {} out of bounds", index)))
            .and_then(|v| T::from_value(v))
    }

    /// Get a value by column name.
    pub fn get_by_name<T: FromValue>(&self, name: &str) -> Result<T> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| DbError::decode(format!("Column '{}' not found", name)))?;
        self.get(index)
    }

    /// Get the raw value at a named column, if present.
    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|index| self.values.get(index))
    }

    /// Get the number of columns.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if the row is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get the column names.
    pub fn column_names(&self) -> &[String] {
        &self.columns
    }

    /// Iterate over (column, value) pairs in selection order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(|c| c.as_str())
            .zip(self.values.iter())
    }
}

fn decode_cell(row: &SqliteRow, index: usize) -> Result<Value> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();
    drop(raw);

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => Value::Int(row.try_get::<i64, _>(index)?),
        "REAL" | "NUMERIC" => Value::Float(row.try_get::<f64, _>(index)?),
        "BLOB" => Value::Blob(row.try_get::<Vec<u8>, _>(index)?),
        _ => Value::Text(row.try_get::<String, _>(index)?),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_by_name_and_raw() {
        let row = Row::new(
            vec!["id".to_string(), "name".to_string()],
            vec![Value::Int(3), Value::Text("alpha".to_string())],
        );
        assert_eq!(row.get_by_name::<i64>("id").unwrap(), 3);
        assert_eq!(row.get_by_name::<String>("name").unwrap(), "alpha");
        assert_eq!(row.raw("name"), Some(&Value::Text("alpha".to_string())));
        assert!(row.raw("missing").is_none());
        assert!(row.get_by_name::<i64>("missing").is_err());
    }
}
