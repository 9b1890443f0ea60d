//! Count: a correlated aggregate joined in via a derived table.
//!
//! The derived table groups by the join key, so the outer LEFT JOIN matches
//! zero or one aggregate row per parent row and never multiplies the result
//! set. A parent with no children resolves to 0, not NULL.

use serde_json::{Map, Value as Json};

use atrium_db::Value;

use crate::definition::CountDef;
use crate::field::{format_number, FieldKind};

/// One declared COUNT/SUM aggregate.
#[derive(Debug, Clone)]
pub struct Count {
    /// Result alias, also the display key.
    pub key: String,
    pub table: String,
    /// Group/join key in the counted table.
    pub column: String,
    /// Summed column (SUM only).
    pub value: Option<String>,
    pub is_sum: bool,
    pub multiplier: Option<f64>,
    /// Parent column the aggregate joins against; `None` means the id key.
    pub left_key: Option<String>,
    /// Table that parent column lives on; `None` means the main table.
    pub on_table: Option<String>,
    /// Optional Float/Price display formatting of the aggregate.
    pub kind: Option<FieldKind>,
    pub decimals: u32,
    /// Skip soft-deleted child rows.
    pub exclude_deleted: bool,
}

impl Count {
    pub(crate) fn from_def(def: &CountDef) -> Self {
        let kind = def.kind.as_deref().and_then(FieldKind::parse);
        Self {
            key: def.key.clone(),
            table: def.table.clone(),
            column: def.column.clone(),
            value: def.value.clone(),
            is_sum: def.is_sum,
            multiplier: def.multiplier,
            left_key: def.left_key.clone(),
            on_table: def.on.clone(),
            kind,
            decimals: def.decimals.unwrap_or(2),
            exclude_deleted: def.exclude_deleted,
        }
    }

    /// The aggregate expression inside the derived table.
    pub(crate) fn aggregate_sql(&self) -> String {
        if self.is_sum {
            let column = format!("\"{}\"", self.value.as_deref().unwrap_or("id"));
            match self.multiplier {
                Some(m) => format!("SUM({} * {})", column, m),
                None => format!("SUM({})", column),
            }
        } else {
            "COUNT(*)".to_string()
        }
    }

    /// Resolve the raw aggregate cell into display values.
    pub fn resolve(&self, raw: Option<&Value>, out: &mut Map<String, Json>) {
        let amount = raw.and_then(Value::as_int).unwrap_or(0);
        match self.kind {
            Some(FieldKind::Price) => {
                let value = amount as f64 / 10f64.powi(self.decimals as i32);
                out.insert(
                    format!("{}Format", self.key),
                    Json::from(format_number(value, self.decimals)),
                );
                out.insert(format!("{}Cents", self.key), Json::from(amount));
                out.insert(self.key.clone(), json_number(value));
            }
            Some(FieldKind::Float) => {
                let value = amount as f64 / 10f64.powi(self.decimals as i32);
                out.insert(
                    format!("{}Format", self.key),
                    Json::from(format_number(value, self.decimals)),
                );
                out.insert(self.key.clone(), json_number(value));
            }
            _ => {
                out.insert(self.key.clone(), Json::from(amount));
            }
        }
    }
}

fn json_number(value: f64) -> Json {
    serde_json::Number::from_f64(value)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(json: serde_json::Value) -> Count {
        Count::from_def(&serde_json::from_value(json).unwrap())
    }

    #[test]
    fn missing_aggregate_resolves_to_zero() {
        let count = count(serde_json::json!({
            "key": "articleCount", "table": "articles", "column": "categoryId"
        }));
        let mut out = Map::new();
        count.resolve(None, &mut out);
        assert_eq!(out["articleCount"], serde_json::json!(0));

        let mut out = Map::new();
        count.resolve(Some(&Value::Null), &mut out);
        assert_eq!(out["articleCount"], serde_json::json!(0));
    }

    #[test]
    fn price_sum_expands_to_cents_shape() {
        let count = count(serde_json::json!({
            "key": "revenue", "table": "orders", "column": "customerId",
            "isSum": true, "value": "total", "type": "Price"
        }));
        assert_eq!(count.aggregate_sql(), "SUM(\"total\")");

        let mut out = Map::new();
        count.resolve(Some(&Value::Int(1234)), &mut out);
        assert_eq!(out["revenue"], serde_json::json!(12.34));
        assert_eq!(out["revenueFormat"], serde_json::json!("12,34"));
        assert_eq!(out["revenueCents"], serde_json::json!(1234));
    }

    #[test]
    fn price_sum_honors_declared_decimals() {
        let count = count(serde_json::json!({
            "key": "fuel", "table": "stops", "column": "tripId",
            "isSum": true, "value": "liters", "type": "Price", "decimals": 3
        }));
        let mut out = Map::new();
        count.resolve(Some(&Value::Int(1500)), &mut out);
        assert_eq!(out["fuel"], serde_json::json!(1.5));
        assert_eq!(out["fuelFormat"], serde_json::json!("1,500"));
        assert_eq!(out["fuelCents"], serde_json::json!(1500));
    }

    #[test]
    fn multiplier_scales_the_sum() {
        let count = count(serde_json::json!({
            "key": "totalUnits", "table": "lines", "column": "orderId",
            "isSum": true, "value": "amount", "multiplier": 3.0
        }));
        assert_eq!(count.aggregate_sql(), "SUM(\"amount\" * 3)");
    }
}
