//! Field: one column descriptor.
//!
//! A field carries three translations of one column: its SQL DDL type
//! ([`Field::column_type`]), the extraction of a submitted request value into
//! a storable scalar ([`Field::from_request`]), and the expansion of a raw
//! database scalar into the display-ready key set templates consume
//! ([`Field::to_values`]). The expansion key names are a compatibility
//! contract and must not change.

use chrono::{DateTime, NaiveDate, NaiveTime};
use serde_json::{Map, Value as Json};

use atrium_db::Value;

use crate::definition::{Definitions, FieldDef};
use crate::registry::MediaConfig;
use crate::request::RequestValues;

/// Semantic field types. String forms are the definition-format contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Id,
    Boolean,
    Binary,
    Number,
    Float,
    Price,
    Date,
    Hour,
    String,
    Json,
    Csv,
    Text,
    File,
    Image,
    Status,
    FemStatus,
}

impl FieldKind {
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ID" => Self::Id,
            "Boolean" => Self::Boolean,
            "Binary" => Self::Binary,
            "Number" => Self::Number,
            "Float" => Self::Float,
            "Price" => Self::Price,
            "Date" => Self::Date,
            "Hour" => Self::Hour,
            "String" => Self::String,
            "JSON" => Self::Json,
            "CSV" => Self::Csv,
            "Text" => Self::Text,
            "File" => Self::File,
            "Image" => Self::Image,
            "Status" => Self::Status,
            "FemStatus" => Self::FemStatus,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "ID",
            Self::Boolean => "Boolean",
            Self::Binary => "Binary",
            Self::Number => "Number",
            Self::Float => "Float",
            Self::Price => "Price",
            Self::Date => "Date",
            Self::Hour => "Hour",
            Self::String => "String",
            Self::Json => "JSON",
            Self::Csv => "CSV",
            Self::Text => "Text",
            Self::File => "File",
            Self::Image => "Image",
            Self::Status => "Status",
            Self::FemStatus => "FemStatus",
        }
    }

    fn default_decimals(&self) -> u32 {
        match self {
            Self::Float | Self::Price => 2,
            _ => 0,
        }
    }
}

/// One column of a structure.
#[derive(Debug, Clone)]
pub struct Field {
    /// Database column name.
    pub name: String,
    /// Display key: the column name carrying its join prefix, computed once.
    pub key: String,
    pub kind: FieldKind,
    pub length: Option<u32>,
    pub decimals: u32,
    pub default: Option<String>,
    pub is_primary: bool,
    pub is_key: bool,
    pub is_name: bool,
    pub no_empty: bool,
    pub is_signed: bool,
    pub can_edit: bool,
    pub no_prefix: bool,
    pub merge: Option<String>,
}

impl Field {
    pub(crate) fn from_def(def: &FieldDef, prefix: &str) -> Self {
        let kind = FieldKind::parse(&def.kind).unwrap_or(FieldKind::String);
        Self {
            name: def.key.clone(),
            key: prefixed_key(&def.key, prefix, def.no_prefix),
            kind,
            length: def.length,
            decimals: def.decimals.unwrap_or_else(|| kind.default_decimals()),
            default: def.default.as_ref().and_then(Definitions::default_string),
            is_primary: def.is_primary || kind == FieldKind::Id,
            is_key: def.is_key,
            is_name: def.is_name,
            no_empty: def.no_empty,
            is_signed: def.is_signed,
            can_edit: def.can_edit,
            no_prefix: def.no_prefix,
            merge: def.merge.clone(),
        }
    }

    /// Build one of the capability-injected bookkeeping fields.
    pub(crate) fn implicit(name: &str, kind: FieldKind, default: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            key: name.to_string(),
            kind,
            length: None,
            decimals: kind.default_decimals(),
            default: default.map(str::to_string),
            is_primary: false,
            is_key: false,
            is_name: false,
            no_empty: false,
            is_signed: false,
            can_edit: false,
            no_prefix: true,
            merge: None,
        }
    }

    /// Declared SQL column type, the fixed per-kind grammar.
    pub fn column_type(&self) -> String {
        match self.kind {
            FieldKind::Id => "integer".to_string(),
            FieldKind::Boolean | FieldKind::Binary | FieldKind::Status | FieldKind::FemStatus => {
                "unsigned tinyint(1)".to_string()
            }
            FieldKind::Number
            | FieldKind::Float
            | FieldKind::Price
            | FieldKind::Date
            | FieldKind::Hour => {
                let length = self.length.unwrap_or(10).max(1);
                let base = match length {
                    1..=2 => "tinyint",
                    3..=4 => "smallint",
                    5..=7 => "mediumint",
                    8..=10 => "int",
                    _ => "bigint",
                };
                // SQLite's type-name grammar only accepts name tokens
                // before the (length) part, so unsigned comes first.
                if self.is_signed {
                    format!("{}({})", base, length)
                } else {
                    format!("unsigned {}({})", base, length)
                }
            }
            FieldKind::String | FieldKind::File | FieldKind::Image => {
                format!("varchar({})", self.length.unwrap_or(255))
            }
            FieldKind::Json | FieldKind::Csv | FieldKind::Text => "text".to_string(),
        }
    }

    /// Full column DDL: type plus default clause.
    pub fn ddl(&self) -> String {
        match &self.default {
            Some(default) => format!(
                "{} DEFAULT '{}'",
                self.column_type(),
                default.replace('\'', "''")
            ),
            None => self.column_type(),
        }
    }

    /// Extract this field's value from submitted request data.
    ///
    /// `None` means the request did not address the field at all; it stays
    /// untouched. An empty submitted value on a `noEmpty` field also yields
    /// `None`.
    pub fn from_request(&self, request: &RequestValues) -> Option<Value> {
        match self.kind {
            // The id is never written from request data.
            FieldKind::Id => None,
            FieldKind::Number => {
                let raw = request.str(&self.key)?;
                if raw.is_empty() && self.no_empty {
                    return None;
                }
                Some(Value::Int(raw.trim().parse().unwrap_or(0)))
            }
            FieldKind::Float | FieldKind::Price => {
                let raw = request.str(&self.key)?;
                if raw.is_empty() && self.no_empty {
                    return None;
                }
                Some(Value::Int(to_scaled(&raw, self.decimals)))
            }
            FieldKind::Boolean
            | FieldKind::Binary
            | FieldKind::Status
            | FieldKind::FemStatus => {
                if !request.has(&self.key) {
                    return None;
                }
                Some(Value::Int(request.bool(&self.key) as i64))
            }
            FieldKind::Date => self.date_from_request(request),
            FieldKind::Hour => {
                let raw = request.str(&self.key)?;
                if raw.is_empty() {
                    return if self.no_empty { None } else { Some(Value::Int(0)) };
                }
                Some(Value::Int(parse_hour(&raw).unwrap_or(0)))
            }
            FieldKind::Json => {
                let raw = request.raw(&self.key)?;
                let encoded = match raw {
                    Json::String(s) => s.clone(),
                    other => other.to_string(),
                };
                if encoded.is_empty() && self.no_empty {
                    return None;
                }
                Some(Value::Text(encoded))
            }
            FieldKind::Csv => {
                let raw = request.raw(&self.key)?;
                let encoded = match raw {
                    Json::Array(items) => items
                        .iter()
                        .map(json_scalar_text)
                        .collect::<Vec<_>>()
                        .join(","),
                    other => json_scalar_text(other),
                };
                if encoded.is_empty() && self.no_empty {
                    return None;
                }
                Some(Value::Text(encoded))
            }
            FieldKind::String | FieldKind::Text | FieldKind::File | FieldKind::Image => {
                let raw = request.str(&self.key)?;
                if raw.is_empty() && self.no_empty {
                    return None;
                }
                Some(Value::Text(raw))
            }
        }
    }

    /// A Date arrives either as one combined value under the key, or as split
    /// `<key>Date` / `<key>Hour` companion values.
    fn date_from_request(&self, request: &RequestValues) -> Option<Value> {
        let date_key = format!("{}Date", self.key);
        let hour_key = format!("{}Hour", self.key);
        if request.has(&date_key) {
            let date_raw = request.str(&date_key).unwrap_or_default();
            if date_raw.is_empty() {
                return if self.no_empty { None } else { Some(Value::Int(0)) };
            }
            let date = parse_date(&date_raw)?;
            let minutes = request
                .str(&hour_key)
                .and_then(|h| parse_hour(&h))
                .unwrap_or(0);
            let time = NaiveTime::from_num_seconds_from_midnight_opt(minutes as u32 * 60, 0)?;
            return Some(Value::Int(date.and_time(time).and_utc().timestamp()));
        }
        let raw = request.str(&self.key)?;
        if raw.is_empty() {
            return if self.no_empty { None } else { Some(Value::Int(0)) };
        }
        if let Ok(ts) = raw.trim().parse::<i64>() {
            return Some(Value::Int(ts));
        }
        let date = parse_date(&raw)?;
        Some(Value::Int(date.and_time(NaiveTime::MIN).and_utc().timestamp()))
    }

    /// Expand one raw database scalar into the display key set.
    ///
    /// Absent and NULL raws expand to empty/zero shapes rather than erroring;
    /// partial projections rely on that.
    pub fn to_values(&self, raw: Option<&Value>, out: &mut Map<String, Json>, media: &MediaConfig) {
        let key = self.key.clone();
        match self.kind {
            FieldKind::Id | FieldKind::Number | FieldKind::Binary => {
                out.insert(key, Json::from(raw_int(raw)));
            }
            FieldKind::Boolean => {
                out.insert(key, Json::Bool(raw_int(raw) != 0));
            }
            FieldKind::Float => {
                let value = raw_int(raw) as f64 / 10f64.powi(self.decimals as i32);
                out.insert(self.derived("Format"), Json::from(format_number(value, self.decimals)));
                out.insert(key, json_number(value));
            }
            FieldKind::Price => {
                let cents = raw_int(raw);
                let value = cents as f64 / 10f64.powi(self.decimals as i32);
                out.insert(self.derived("Format"), Json::from(format_number(value, self.decimals)));
                out.insert(self.derived("Cents"), Json::from(cents));
                out.insert(key, json_number(value));
            }
            FieldKind::Date => {
                let ts = raw_int(raw);
                let (date, full, iso) = if ts != 0 {
                    match DateTime::from_timestamp(ts, 0) {
                        Some(dt) => (
                            dt.format("%d-%m-%Y").to_string(),
                            dt.format("%d-%m-%Y %H:%M").to_string(),
                            dt.format("%Y-%m-%dT%H:%M:%S").to_string(),
                        ),
                        None => (String::new(), String::new(), String::new()),
                    }
                } else {
                    (String::new(), String::new(), String::new())
                };
                out.insert(self.derived("Date"), Json::from(date));
                out.insert(self.derived("Full"), Json::from(full));
                out.insert(self.derived("ISO"), Json::from(iso));
                out.insert(key, Json::from(ts));
            }
            FieldKind::Hour => {
                let minutes = raw_int(raw);
                out.insert(
                    self.derived("Format"),
                    Json::from(format!("{}:{:02}", minutes / 60, minutes % 60)),
                );
                out.insert(key, Json::from(minutes));
            }
            FieldKind::Status | FieldKind::FemStatus => {
                let value = raw_int(raw);
                out.insert("isActive".to_string(), Json::Bool(value == 1));
                out.insert(
                    self.derived("Name"),
                    Json::from(if value == 1 { "Active" } else { "Inactive" }),
                );
                out.insert(key, Json::from(value));
            }
            FieldKind::Json => {
                let text = raw_text(raw);
                let parsed = serde_json::from_str::<Json>(&text).unwrap_or(Json::String(text));
                out.insert(key, parsed);
            }
            FieldKind::Csv => {
                let text = raw_text(raw);
                let list: Vec<Json> = if text.is_empty() {
                    Vec::new()
                } else {
                    text.split(',').map(|s| Json::from(s.to_string())).collect()
                };
                out.insert(self.derived("List"), Json::Array(list));
                out.insert(key, Json::from(text));
            }
            FieldKind::File => {
                let file = raw_text(raw);
                out.insert(self.derived("Url"), Json::from(media.url(&file)));
                out.insert(key, Json::from(file));
            }
            FieldKind::Image => {
                let file = raw_text(raw);
                out.insert(self.derived("Url"), Json::from(media.url(&file)));
                out.insert(self.derived("Large"), Json::from(media.sized("large", &file)));
                out.insert(self.derived("Medium"), Json::from(media.sized("medium", &file)));
                out.insert(self.derived("Small"), Json::from(media.sized("small", &file)));
                out.insert(self.derived("Thumb"), Json::from(media.sized("thumb", &file)));
                out.insert(key, Json::from(file));
            }
            FieldKind::String | FieldKind::Text => {
                out.insert(key, Json::from(raw_text(raw)));
            }
        }
    }

    fn derived(&self, suffix: &str) -> String {
        format!("{}{}", self.key, suffix)
    }
}

/// Prefixed display key: `price` under prefix `article` becomes `articlePrice`.
pub(crate) fn prefixed_key(name: &str, prefix: &str, no_prefix: bool) -> String {
    if prefix.is_empty() || no_prefix {
        return name.to_string();
    }
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("{}{}{}", prefix, first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

/// Fixed-point scaling: `"12.34"` at 2 decimals becomes 1234.
///
/// A comma decimal separator is accepted; the value is rounded to the scale.
pub(crate) fn to_scaled(text: &str, decimals: u32) -> i64 {
    let normalized = text.trim().replace(',', ".");
    match normalized.parse::<f64>() {
        Ok(v) => (v * 10f64.powi(decimals as i32)).round() as i64,
        Err(_) => 0,
    }
}

/// Display formatting: decimal comma, dot thousands separator.
///
/// Magnitudes of 1000 and up are shown without decimals.
pub(crate) fn format_number(value: f64, decimals: u32) -> String {
    let decimals = if value.abs() >= 1000.0 { 0 } else { decimals };
    // Halves round away from zero; `{:.*}` alone rounds half to even.
    let scale = 10i64.pow(decimals);
    let scaled = (value.abs() * scale as f64).round() as i64;

    let digits: Vec<char> = (scaled / scale).to_string().chars().collect();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (index, ch) in digits.iter().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(*ch);
    }

    let mut result = String::new();
    if value < 0.0 && scaled != 0 {
        result.push('-');
    }
    result.push_str(&grouped);
    if decimals > 0 {
        result.push(',');
        result.push_str(&format!("{:0>width$}", scaled % scale, width = decimals as usize));
    }
    result
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%d-%m-%Y")
        .or_else(|_| NaiveDate::parse_from_str(raw, "%Y-%m-%d"))
        .ok()
}

/// `"HH:MM"` to minutes since midnight.
fn parse_hour(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if let Some((h, m)) = raw.split_once(':') {
        let hours: i64 = h.trim().parse().ok()?;
        let minutes: i64 = m.trim().parse().ok()?;
        Some((hours * 60 + minutes).clamp(0, 24 * 60 - 1))
    } else {
        raw.parse().ok()
    }
}

fn raw_int(raw: Option<&Value>) -> i64 {
    raw.and_then(Value::as_int).unwrap_or(0)
}

fn raw_text(raw: Option<&Value>) -> String {
    raw.map(Value::to_text).unwrap_or_default()
}

fn json_scalar_text(value: &Json) -> String {
    match value {
        Json::String(s) => s.clone(),
        Json::Null => String::new(),
        other => other.to_string(),
    }
}

fn json_number(value: f64) -> Json {
    serde_json::Number::from_f64(value)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}
