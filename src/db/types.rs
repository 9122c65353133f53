//! Row decoding into JSON.
//!
//! # Architecture
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Backend-specific decoders handle the actual value extraction
//!
//! PostgreSQL results arrive in text format for unparameterized queries
//! (simple protocol) and in binary format for parameterized ones, so every
//! decoder here accepts both.

use serde_json::Value as JsonValue;
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueFormat, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo, ValueRef};

use crate::models::DatabaseType;

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    /// PostgreSQL array (`INT4[]`, `TEXT[]`, ...)
    Array,
    Unknown,
}

/// Classify a database type name into a logical category.
pub fn categorize_type(type_name: &str, db: DatabaseType) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.ends_with("[]") {
        return TypeCategory::Array;
    }

    match lower.as_str() {
        "bool" | "boolean" => TypeCategory::Boolean,
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "int" | "serial"
        | "bigserial" | "smallserial" | "oid" => TypeCategory::Integer,
        "float4" | "float8" | "real" | "double precision" | "double" | "float" => {
            TypeCategory::Float
        }
        // SQLite's NUMERIC affinity holds plain numbers
        "numeric" | "decimal" if db == DatabaseType::SQLite => TypeCategory::Float,
        "numeric" | "decimal" => TypeCategory::Decimal,
        "json" | "jsonb" => TypeCategory::Json,
        "uuid" => TypeCategory::Uuid,
        "bytea" | "blob" => TypeCategory::Binary,
        "timestamptz" => TypeCategory::TimestampTz,
        "timestamp" | "datetime" => TypeCategory::Timestamp,
        "date" => TypeCategory::Date,
        "time" => TypeCategory::Time,
        "text" | "varchar" | "bpchar" | "char" | "name" | "citext" => TypeCategory::Text,
        // SQLite declared types are free-form ("VARCHAR(30)", "UNSIGNED BIG INT")
        other if db == DatabaseType::SQLite && other.contains("int") => TypeCategory::Integer,
        other if other.contains("char") || other.contains("clob") => TypeCategory::Text,
        _ => TypeCategory::Unknown,
    }
}

/// Decoding switches taken from the connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Decode PostgreSQL arrays into JSON arrays instead of their text form.
    pub fetch_types: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self { fetch_types: true }
    }
}

// =============================================================================
// Raw PostgreSQL Values
// =============================================================================

/// Wrapper type for raw DECIMAL/NUMERIC values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("NUMERIC")
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("numeric") || name.contains("decimal")
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawDecimal(value.as_str()?.to_string())),
            PgValueFormat::Binary => numeric_to_string(value.as_bytes()?)
                .map(RawDecimal)
                .ok_or_else(|| "malformed binary NUMERIC".into()),
        }
    }
}

/// Any PostgreSQL value in its wire representation, as text.
///
/// Used for types without a dedicated decoder (enums, ranges, intervals, ...).
#[derive(Debug)]
pub struct RawText(pub String);

impl Type<sqlx::Postgres> for RawText {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawText {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        match value.format() {
            PgValueFormat::Text => Ok(RawText(value.as_str()?.to_string())),
            PgValueFormat::Binary => {
                let bytes = value.as_bytes()?;
                Ok(RawText(match std::str::from_utf8(bytes) {
                    Ok(s) => s.to_string(),
                    Err(_) => base64_encode(bytes),
                }))
            }
        }
    }
}

/// Render a binary-format NUMERIC (base-10000 digit groups) as a decimal string.
fn numeric_to_string(bytes: &[u8]) -> Option<String> {
    let read = |offset: usize| -> Option<i16> {
        bytes
            .get(offset..offset + 2)
            .map(|b| i16::from_be_bytes([b[0], b[1]]))
    };

    let ndigits = usize::try_from(read(0)?).ok()?;
    let weight = i32::from(read(2)?);
    let sign = read(4)? as u16;
    let dscale = usize::from(read(6)? as u16);

    match sign {
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digits = (0..ndigits)
        .map(|k| read(8 + 2 * k))
        .collect::<Option<Vec<i16>>>()?;
    let digit_at = |pos: i32| -> i16 {
        usize::try_from(pos)
            .ok()
            .and_then(|p| digits.get(p).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for pos in 0..=weight {
            if pos == 0 {
                out.push_str(&digit_at(pos).to_string());
            } else {
                out.push_str(&format!("{:04}", digit_at(pos)));
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut pos = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit_at(pos)));
            pos += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Some(out)
}

// =============================================================================
// Binary Encoding
// =============================================================================

fn base64_encode(bytes: &[u8]) -> String {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    STANDARD.encode(bytes)
}

/// BYTEA/BLOB values are always rendered as base64 text.
pub fn decode_binary_value(bytes: &[u8]) -> JsonValue {
    JsonValue::String(base64_encode(bytes))
}

fn float_value(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or_else(|| JsonValue::String(v.to_string()))
}

// =============================================================================
// Row to JSON Trait
// =============================================================================

/// Trait for converting database rows to JSON maps.
pub trait RowToJson {
    fn to_json_map(&self, options: DecodeOptions) -> serde_json::Map<String, JsonValue>;
    fn column_names(&self) -> Vec<String>;
}

impl RowToJson for PgRow {
    fn to_json_map(&self, options: DecodeOptions) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let type_name = col.type_info().name();
                let category = categorize_type(type_name, DatabaseType::PostgreSQL);
                let value = postgres::decode_column(self, idx, type_name, category, options);
                (col.name().to_string(), value)
            })
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self, _options: DecodeOptions) -> serde_json::Map<String, JsonValue> {
        self.columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| {
                let category = categorize_type(col.type_info().name(), DatabaseType::SQLite);
                let value = sqlite::decode_column(self, idx, category);
                (col.name().to_string(), value)
            })
            .collect()
    }

    fn column_names(&self) -> Vec<String> {
        self.columns().iter().map(|c| c.name().to_string()).collect()
    }
}

// =============================================================================
// Database-Specific Decoders
// =============================================================================

mod postgres {
    use super::*;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    pub fn decode_column(
        row: &PgRow,
        idx: usize,
        type_name: &str,
        category: TypeCategory,
        options: DecodeOptions,
    ) -> JsonValue {
        match category {
            TypeCategory::Decimal => decode_decimal(row, idx),
            TypeCategory::Integer => decode_integer(row, idx),
            TypeCategory::Boolean => decode_boolean(row, idx),
            TypeCategory::Float => decode_float(row, idx),
            TypeCategory::Binary => decode_binary_col(row, idx),
            TypeCategory::Json => decode_json(row, idx),
            TypeCategory::Uuid => decode_uuid(row, idx),
            TypeCategory::TimestampTz => decode_timestamptz(row, idx),
            TypeCategory::Timestamp => decode_timestamp(row, idx),
            TypeCategory::Date => decode_date(row, idx),
            TypeCategory::Time => decode_time(row, idx),
            TypeCategory::Array if options.fetch_types => decode_array(row, idx, type_name),
            _ => decode_text(row, idx),
        }
    }

    fn decode_decimal(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<RawDecimal>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.0),
            Ok(None) => JsonValue::Null,
            Err(e) => {
                tracing::error!("Failed to decode NUMERIC: {:?}", e);
                JsonValue::Null
            }
        }
    }

    fn decode_integer(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Null;
        }
        if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
            return JsonValue::Number(v.into());
        }
        if let Ok(Some(v)) = row.try_get::<Option<sqlx::postgres::types::Oid>, _>(idx) {
            return JsonValue::Number(v.0.into());
        }
        JsonValue::Null
    }

    fn decode_boolean(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null)
    }

    fn decode_float(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
            return float_value(v);
        }
        if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
            return float_value(f64::from(v));
        }
        JsonValue::Null
    }

    fn decode_binary_col(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<Vec<u8>>, _>(idx)
            .ok()
            .flatten()
            .map(|v| decode_binary_value(&v))
            .unwrap_or(JsonValue::Null)
    }

    fn decode_json(row: &PgRow, idx: usize) -> JsonValue {
        row.try_get::<Option<serde_json::Value>, _>(idx)
            .ok()
            .flatten()
            .unwrap_or(JsonValue::Null)
    }

    fn decode_uuid(row: &PgRow, idx: usize) -> JsonValue {
        let Ok(raw) = row.try_get_raw(idx) else {
            return JsonValue::Null;
        };
        if raw.is_null() {
            return JsonValue::Null;
        }
        let text = match raw.format() {
            PgValueFormat::Text => raw.as_str().ok().map(str::to_string),
            PgValueFormat::Binary => raw.as_bytes().ok().and_then(format_uuid),
        };
        text.map(JsonValue::String).unwrap_or(JsonValue::Null)
    }

    fn format_uuid(bytes: &[u8]) -> Option<String> {
        if bytes.len() != 16 {
            return None;
        }
        let hex: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Some(format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        ))
    }

    fn decode_timestamptz(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<DateTime<Utc>>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.to_rfc3339()),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, idx),
        }
    }

    fn decode_timestamp(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<NaiveDateTime>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, idx),
        }
    }

    fn decode_date(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<NaiveDate>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.to_string()),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, idx),
        }
    }

    fn decode_time(row: &PgRow, idx: usize) -> JsonValue {
        match row.try_get::<Option<NaiveTime>, _>(idx) {
            Ok(Some(v)) => JsonValue::String(v.to_string()),
            Ok(None) => JsonValue::Null,
            Err(_) => decode_text(row, idx),
        }
    }

    fn decode_array(row: &PgRow, idx: usize, type_name: &str) -> JsonValue {
        let element = type_name.trim_end_matches("[]");
        let decoded = match categorize_type(element, DatabaseType::PostgreSQL) {
            TypeCategory::Integer => array_of::<i64>(row, idx)
                .or_else(|| array_of::<i32>(row, idx))
                .or_else(|| array_of::<i16>(row, idx)),
            TypeCategory::Float => array_of::<f64>(row, idx).or_else(|| {
                row.try_get::<Option<Vec<Option<f32>>>, _>(idx)
                    .ok()
                    .map(|v| {
                        to_json_array::<f64>(v.map(|items| {
                            items.into_iter().map(|i| i.map(f64::from)).collect()
                        }))
                    })
            }),
            TypeCategory::Boolean => array_of::<bool>(row, idx),
            TypeCategory::Text => array_of::<String>(row, idx),
            TypeCategory::Json => array_of::<JsonValue>(row, idx),
            _ => None,
        };
        decoded.unwrap_or_else(|| decode_text(row, idx))
    }

    fn array_of<T>(row: &PgRow, idx: usize) -> Option<JsonValue>
    where
        T: for<'r> Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres> + Into<JsonValue>,
        Vec<Option<T>>: for<'r> Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
    {
        row.try_get::<Option<Vec<Option<T>>>, _>(idx)
            .ok()
            .map(to_json_array)
    }

    fn to_json_array<T: Into<JsonValue>>(values: Option<Vec<Option<T>>>) -> JsonValue {
        match values {
            Some(items) => JsonValue::Array(
                items
                    .into_iter()
                    .map(|item| item.map(Into::into).unwrap_or(JsonValue::Null))
                    .collect(),
            ),
            None => JsonValue::Null,
        }
    }

    fn decode_text(row: &PgRow, idx: usize) -> JsonValue {
        if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
            return v.map(JsonValue::String).unwrap_or(JsonValue::Null);
        }
        match row.try_get_unchecked::<Option<RawText>, _>(idx) {
            Ok(v) => v.map(|t| JsonValue::String(t.0)).unwrap_or(JsonValue::Null),
            Err(e) => {
                tracing::warn!(column = idx, error = %e, "Failed to decode column as text");
                JsonValue::Null
            }
        }
    }
}

mod sqlite {
    use super::*;

    /// SQLite columns are dynamically typed, so the value's storage class
    /// decides how to decode; the declared type only refines booleans and JSON.
    pub fn decode_column(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return JsonValue::Null,
            Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
            Err(e) => {
                tracing::warn!(column = idx, error = %e, "Failed to read SQLite value");
                return JsonValue::Null;
            }
        };

        match storage.as_str() {
            "INTEGER" | "INT4" | "BOOLEAN" => decode_integer(row, idx, category),
            "REAL" => row
                .try_get_unchecked::<f64, _>(idx)
                .map(float_value)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get_unchecked::<Vec<u8>, _>(idx)
                .map(|v| decode_binary_value(&v))
                .unwrap_or(JsonValue::Null),
            _ => decode_text(row, idx, category),
        }
    }

    fn decode_integer(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        match row.try_get_unchecked::<i64, _>(idx) {
            Ok(v) if category == TypeCategory::Boolean => JsonValue::Bool(v != 0),
            Ok(v) => JsonValue::Number(v.into()),
            Err(_) => JsonValue::Null,
        }
    }

    fn decode_text(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
        match row.try_get_unchecked::<String, _>(idx) {
            Ok(v) if category == TypeCategory::Json => {
                serde_json::from_str::<JsonValue>(&v).unwrap_or(JsonValue::String(v))
            }
            Ok(v) => JsonValue::String(v),
            Err(_) => JsonValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PG: DatabaseType = DatabaseType::PostgreSQL;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT4", PG), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT", PG), TypeCategory::Integer);
        assert_eq!(
            categorize_type("UNSIGNED BIG INT", DatabaseType::SQLite),
            TypeCategory::Integer
        );
    }

    #[test]
    fn test_categorize_does_not_confuse_interval_and_point() {
        assert_eq!(categorize_type("INTERVAL", PG), TypeCategory::Unknown);
        assert_eq!(categorize_type("POINT", PG), TypeCategory::Unknown);
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("NUMERIC", PG), TypeCategory::Decimal);
        assert_eq!(
            categorize_type("numeric", DatabaseType::SQLite),
            TypeCategory::Float
        );
    }

    #[test]
    fn test_categorize_temporal_and_arrays() {
        assert_eq!(categorize_type("TIMESTAMPTZ", PG), TypeCategory::TimestampTz);
        assert_eq!(categorize_type("TIMESTAMP", PG), TypeCategory::Timestamp);
        assert_eq!(categorize_type("DATE", PG), TypeCategory::Date);
        assert_eq!(categorize_type("INT4[]", PG), TypeCategory::Array);
        assert_eq!(categorize_type("TEXT[]", PG), TypeCategory::Array);
        assert_eq!(categorize_type("jsonb", PG), TypeCategory::Json);
    }

    fn numeric_bytes(weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(digits.len() as i16).to_be_bytes());
        bytes.extend_from_slice(&weight.to_be_bytes());
        bytes.extend_from_slice(&sign.to_be_bytes());
        bytes.extend_from_slice(&dscale.to_be_bytes());
        for d in digits {
            bytes.extend_from_slice(&d.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn test_numeric_to_string() {
        assert_eq!(
            numeric_to_string(&numeric_bytes(0, 0, 2, &[123, 4500])).as_deref(),
            Some("123.45")
        );
        assert_eq!(
            numeric_to_string(&numeric_bytes(-1, 0, 3, &[10])).as_deref(),
            Some("0.001")
        );
        assert_eq!(
            numeric_to_string(&numeric_bytes(1, 0x4000, 0, &[1])).as_deref(),
            Some("-10000")
        );
        assert_eq!(
            numeric_to_string(&numeric_bytes(0, 0, 0, &[])).as_deref(),
            Some("0")
        );
        assert_eq!(
            numeric_to_string(&numeric_bytes(0, 0xC000, 0, &[])).as_deref(),
            Some("NaN")
        );
        assert_eq!(numeric_to_string(&[0, 1]), None);
    }

    #[test]
    fn test_decode_binary_value_is_base64() {
        // valid UTF-8 is still encoded
        assert_eq!(
            decode_binary_value(b"hello world"),
            JsonValue::String("aGVsbG8gd29ybGQ=".to_string())
        );
        assert_eq!(
            decode_binary_value(&[0xFF, 0xFE, 0x00, 0x01]),
            JsonValue::String("//4AAQ==".to_string())
        );
    }

    #[test]
    fn test_float_value_non_finite() {
        assert_eq!(float_value(1.5), serde_json::json!(1.5));
        assert_eq!(float_value(f64::NAN), JsonValue::String("NaN".to_string()));
    }
}
