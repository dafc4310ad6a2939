//! Turn `PgRow`s into JSON objects for collaborators that answer with JSON.
//!
//! SQL NULL becomes JSON `null`. A column that cannot be decoded is an error,
//! never a silent `null`.

use crate::error::TenancyError;
use serde_json::{Map, Number, Value};
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{PgRow, Postgres};
use sqlx::types::Decimal;
use sqlx::{Column, Decode, Row, Type, TypeInfo};
use std::fmt::Write;

pub fn rows_to_json(rows: &[PgRow]) -> Result<Vec<Value>, TenancyError> {
    rows.iter().map(row_to_json).collect()
}

pub fn row_to_json(row: &PgRow) -> Result<Value, TenancyError> {
    let mut map = Map::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let value = cell_to_json(row, idx, col.type_info().name())?;
        map.insert(col.name().to_string(), value);
    }
    Ok(Value::Object(map))
}

fn get<'r, T>(row: &'r PgRow, idx: usize) -> Result<Option<T>, TenancyError>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    Ok(row.try_get::<Option<T>, _>(idx)?)
}

fn cell_to_json(row: &PgRow, idx: usize, type_name: &str) -> Result<Value, TenancyError> {
    let value = match type_name {
        "VOID" => None,
        "BOOL" => get::<bool>(row, idx)?.map(Value::Bool),
        "INT2" => get::<i16>(row, idx)?.map(Value::from),
        "INT4" => get::<i32>(row, idx)?.map(Value::from),
        "INT8" => get::<i64>(row, idx)?.map(Value::from),
        "OID" => get::<Oid>(row, idx)?.map(|oid| Value::from(oid.0)),
        "FLOAT4" => get::<f32>(row, idx)?.map(|n| float(n as f64)),
        "FLOAT8" => get::<f64>(row, idx)?.map(float),
        // Kept as a string so no precision is lost on the way to JSON.
        "NUMERIC" => get::<Decimal>(row, idx)?.map(|d| Value::String(d.to_string())),
        "BYTEA" => get::<Vec<u8>>(row, idx)?.map(|b| Value::String(bytea_hex(&b))),
        "UUID" => get::<uuid::Uuid>(row, idx)?.map(|u| Value::String(u.to_string())),
        "TIMESTAMPTZ" => get::<chrono::DateTime<chrono::Utc>>(row, idx)?.map(|d| Value::String(d.to_rfc3339())),
        "TIMESTAMP" => get::<chrono::NaiveDateTime>(row, idx)?
            .map(|d| Value::String(d.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => get::<chrono::NaiveDate>(row, idx)?.map(|d| Value::String(d.format("%Y-%m-%d").to_string())),
        "TIME" => get::<chrono::NaiveTime>(row, idx)?.map(|t| Value::String(t.format("%H:%M:%S%.f").to_string())),
        "INTERVAL" => get::<PgInterval>(row, idx)?.map(|i| {
            serde_json::json!({ "months": i.months, "days": i.days, "microseconds": i.microseconds })
        }),
        "JSON" | "JSONB" => get::<Value>(row, idx)?,
        "BOOL[]" => get::<Vec<bool>>(row, idx)?.map(Value::from),
        "INT2[]" => get::<Vec<i16>>(row, idx)?.map(Value::from),
        "INT4[]" => get::<Vec<i32>>(row, idx)?.map(Value::from),
        "INT8[]" => get::<Vec<i64>>(row, idx)?.map(Value::from),
        "FLOAT4[]" => get::<Vec<f32>>(row, idx)?.map(|v| Value::Array(v.into_iter().map(|n| float(n as f64)).collect())),
        "FLOAT8[]" => get::<Vec<f64>>(row, idx)?.map(|v| Value::Array(v.into_iter().map(float).collect())),
        "NUMERIC[]" => get::<Vec<Decimal>>(row, idx)?
            .map(|v| Value::Array(v.into_iter().map(|d| Value::String(d.to_string())).collect())),
        "UUID[]" => get::<Vec<uuid::Uuid>>(row, idx)?
            .map(|v| Value::Array(v.into_iter().map(|u| Value::String(u.to_string())).collect())),
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => get::<Vec<String>>(row, idx)?.map(Value::from),
        // Text-like columns; any other type fails to decode here and is reported.
        _ => get::<String>(row, idx)?.map(Value::String),
    };
    Ok(value.unwrap_or(Value::Null))
}

/// JSON numbers cannot hold NaN or infinities; those come back as strings.
fn float(n: f64) -> Value {
    Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(n.to_string()))
}

/// PostgreSQL's hex output form, e.g. `\x00ff`.
fn bytea_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{:02x}", b);
    }
    out
}
