//! Generic materialization of result rows into JSON-safe values.
//!
//! Each row becomes a mapping of column name to value, with the decoding
//! strategy selected by the column's wire type. Types the engine has not
//! been taught are fetched best-effort as text with a diagnostic, so new
//! wire types degrade gracefully instead of failing every query that
//! touches them.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::Row;
use uuid::Uuid;

/// Errors that fail a whole materialization.
#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("unsupported field type found in fetched row: {type_name}")]
    UnsupportedType { type_name: String },

    #[error("unable to decode column {column}: {source}")]
    Column {
        column: String,
        #[source]
        source: tokio_postgres::Error,
    },
}

/// One decoded cell, tagged by the shape it will take in the output.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Text(String),
    Uuid(Uuid),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(Value),
    Array(Vec<CellValue>),
}

impl CellValue {
    /// Convert into a JSON value. Dates and times render as their canonical
    /// string forms; UUIDs as the hyphenated lowercase form; non-finite
    /// floats have no JSON representation and become null.
    pub fn into_json(self) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(v) => Value::Bool(v),
            CellValue::Int16(v) => Value::from(v),
            CellValue::Int32(v) => Value::from(v),
            CellValue::Int64(v) => Value::from(v),
            CellValue::Float32(v) => float_to_json(v as f64),
            CellValue::Float64(v) => float_to_json(v),
            CellValue::Text(v) => Value::String(v),
            CellValue::Uuid(v) => Value::String(v.hyphenated().to_string()),
            CellValue::Date(v) => Value::String(v.to_string()),
            CellValue::Time(v) => Value::String(v.to_string()),
            CellValue::DateTime(v) => Value::String(v.to_string()),
            CellValue::TimestampTz(v) => Value::String(v.to_rfc3339()),
            CellValue::Json(v) => v,
            CellValue::Array(items) => {
                Value::Array(items.into_iter().map(CellValue::into_json).collect())
            }
        }
    }
}

fn float_to_json(v: f64) -> Value {
    serde_json::Number::from_f64(v)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Read all rows into an ordered list of column-name to value mappings.
/// An empty result set is a valid outcome and yields an empty list.
pub fn materialize(rows: &[Row]) -> Result<Vec<Map<String, Value>>, MaterializeError> {
    let mut result = Vec::with_capacity(rows.len());
    for row in rows {
        let mut object = Map::new();
        for (idx, column) in row.columns().iter().enumerate() {
            let cell = extract_cell(row, idx, column.type_())?;
            object.insert(column.name().to_string(), cell.into_json());
        }
        result.push(object);
    }
    Ok(result)
}

/// Decode one cell according to its wire type.
pub fn extract_cell(row: &Row, idx: usize, pg_type: &Type) -> Result<CellValue, MaterializeError> {
    match *pg_type {
        // explicitly not supported (so far)
        Type::UNKNOWN | Type::XML => Err(MaterializeError::UnsupportedType {
            type_name: pg_type.name().to_string(),
        }),

        Type::BOOL => Ok(get::<bool>(row, idx)?.map_or(CellValue::Null, CellValue::Bool)),

        Type::INT2 => Ok(get::<i16>(row, idx)?.map_or(CellValue::Null, CellValue::Int16)),
        Type::INT4 => Ok(get::<i32>(row, idx)?.map_or(CellValue::Null, CellValue::Int32)),
        Type::INT8 => Ok(get::<i64>(row, idx)?.map_or(CellValue::Null, CellValue::Int64)),

        Type::FLOAT4 => Ok(get::<f32>(row, idx)?.map_or(CellValue::Null, CellValue::Float32)),
        Type::FLOAT8 => Ok(get::<f64>(row, idx)?.map_or(CellValue::Null, CellValue::Float64)),

        Type::TEXT | Type::VARCHAR | Type::NAME | Type::BPCHAR => {
            Ok(get::<String>(row, idx)?.map_or(CellValue::Null, CellValue::Text))
        }

        Type::DATE => Ok(get::<NaiveDate>(row, idx)?.map_or(CellValue::Null, CellValue::Date)),
        Type::TIME => Ok(get::<NaiveTime>(row, idx)?.map_or(CellValue::Null, CellValue::Time)),
        Type::TIMESTAMP => {
            Ok(get::<NaiveDateTime>(row, idx)?.map_or(CellValue::Null, CellValue::DateTime))
        }
        Type::TIMESTAMPTZ => {
            Ok(get::<DateTime<Utc>>(row, idx)?.map_or(CellValue::Null, CellValue::TimestampTz))
        }

        Type::JSON | Type::JSONB => {
            Ok(get::<Value>(row, idx)?.map_or(CellValue::Null, CellValue::Json))
        }

        // 128-bit identifiers come off the wire as 16 raw bytes; emit the
        // canonical hyphenated lowercase string instead.
        Type::UUID => Ok(get::<Uuid>(row, idx)?.map_or(CellValue::Null, CellValue::Uuid)),

        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => Ok(array_cell(
            get::<Vec<Option<String>>>(row, idx)?,
            CellValue::Text,
        )),
        Type::INT4_ARRAY => Ok(array_cell(
            get::<Vec<Option<i32>>>(row, idx)?,
            CellValue::Int32,
        )),
        Type::INT8_ARRAY => Ok(array_cell(
            get::<Vec<Option<i64>>>(row, idx)?,
            CellValue::Int64,
        )),
        Type::DATE_ARRAY => Ok(array_cell(
            get::<Vec<Option<NaiveDate>>>(row, idx)?,
            CellValue::Date,
        )),

        // optimistic default for types not taught yet: best-effort text
        _ => {
            tracing::warn!(
                column = row.columns()[idx].name(),
                wire_type = pg_type.name(),
                "no explicit decode case for this wire type; passing through best-effort. \
                 Consider adding an explicit case"
            );
            match row.try_get::<_, Option<String>>(idx) {
                Ok(v) => Ok(v.map_or(CellValue::Null, CellValue::Text)),
                Err(_) => Ok(CellValue::Null),
            }
        }
    }
}

fn get<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>, MaterializeError> {
    row.try_get::<_, Option<T>>(idx)
        .map_err(|source| MaterializeError::Column {
            column: row.columns()[idx].name().to_string(),
            source,
        })
}

fn array_cell<T>(items: Option<Vec<Option<T>>>, wrap: fn(T) -> CellValue) -> CellValue {
    match items {
        Some(items) => CellValue::Array(
            items
                .into_iter()
                .map(|item| item.map_or(CellValue::Null, wrap))
                .collect(),
        ),
        None => CellValue::Null,
    }
}
