//! Dynamic row decoding.
//!
//! Result shapes are determined entirely by the SQL text, so rows are decoded
//! column by column into JSON values keyed by column name. NUMERIC is
//! rendered as a string to keep its exact digits.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgHasArrayType, PgRow, PgTypeInfo, PgTypeKind, Postgres};
use sqlx::{Column, Decode, Row as _, Type, TypeInfo};
use uuid::Uuid;

/// One result row: column name to value.
pub type Row = Map<String, Value>;

/// How a PostgreSQL column type is rendered as JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnKind {
    Bool,
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Numeric,
    Text,
    Json,
    Uuid,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    BoolArray,
    SmallIntArray,
    IntArray,
    BigIntArray,
    DoubleArray,
    TextArray,
    /// No JSON rendering; decoding the column fails.
    Unsupported,
}

impl ColumnKind {
    pub(crate) fn from_type_name(name: &str) -> Self {
        match name {
            "BOOL" => ColumnKind::Bool,
            "INT2" => ColumnKind::SmallInt,
            "INT4" => ColumnKind::Int,
            "INT8" => ColumnKind::BigInt,
            "FLOAT4" => ColumnKind::Real,
            "FLOAT8" => ColumnKind::Double,
            "NUMERIC" => ColumnKind::Numeric,
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" | "CITEXT" => ColumnKind::Text,
            "JSON" | "JSONB" => ColumnKind::Json,
            "UUID" => ColumnKind::Uuid,
            "TIMESTAMPTZ" => ColumnKind::TimestampTz,
            "TIMESTAMP" => ColumnKind::Timestamp,
            "DATE" => ColumnKind::Date,
            "TIME" => ColumnKind::Time,
            "BOOL[]" => ColumnKind::BoolArray,
            "INT2[]" => ColumnKind::SmallIntArray,
            "INT4[]" => ColumnKind::IntArray,
            "INT8[]" => ColumnKind::BigIntArray,
            "FLOAT8[]" => ColumnKind::DoubleArray,
            "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => ColumnKind::TextArray,
            _ => ColumnKind::Unsupported,
        }
    }

    /// Enums travel as their label text; domains as their base type.
    pub(crate) fn from_type_info(type_info: &PgTypeInfo) -> Self {
        match type_info.kind() {
            PgTypeKind::Enum(_) => ColumnKind::Text,
            PgTypeKind::Domain(base) => Self::from_type_info(base),
            _ => Self::from_type_name(type_info.name()),
        }
    }
}

/// Decode every column of `row` into a [`Row`].
///
/// A column whose type has no JSON rendering fails with
/// [`sqlx::Error::ColumnDecode`] rather than being dropped.
pub(crate) fn to_json(row: &PgRow) -> Result<Row, sqlx::Error> {
    let mut out = Map::with_capacity(row.len());

    for column in row.columns() {
        let index = column.ordinal();
        let type_info = column.type_info();

        let value = match ColumnKind::from_type_info(type_info) {
            ColumnKind::Bool => get::<bool>(row, index)?.map(Value::Bool),
            ColumnKind::SmallInt => get::<i16>(row, index)?.map(Value::from),
            ColumnKind::Int => get::<i32>(row, index)?.map(Value::from),
            ColumnKind::BigInt => get::<i64>(row, index)?.map(Value::from),
            ColumnKind::Real => get::<f32>(row, index)?.map(|v| float_value(v as f64)),
            ColumnKind::Double => get::<f64>(row, index)?.map(float_value),
            ColumnKind::Numeric => get::<Decimal>(row, index)?.map(|v| Value::String(v.to_string())),
            ColumnKind::Text => get::<String>(row, index)?.map(Value::String),
            ColumnKind::Json => get::<Value>(row, index)?,
            ColumnKind::Uuid => get::<Uuid>(row, index)?.map(|v| Value::String(v.to_string())),
            ColumnKind::TimestampTz => {
                get::<DateTime<Utc>>(row, index)?.map(|v| Value::String(v.to_rfc3339()))
            }
            ColumnKind::Timestamp => get::<NaiveDateTime>(row, index)?
                .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
            ColumnKind::Date => get::<NaiveDate>(row, index)?.map(|v| Value::String(v.to_string())),
            ColumnKind::Time => get::<NaiveTime>(row, index)?.map(|v| Value::String(v.to_string())),
            ColumnKind::BoolArray => array::<bool>(row, index, Value::Bool)?,
            ColumnKind::SmallIntArray => array::<i16>(row, index, Value::from)?,
            ColumnKind::IntArray => array::<i32>(row, index, Value::from)?,
            ColumnKind::BigIntArray => array::<i64>(row, index, Value::from)?,
            ColumnKind::DoubleArray => array::<f64>(row, index, float_value)?,
            ColumnKind::TextArray => array::<String>(row, index, Value::String)?,
            ColumnKind::Unsupported => {
                return Err(sqlx::Error::ColumnDecode {
                    index: column.name().to_string(),
                    source: format!("no JSON rendering for column type {}", type_info.name())
                        .into(),
                });
            }
        };

        out.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }

    Ok(out)
}

// The kind was matched on the column type already, so the driver's own
// compatibility check is skipped. Enums and domains depend on this.
fn get<'r, T>(row: &'r PgRow, index: usize) -> Result<Option<T>, sqlx::Error>
where
    T: Decode<'r, Postgres>,
{
    row.try_get_unchecked::<Option<T>, _>(index)
}

fn array<T>(row: &PgRow, index: usize, element: fn(T) -> Value) -> Result<Option<Value>, sqlx::Error>
where
    T: for<'a> Decode<'a, Postgres> + Type<Postgres> + PgHasArrayType,
{
    let items = row.try_get_unchecked::<Option<Vec<Option<T>>>, _>(index)?;
    Ok(items.map(|items| {
        Value::Array(
            items
                .into_iter()
                .map(|item| item.map(element).unwrap_or(Value::Null))
                .collect(),
        )
    }))
}

// NaN and infinities have no JSON representation.
fn float_value(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}
