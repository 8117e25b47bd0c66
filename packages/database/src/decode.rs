//! Conversion of `sqlx` MySQL rows into dynamically-typed [`Row`]s.
//!
//! The fleet query is arbitrary SQL, so column types are only discovered
//! from the result-set metadata. Integral types become
//! [`Value::Integer`], floating point types [`Value::Float`], and
//! everything else (including `DECIMAL`, which `SUM()` returns) is kept as
//! text so no precision is lost.

use fleet_query_source_models::{Row, Value};
use sqlx::mysql::MySqlRow;
use sqlx::{Column as _, Row as _, TypeInfo as _, ValueRef as _};

/// How a MySQL column type is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Signed integer types (and `YEAR`).
    Signed,
    /// Unsigned integer types.
    Unsigned,
    /// `BOOLEAN` (`TINYINT(1)`).
    Boolean,
    /// `FLOAT` and `DOUBLE`.
    Float,
    /// `DATE`.
    Date,
    /// `DATETIME` and `TIMESTAMP`.
    DateTime,
    /// Everything else, decoded as text.
    Text,
}

/// Classifies a `sqlx` MySQL type name (e.g. `"BIGINT UNSIGNED"`).
#[must_use]
pub fn column_kind(type_name: &str) -> ColumnKind {
    let upper = type_name.to_ascii_uppercase();
    let unsigned = upper.contains("UNSIGNED");
    let base = upper.split_whitespace().next().unwrap_or("");

    match base {
        "BOOLEAN" | "BOOL" => ColumnKind::Boolean,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "INTEGER" | "BIGINT" => {
            if unsigned {
                ColumnKind::Unsigned
            } else {
                ColumnKind::Signed
            }
        }
        "YEAR" => ColumnKind::Signed,
        "FLOAT" | "DOUBLE" | "REAL" => ColumnKind::Float,
        "DATE" => ColumnKind::Date,
        "DATETIME" | "TIMESTAMP" => ColumnKind::DateTime,
        _ => ColumnKind::Text,
    }
}

/// Converts one driver row into a [`Row`], preserving column order.
///
/// Values that cannot be decoded as their declared type are logged and
/// stored as `NULL` rather than failing the whole source.
#[must_use]
pub fn decode_row(row: &MySqlRow) -> Row {
    let columns = row.columns();
    let mut out = Row::with_capacity(columns.len());

    for (idx, column) in columns.iter().enumerate() {
        let type_name = column.type_info().name();
        let value = decode_value(row, idx, type_name).unwrap_or_else(|e| {
            log::warn!(
                "Column '{}' ({type_name}) could not be decoded, storing NULL: {e}",
                column.name()
            );
            Value::Null
        });
        out.push(column.name(), value);
    }

    out
}

fn decode_value(row: &MySqlRow, idx: usize, type_name: &str) -> Result<Value, sqlx::Error> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    Ok(match column_kind(type_name) {
        ColumnKind::Signed => Value::Integer(row.try_get::<i64, _>(idx)?),
        ColumnKind::Unsigned => {
            let v = row.try_get::<u64, _>(idx)?;
            i64::try_from(v).map_or_else(|_| Value::Text(v.to_string()), Value::Integer)
        }
        ColumnKind::Boolean => Value::Integer(i64::from(row.try_get::<bool, _>(idx)?)),
        ColumnKind::Float => Value::Float(row.try_get::<f64, _>(idx)?),
        ColumnKind::Date => Value::Text(
            row.try_get::<chrono::NaiveDate, _>(idx)?
                .format("%Y-%m-%d")
                .to_string(),
        ),
        ColumnKind::DateTime => Value::Text(
            row.try_get::<chrono::NaiveDateTime, _>(idx)?
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
        ),
        ColumnKind::Text => match row.try_get_unchecked::<String, _>(idx) {
            Ok(s) => Value::Text(s),
            Err(_) => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(idx)?;
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
        },
    })
}
