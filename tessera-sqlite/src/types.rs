//! Conversions between engine values and SQLite values.

use rusqlite::types::{Value as SqlValue, ValueRef};
use serde_json::Value as JsonValue;
use tessera_query::{Row, Value};

/// Convert a bound parameter to a SQLite value.
///
/// Booleans become integers; JSON and lists are stored as JSON text.
pub fn to_sqlite(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(f) => SqlValue::Real(*f),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Json(j) => SqlValue::Text(j.to_string()),
        Value::List(list) => {
            let items: Vec<JsonValue> = list.iter().map(to_json).collect();
            SqlValue::Text(JsonValue::Array(items).to_string())
        }
    }
}

fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        Value::String(s) => JsonValue::String(s.clone()),
        Value::Json(j) => j.clone(),
        Value::List(list) => JsonValue::Array(list.iter().map(to_json).collect()),
    }
}

/// Convert a SQLite value to JSON.
///
/// Text is returned as is; blobs that are not UTF-8 become byte arrays.
pub fn from_sqlite_value(value: ValueRef<'_>) -> JsonValue {
    match value {
        ValueRef::Null => JsonValue::Null,
        ValueRef::Integer(i) => JsonValue::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        ValueRef::Text(bytes) => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => match std::str::from_utf8(bytes) {
            Ok(s) => JsonValue::String(s.to_string()),
            Err(_) => JsonValue::Array(bytes.iter().map(|b| JsonValue::from(*b)).collect()),
        },
    }
}

/// Read a result row into a map keyed by column name.
pub(crate) fn read_row(row: &rusqlite::Row<'_>, columns: &[String]) -> Row {
    let mut map = Row::new();
    for (i, column) in columns.iter().enumerate() {
        let value = row.get_ref(i).map(from_sqlite_value).unwrap_or(JsonValue::Null);
        map.insert(column.clone(), value);
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_to_sqlite() {
        assert!(matches!(to_sqlite(&Value::Null), SqlValue::Null));
        assert!(matches!(to_sqlite(&Value::Bool(true)), SqlValue::Integer(1)));
        assert!(matches!(to_sqlite(&Value::Int(42)), SqlValue::Integer(42)));
        assert!(matches!(to_sqlite(&Value::from("hi")), SqlValue::Text(s) if s == "hi"));
        assert!(
            matches!(to_sqlite(&Value::List(vec![Value::Int(1), Value::Bool(false)])), SqlValue::Text(s) if s == "[1,false]")
        );
    }

    #[test]
    fn test_from_sqlite_value() {
        assert_eq!(from_sqlite_value(ValueRef::Null), JsonValue::Null);
        assert_eq!(from_sqlite_value(ValueRef::Integer(7)), json!(7));
        assert_eq!(from_sqlite_value(ValueRef::Text(b"[1]")), json!("[1]"));
        assert_eq!(from_sqlite_value(ValueRef::Blob(&[0xff, 0x00])), json!([255, 0]));
    }
}
