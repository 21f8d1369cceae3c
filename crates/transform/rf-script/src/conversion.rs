//! Record <-> Rhai value conversion.
//!
//! Numbers enter scripts as FLOAT so every arithmetic path stays in double
//! precision. On the way back both INT and FLOAT become `Value::Number`.

use rf_types::{Record, Value};
use rhai::{Array, Dynamic, Map};

/// Converts a record to a Rhai object map.
pub fn record_to_dynamic(record: &Record) -> Dynamic {
    let mut map = Map::new();
    for (name, value) in record.iter() {
        map.insert(name.into(), value_to_dynamic(value));
    }
    Dynamic::from_map(map)
}

/// Converts a single value to a Rhai value.
pub fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from(*b),
        Value::Number(n) => Dynamic::from(*n),
        Value::String(s) => Dynamic::from(s.clone()),
        Value::Record(r) => record_to_dynamic(r),
        Value::Sequence(items) => {
            Dynamic::from_array(items.iter().map(value_to_dynamic).collect::<Array>())
        }
    }
}

/// Converts a transform's return value.
///
/// `Ok(None)` is the drop signal (unit). `Err` names the offending type when
/// the value is neither a map nor unit, or when the map holds something that
/// has no record representation.
pub fn dynamic_to_record(result: Dynamic) -> Result<Option<Record>, String> {
    if result.is_unit() {
        return Ok(None);
    }
    if !result.is_map() {
        return Err(format!(
            "transform must return a map or () to drop the record, got {}",
            result.type_name()
        ));
    }
    match dynamic_to_value(result)? {
        Value::Record(record) => Ok(Some(record)),
        other => Err(format!("expected a map, got {}", other.type_name())),
    }
}

/// Converts a Rhai value to a record value.
pub fn dynamic_to_value(value: Dynamic) -> Result<Value, String> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    if let Ok(b) = value.as_bool() {
        return Ok(Value::Bool(b));
    }
    if let Ok(i) = value.as_int() {
        return Ok(Value::Number(i as f64));
    }
    if let Ok(f) = value.as_float() {
        return Ok(Value::Number(f));
    }
    if let Ok(c) = value.as_char() {
        return Ok(Value::String(c.to_string()));
    }
    if value.is_string() {
        return value
            .into_string()
            .map(Value::String)
            .map_err(|t| format!("unreadable string ({t})"));
    }
    if value.is_array() {
        let items = value
            .into_array()
            .map_err(|t| format!("unreadable array ({t})"))?;
        return items
            .into_iter()
            .map(dynamic_to_value)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Sequence);
    }
    if value.is_map() {
        let type_name = value.type_name();
        let map = value
            .try_cast::<Map>()
            .ok_or_else(|| format!("unreadable map ({type_name})"))?;
        return map
            .into_iter()
            .map(|(k, v)| dynamic_to_value(v).map(|v| (k.to_string(), v)))
            .collect::<Result<Record, _>>()
            .map(Value::Record);
    }
    Err(format!("unsupported value type '{}'", value.type_name()))
}
