//! Immutable records.

use crate::value::{Value, ValueError};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An immutable mapping from field name to [`Value`].
///
/// Cloning is cheap (the fields are shared behind an `Arc`). Every change
/// produces a new record; the original is never touched. Fields iterate in
/// ascending name order.
#[derive(Clone, PartialEq, Default)]
pub struct Record {
    fields: Arc<BTreeMap<String, Value>>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a record from `(name, value)` pairs. Later duplicates win.
    pub fn from_fields<K, V, I>(fields: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect()
    }

    /// Parses a record from a JSON object.
    pub fn from_json_str(json: &str) -> Result<Self, ValueError> {
        let value: Value =
            serde_json::from_str(json).map_err(|e| ValueError::Json(e.to_string()))?;
        value.into_record()
    }

    /// Serializes the record as a single-line JSON object.
    pub fn to_json_string(&self) -> Result<String, ValueError> {
        serde_json::to_string(self).map_err(|e| ValueError::Json(e.to_string()))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Looks up a dotted path such as `customer.name`.
    ///
    /// Returns `None` when any segment is missing or an intermediate value is
    /// not a record.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.get(segments.next()?)?;
        for segment in segments {
            current = current.as_record()?.get(segment)?;
        }
        Some(current)
    }

    /// Returns a numeric field, failing if it is missing or not a number.
    pub fn number(&self, field: &str) -> Result<f64, ValueError> {
        let value = self
            .get(field)
            .ok_or_else(|| ValueError::Missing(field.to_string()))?;
        value.as_f64().ok_or_else(|| ValueError::TypeMismatch {
            field: field.to_string(),
            expected: "number",
            found: value.type_name(),
        })
    }

    /// Returns a string field, failing if it is missing or not a string.
    pub fn str(&self, field: &str) -> Result<&str, ValueError> {
        let value = self
            .get(field)
            .ok_or_else(|| ValueError::Missing(field.to_string()))?;
        value.as_str().ok_or_else(|| ValueError::TypeMismatch {
            field: field.to_string(),
            expected: "string",
            found: value.type_name(),
        })
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Returns a new record with `field` set to `value`.
    pub fn with_field(&self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut fields = (*self.fields).clone();
        fields.insert(field.into(), value.into());
        Self::from(fields)
    }

    /// Returns a new record without `field`.
    pub fn without_field(&self, field: &str) -> Self {
        if !self.contains(field) {
            return self.clone();
        }
        let mut fields = (*self.fields).clone();
        fields.remove(field);
        Self::from(fields)
    }

    /// Returns the owned field map, cloning only if the record is shared.
    pub fn into_fields(self) -> BTreeMap<String, Value> {
        Arc::try_unwrap(self.fields).unwrap_or_else(|shared| (*shared).clone())
    }
}

impl From<BTreeMap<String, Value>> for Record {
    fn from(fields: BTreeMap<String, Value>) -> Self {
        Self {
            fields: Arc::new(fields),
        }
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self::from(iter.into_iter().collect::<BTreeMap<_, _>>())
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.fields.iter()).finish()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.fields.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BTreeMap::<String, Value>::deserialize(deserializer).map(Self::from)
    }
}
