use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type Document = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    Increment(i64),
    ServerTimestamp,
}

/// A single field write. `field` may be a dotted path such as
/// `companyWise.acme-2025.placed`; missing intermediate objects are created.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldWrite {
    pub field: String,
    pub value: FieldValue,
}

impl FieldWrite {
    pub fn value(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: FieldValue::Value(value.into()),
        }
    }

    pub fn increment(field: impl Into<String>, delta: i64) -> Self {
        Self {
            field: field.into(),
            value: FieldValue::Increment(delta),
        }
    }

    pub fn server_timestamp(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: FieldValue::ServerTimestamp,
        }
    }
}

/// Outcome of a clamped add on a single numeric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClampedWrite {
    /// `None` when the record did not exist before the call.
    pub previous: Option<i64>,
    pub current: i64,
    pub written: bool,
}

pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn apply_fields(doc: &mut Document, fields: &[FieldWrite], now: &str) {
    for write in fields {
        let resolved = match &write.value {
            FieldValue::Value(value) => value.clone(),
            FieldValue::ServerTimestamp => Value::String(now.to_string()),
            FieldValue::Increment(delta) => {
                let current = lookup(doc, &write.field).and_then(Value::as_i64).unwrap_or(0);
                Value::from(current + delta)
            }
        };
        assign(doc, &write.field, resolved);
    }
}

pub fn lookup<'a>(doc: &'a Document, field: &str) -> Option<&'a Value> {
    let mut segments = field.split('.');
    let first = segments.next()?;
    let mut current = doc.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn assign(doc: &mut Document, field: &str, value: Value) {
    let mut segments: Vec<&str> = field.split('.').collect();
    let Some(last) = segments.pop() else {
        return;
    };

    let mut target = doc;
    for segment in segments {
        let slot = target
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            return;
        };
        target = map;
    }
    target.insert(last.to_string(), value);
}

/// Decides the result of adding `delta` to `field`, floored at zero.
///
/// A missing record is created with `max(0, delta)`. When the record exists
/// and both the old and new values are zero the write is skipped.
pub fn plan_clamped_add(existing: Option<&Document>, field: &str, delta: i64) -> ClampedWrite {
    match existing {
        None => ClampedWrite {
            previous: None,
            current: delta.max(0),
            written: true,
        },
        Some(doc) => {
            let previous = lookup(doc, field).and_then(Value::as_i64).unwrap_or(0);
            let current = (previous + delta).max(0);
            ClampedWrite {
                previous: Some(previous),
                current,
                written: !(current == previous && previous == 0),
            }
        }
    }
}
