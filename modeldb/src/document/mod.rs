// Document shapes - stored records, typed views and field-path helpers

use crate::schema::AutoIdStrategy;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const ID_FIELD: &str = "_id";
pub const CREATED_AT_FIELD: &str = "createdAt";
pub const UPDATED_AT_FIELD: &str = "updatedAt";

/// Field map of a document, in insertion order.
pub type DocumentData = Map<String, Value>;

/// A document as the driver stores it. `data` always carries `_id`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: DocumentData,
}

impl StoredDocument {
    pub fn new(id: String, data: DocumentData) -> Self {
        StoredDocument { id, data }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.data)
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.data, path)
    }
}

/// A loaded document with implicit fields and typed data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(rename = "updatedAt", default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub data: T,
}

/// Generate a fresh document ID with the given strategy
pub fn generate_id(strategy: AutoIdStrategy) -> String {
    match strategy {
        AutoIdStrategy::Ulid => ulid::Ulid::new().to_string().to_lowercase(),
        AutoIdStrategy::Uuid => uuid::Uuid::new_v4().to_string(),
        AutoIdStrategy::Nanoid => nanoid::nanoid!(),
    }
}

/// Current time in the stored timestamp format (RFC 3339, millisecond precision, UTC).
/// Strings in this format order the same way the instants do.
pub fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Resolve a dotted path (`address.city`, `tags.0`) inside a document.
pub fn get_path<'a>(data: &'a DocumentData, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = data.get(first)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Same as [`get_path`] for a value that may or may not be an object.
pub fn get_value_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => get_path(map, path),
        _ => None,
    }
}

/// Set a dotted path, creating intermediate objects. Fails when an
/// intermediate segment exists and is not an object.
pub fn set_path(data: &mut DocumentData, path: &str, value: Value) -> crate::Result<()> {
    let mut segments: Vec<&str> = path.split('.').collect();
    let last = segments.pop().unwrap_or(path);
    let mut current = data;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry {
            Value::Object(map) => map,
            _ => {
                return Err(crate::ModelDbError::Query(format!(
                    "Cannot create field '{last}' in path '{path}': '{segment}' is not an object"
                )))
            }
        };
    }
    current.insert(last.to_string(), value);
    Ok(())
}

/// Remove a dotted path. Returns the removed value, if any.
pub fn remove_path(data: &mut DocumentData, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => data.remove(path),
        Some((head, rest)) => match data.get_mut(head)? {
            Value::Object(map) => remove_path(map, rest),
            _ => None,
        },
    }
}

/// Mutable access to a dotted path.
pub fn get_path_mut<'a>(data: &'a mut DocumentData, path: &str) -> Option<&'a mut Value> {
    match path.split_once('.') {
        None => data.get_mut(path),
        Some((head, rest)) => match data.get_mut(head)? {
            Value::Object(map) => get_path_mut(map, rest),
            _ => None,
        },
    }
}
