use super::filter::compare_values;
use crate::error::{ModelDbError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Ordered list of sort keys, written as `{ "field": 1 | -1 }`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct Sort(pub Vec<(String, SortDirection)>);

impl Sort {
    pub fn asc(field: &str) -> Self {
        Sort(vec![(field.to_string(), SortDirection::Ascending)])
    }

    pub fn desc(field: &str) -> Self {
        Sort(vec![(field.to_string(), SortDirection::Descending)])
    }

    pub fn then(mut self, field: &str, direction: SortDirection) -> Self {
        self.0.push((field.to_string(), direction));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse a sort document. Directions may be `1`, `-1`, `"asc"` or `"desc"`.
    pub fn parse(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Sort::default()),
            Value::Object(map) => map,
            _ => {
                return Err(ModelDbError::Query(
                    "Sort must be an object of field: 1 | -1".into(),
                ))
            }
        };
        let mut keys = Vec::with_capacity(map.len());
        for (field, direction) in map {
            let direction = match direction {
                Value::Number(n) if n.as_f64() == Some(1.0) => SortDirection::Ascending,
                Value::Number(n) if n.as_f64() == Some(-1.0) => SortDirection::Descending,
                Value::String(s) if matches!(s.as_str(), "asc" | "ascending") => {
                    SortDirection::Ascending
                }
                Value::String(s) if matches!(s.as_str(), "desc" | "descending") => {
                    SortDirection::Descending
                }
                other => {
                    return Err(ModelDbError::Query(format!(
                        "Invalid sort direction for '{field}': {other}"
                    )))
                }
            };
            keys.push((field.clone(), direction));
        }
        Ok(Sort(keys))
    }

    /// Compare two items by this sort, reading fields through `get`.
    /// Missing fields sort as null.
    pub fn compare<T>(
        &self,
        a: &T,
        b: &T,
        get: impl for<'a> Fn(&'a T, &str) -> Option<&'a Value>,
    ) -> Ordering {
        for (field, direction) in &self.0 {
            let left = get(a, field).unwrap_or(&Value::Null);
            let right = get(b, field).unwrap_or(&Value::Null);
            let ord = compare_values(left, right);
            let ord = match direction {
                SortDirection::Ascending => ord,
                SortDirection::Descending => ord.reverse(),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Stable sort of `items`; ties keep their incoming order.
    pub fn apply<T>(&self, items: &mut [T], get: impl for<'a> Fn(&'a T, &str) -> Option<&'a Value>) {
        if self.is_empty() {
            return;
        }
        items.sort_by(|a, b| self.compare(a, b, &get));
    }
}

impl TryFrom<Value> for Sort {
    type Error = ModelDbError;

    fn try_from(value: Value) -> Result<Self> {
        Sort::parse(&value)
    }
}

impl From<Sort> for Value {
    fn from(sort: Sort) -> Value {
        let mut map = Map::new();
        for (field, direction) in sort.0 {
            let n = match direction {
                SortDirection::Ascending => 1,
                SortDirection::Descending => -1,
            };
            map.insert(field, Value::from(n));
        }
        Value::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field<'a>(v: &'a Value, name: &str) -> Option<&'a Value> {
        v.get(name)
    }

    #[test]
    fn test_parse_preserves_key_order() {
        let sort = Sort::parse(&json!({ "role": 1, "createdAt": -1 })).unwrap();
        assert_eq!(
            sort,
            Sort::asc("role").then("createdAt", SortDirection::Descending)
        );
    }

    #[test]
    fn test_parse_rejects_bad_direction() {
        assert!(Sort::parse(&json!({ "a": 2 })).is_err());
        assert!(Sort::parse(&json!(["a"])).is_err());
    }

    #[test]
    fn test_descending_with_missing_values_last() {
        let mut items = vec![json!({ "n": 1 }), json!({}), json!({ "n": 3 })];
        Sort::desc("n").apply(&mut items, field);
        assert_eq!(items, vec![json!({ "n": 3 }), json!({ "n": 1 }), json!({})]);
    }

    #[test]
    fn test_multi_key_and_stability() {
        let mut items = vec![
            json!({ "g": "b", "i": 0 }),
            json!({ "g": "a", "i": 1 }),
            json!({ "g": "b", "i": 2 }),
            json!({ "g": "a", "i": 3 }),
        ];
        Sort::asc("g").apply(&mut items, field);
        let order: Vec<i64> = items.iter().map(|v| v["i"].as_i64().unwrap()).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_serde_shape() {
        let sort: Sort = serde_json::from_value(json!({ "createdAt": -1 })).unwrap();
        assert_eq!(sort, Sort::desc("createdAt"));
        assert_eq!(serde_json::to_value(&sort).unwrap(), json!({ "createdAt": -1 }));
    }
}
