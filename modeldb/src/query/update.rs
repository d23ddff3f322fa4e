use super::filter::{values_equal, Filter};
use crate::document::{get_path_mut, remove_path, set_path, DocumentData};
use crate::error::{ModelDbError, Result};
use serde_json::{Map, Value};

/// A compiled update document.
///
/// A plain object with no `$` keys is treated as `$set` of its fields.
#[derive(Debug, Clone)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

#[derive(Debug, Clone)]
enum UpdateOp {
    Set(String, Value),
    Unset(String),
    Inc(String, f64),
    Push(String, Vec<Value>),
    AddToSet(String, Vec<Value>),
    Pull(String, PullCondition),
}

#[derive(Debug, Clone)]
enum PullCondition {
    Equals(Value),
    Matches(Filter),
}

impl Update {
    pub fn parse(update: &Value) -> Result<Self> {
        let map = match update {
            Value::Object(map) if !map.is_empty() => map,
            _ => {
                return Err(ModelDbError::Query(
                    "Update must be a non-empty object".into(),
                ))
            }
        };

        let operator_keys = map.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            let ops = map
                .iter()
                .map(|(path, value)| UpdateOp::Set(path.clone(), value.clone()))
                .collect();
            return Ok(Update { ops });
        }
        if operator_keys != map.len() {
            return Err(ModelDbError::Query(
                "Update cannot mix operators and plain fields".into(),
            ));
        }

        let mut ops = Vec::new();
        for (op, arg) in map {
            let fields = arg.as_object().ok_or_else(|| {
                ModelDbError::Query(format!("{op} expects an object of field paths"))
            })?;
            for (path, value) in fields {
                let parsed = match op.as_str() {
                    "$set" => UpdateOp::Set(path.clone(), value.clone()),
                    "$unset" => UpdateOp::Unset(path.clone()),
                    "$inc" => UpdateOp::Inc(
                        path.clone(),
                        value.as_f64().ok_or_else(|| {
                            ModelDbError::Query(format!("$inc on '{path}' expects a number"))
                        })?,
                    ),
                    "$push" => UpdateOp::Push(path.clone(), each_values(value)),
                    "$addToSet" => UpdateOp::AddToSet(path.clone(), each_values(value)),
                    "$pull" => UpdateOp::Pull(path.clone(), pull_condition(value)?),
                    other => {
                        return Err(ModelDbError::Query(format!(
                            "Unknown update operator: {other}"
                        )))
                    }
                };
                ops.push(parsed);
            }
        }
        Ok(Update { ops })
    }

    /// Paths this update writes, in order.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.ops.iter().map(|op| match op {
            UpdateOp::Set(p, _)
            | UpdateOp::Unset(p)
            | UpdateOp::Inc(p, _)
            | UpdateOp::Push(p, _)
            | UpdateOp::AddToSet(p, _)
            | UpdateOp::Pull(p, _) => p.as_str(),
        })
    }

    pub fn apply(&self, data: &mut DocumentData) -> Result<()> {
        for op in &self.ops {
            match op {
                UpdateOp::Set(path, value) => set_path(data, path, value.clone())?,
                UpdateOp::Unset(path) => {
                    remove_path(data, path);
                }
                UpdateOp::Inc(path, by) => {
                    let next = match get_path_mut(data, path) {
                        None | Some(Value::Null) => number(*by),
                        Some(Value::Number(current)) => add_numbers(current, *by),
                        Some(other) => {
                            return Err(ModelDbError::Query(format!(
                                "Cannot apply $inc to non-numeric field '{path}' ({other})"
                            )))
                        }
                    };
                    set_path(data, path, next)?;
                }
                UpdateOp::Push(path, values) => {
                    let list = array_at(data, path)?;
                    list.extend(values.iter().cloned());
                }
                UpdateOp::AddToSet(path, values) => {
                    let list = array_at(data, path)?;
                    for value in values {
                        if !list.iter().any(|existing| values_equal(existing, value)) {
                            list.push(value.clone());
                        }
                    }
                }
                UpdateOp::Pull(path, condition) => {
                    if let Some(Value::Array(list)) = get_path_mut(data, path) {
                        list.retain(|item| !condition.matches(item));
                    }
                }
            }
        }
        Ok(())
    }
}

impl PullCondition {
    fn matches(&self, item: &Value) -> bool {
        match self {
            PullCondition::Equals(target) => values_equal(item, target),
            PullCondition::Matches(filter) => match item {
                Value::Object(_) => filter.matches_value(item),
                // Scalars are tested by wrapping them as a single field
                other => {
                    let mut wrapper = Map::new();
                    wrapper.insert("value".to_string(), other.clone());
                    filter.matches(&wrapper)
                }
            },
        }
    }
}

fn pull_condition(value: &Value) -> Result<PullCondition> {
    match value {
        Value::Object(map) if !map.is_empty() && map.keys().all(|k| k.starts_with('$')) => {
            // Operator form such as { $gt: 3 } applies to the element itself
            let mut wrapped = Map::new();
            wrapped.insert("value".to_string(), value.clone());
            Ok(PullCondition::Matches(Filter::parse(&Value::Object(wrapped))?))
        }
        Value::Object(_) => Ok(PullCondition::Matches(Filter::parse(value)?)),
        other => Ok(PullCondition::Equals(other.clone())),
    }
}

fn each_values(value: &Value) -> Vec<Value> {
    match value.get("$each") {
        Some(Value::Array(items)) => items.clone(),
        _ => vec![value.clone()],
    }
}

fn array_at<'a>(data: &'a mut DocumentData, path: &str) -> Result<&'a mut Vec<Value>> {
    if matches!(get_path_mut(data, path), None | Some(Value::Null)) {
        set_path(data, path, Value::Array(Vec::new()))?;
    }
    match get_path_mut(data, path) {
        Some(Value::Array(list)) => Ok(list),
        _ => Err(ModelDbError::Query(format!(
            "Cannot push to non-array field '{path}'"
        ))),
    }
}

fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
        Value::from(n as i64)
    } else {
        Value::from(n)
    }
}

fn add_numbers(current: &serde_json::Number, by: f64) -> Value {
    match (current.as_i64(), by.fract() == 0.0) {
        (Some(i), true) => match i.checked_add(by as i64) {
            Some(sum) => Value::from(sum),
            None => Value::from(i as f64 + by),
        },
        _ => Value::from(current.as_f64().unwrap_or(0.0) + by),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(doc: Value, update: Value) -> Value {
        let mut data = match doc {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        };
        Update::parse(&update).unwrap().apply(&mut data).unwrap();
        Value::Object(data)
    }

    #[test]
    fn test_plain_object_is_set() {
        let out = run(json!({ "a": 1, "b": 2 }), json!({ "b": 3 }));
        assert_eq!(out, json!({ "a": 1, "b": 3 }));
    }

    #[test]
    fn test_set_unset_inc() {
        let out = run(
            json!({ "a": 1, "n": 2, "gone": true }),
            json!({ "$set": { "p.q": "x" }, "$unset": { "gone": "" }, "$inc": { "n": 3, "m": 1 } }),
        );
        assert_eq!(out, json!({ "a": 1, "n": 5, "p": { "q": "x" }, "m": 1 }));
    }

    #[test]
    fn test_inc_float() {
        let out = run(json!({ "n": 1 }), json!({ "$inc": { "n": 0.5 } }));
        assert_eq!(out, json!({ "n": 1.5 }));
    }

    #[test]
    fn test_push_add_to_set_pull() {
        let out = run(
            json!({ "tags": ["a"] }),
            json!({ "$push": { "tags": { "$each": ["b", "c"] } } }),
        );
        assert_eq!(out["tags"], json!(["a", "b", "c"]));

        let out = run(out, json!({ "$addToSet": { "tags": "a", "extra": "z" } }));
        assert_eq!(out["tags"], json!(["a", "b", "c"]));
        assert_eq!(out["extra"], json!(["z"]));

        let out = run(out, json!({ "$pull": { "tags": "b" } }));
        assert_eq!(out["tags"], json!(["a", "c"]));
    }

    #[test]
    fn test_pull_with_condition() {
        let out = run(json!({ "n": [1, 5, 10] }), json!({ "$pull": { "n": { "$gte": 5 } } }));
        assert_eq!(out["n"], json!([1]));
    }

    #[test]
    fn test_invalid_updates() {
        assert!(Update::parse(&json!({})).is_err());
        assert!(Update::parse(&json!({ "$set": { "a": 1 }, "b": 2 })).is_err());
        assert!(Update::parse(&json!({ "$rename": { "a": "b" } })).is_err());
        assert!(Update::parse(&json!({ "$inc": { "a": "x" } })).is_err());

        let mut data = match json!({ "a": "text" }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let update = Update::parse(&json!({ "$inc": { "a": 1 } })).unwrap();
        assert!(update.apply(&mut data).is_err());
    }

    #[test]
    fn test_paths() {
        let update = Update::parse(&json!({ "$set": { "a": 1 }, "$unset": { "b": 1 } })).unwrap();
        assert_eq!(update.paths().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
