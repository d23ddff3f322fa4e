use crate::document::{get_path, DocumentData};
use crate::error::{ModelDbError, Result};
use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// A compiled filter document.
///
/// Accepts the query-document dialect callers already use: field equality,
/// comparison operators and `$and` / `$or` / `$nor`.
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Nor(Vec<Filter>),
    Field {
        path: String,
        conditions: Vec<Condition>,
    },
}

#[derive(Debug, Clone)]
pub enum Condition {
    Eq(Value),
    Ne(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
    Nin(Vec<Value>),
    Exists(bool),
    Regex(Regex),
    Size(usize),
    Not(Vec<Condition>),
}

impl Filter {
    /// Match-everything filter
    pub fn all() -> Self {
        Filter::And(Vec::new())
    }

    /// Compile a filter document. `null` and `{}` match every document.
    pub fn parse(filter: &Value) -> Result<Self> {
        match filter {
            Value::Null => Ok(Filter::all()),
            Value::Object(map) => parse_object(map),
            other => Err(ModelDbError::Query(format!(
                "Filter must be an object, got {}",
                json_type(other)
            ))),
        }
    }

    pub fn matches(&self, doc: &DocumentData) -> bool {
        match self {
            Filter::And(parts) => parts.iter().all(|f| f.matches(doc)),
            Filter::Or(parts) => parts.iter().any(|f| f.matches(doc)),
            Filter::Nor(parts) => !parts.iter().any(|f| f.matches(doc)),
            Filter::Field { path, conditions } => {
                let value = get_path(doc, path);
                conditions.iter().all(|c| c.matches(value))
            }
        }
    }

    pub fn matches_value(&self, value: &Value) -> bool {
        match value {
            Value::Object(map) => self.matches(map),
            _ => false,
        }
    }

    /// Top-level equality terms, used to seed a document on upsert.
    pub fn equality_seed(&self) -> DocumentData {
        let mut seed = Map::new();
        self.collect_equalities(&mut seed);
        seed
    }

    fn collect_equalities(&self, seed: &mut DocumentData) {
        match self {
            Filter::And(parts) => parts.iter().for_each(|p| p.collect_equalities(seed)),
            Filter::Field { path, conditions } if !path.contains('.') => {
                for condition in conditions {
                    if let Condition::Eq(value) = condition {
                        seed.insert(path.clone(), value.clone());
                    }
                }
            }
            _ => {}
        }
    }
}

fn parse_object(map: &Map<String, Value>) -> Result<Filter> {
    let mut parts = Vec::with_capacity(map.len());
    for (key, value) in map {
        let part = match key.as_str() {
            "$and" => Filter::And(parse_list(key, value)?),
            "$or" => Filter::Or(parse_list(key, value)?),
            "$nor" => Filter::Nor(parse_list(key, value)?),
            op if op.starts_with('$') => {
                return Err(ModelDbError::Query(format!(
                    "Unknown top-level operator: {op}"
                )))
            }
            path => Filter::Field {
                path: path.to_string(),
                conditions: parse_conditions(path, value)?,
            },
        };
        parts.push(part);
    }
    Ok(if parts.len() == 1 {
        parts.remove(0)
    } else {
        Filter::And(parts)
    })
}

fn parse_list(op: &str, value: &Value) -> Result<Vec<Filter>> {
    match value {
        Value::Array(items) if !items.is_empty() => items.iter().map(Filter::parse).collect(),
        _ => Err(ModelDbError::Query(format!(
            "{op} expects a non-empty array of filters"
        ))),
    }
}

fn is_operator_object(value: &Value) -> bool {
    match value {
        Value::Object(map) => !map.is_empty() && map.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

fn parse_conditions(path: &str, value: &Value) -> Result<Vec<Condition>> {
    if !is_operator_object(value) {
        return Ok(vec![Condition::Eq(value.clone())]);
    }
    let Value::Object(ops) = value else {
        return Ok(vec![Condition::Eq(value.clone())]);
    };

    let regex_options = ops.get("$options").and_then(Value::as_str).unwrap_or("");
    let mut conditions = Vec::with_capacity(ops.len());
    for (op, arg) in ops {
        let condition = match op.as_str() {
            "$eq" => Condition::Eq(arg.clone()),
            "$ne" => Condition::Ne(arg.clone()),
            "$gt" => Condition::Gt(arg.clone()),
            "$gte" => Condition::Gte(arg.clone()),
            "$lt" => Condition::Lt(arg.clone()),
            "$lte" => Condition::Lte(arg.clone()),
            "$in" => Condition::In(expect_array(path, op, arg)?),
            "$nin" => Condition::Nin(expect_array(path, op, arg)?),
            "$exists" => Condition::Exists(truthy(arg)),
            "$size" => Condition::Size(arg.as_u64().ok_or_else(|| {
                ModelDbError::Query(format!("{path}: $size expects a non-negative integer"))
            })? as usize),
            "$regex" => {
                let pattern = arg.as_str().ok_or_else(|| {
                    ModelDbError::Query(format!("{path}: $regex expects a string"))
                })?;
                Condition::Regex(compile_regex(pattern, regex_options)?)
            }
            "$options" => continue,
            "$not" => Condition::Not(parse_conditions(path, arg)?),
            other => {
                return Err(ModelDbError::Query(format!(
                    "{path}: unknown operator {other}"
                )))
            }
        };
        conditions.push(condition);
    }
    Ok(conditions)
}

fn expect_array(path: &str, op: &str, arg: &Value) -> Result<Vec<Value>> {
    arg.as_array()
        .cloned()
        .ok_or_else(|| ModelDbError::Query(format!("{path}: {op} expects an array")))
}

fn compile_regex(pattern: &str, options: &str) -> Result<Regex> {
    let flags: String = options
        .chars()
        .filter(|c| matches!(c, 'i' | 'm' | 's' | 'x'))
        .collect();
    let source = if flags.is_empty() {
        pattern.to_string()
    } else {
        format!("(?{flags}){pattern}")
    };
    Regex::new(&source).map_err(|e| ModelDbError::Query(format!("Invalid $regex: {e}")))
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

impl Condition {
    fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Condition::Eq(target) => eq_matches(value, target),
            Condition::Ne(target) => !eq_matches(value, target),
            Condition::Gt(target) => cmp_matches(value, target, |o| o == Ordering::Greater),
            Condition::Gte(target) => cmp_matches(value, target, |o| o != Ordering::Less),
            Condition::Lt(target) => cmp_matches(value, target, |o| o == Ordering::Less),
            Condition::Lte(target) => cmp_matches(value, target, |o| o != Ordering::Greater),
            Condition::In(targets) => targets.iter().any(|t| eq_matches(value, t)),
            Condition::Nin(targets) => !targets.iter().any(|t| eq_matches(value, t)),
            Condition::Exists(expected) => value.is_some() == *expected,
            Condition::Regex(re) => candidates(value).any(|v| v.as_str().is_some_and(|s| re.is_match(s))),
            Condition::Size(len) => matches!(value, Some(Value::Array(items)) if items.len() == *len),
            Condition::Not(inner) => !inner.iter().all(|c| c.matches(value)),
        }
    }
}

/// The value itself plus, for arrays, each element.
fn candidates(value: Option<&Value>) -> Box<dyn Iterator<Item = &Value> + '_> {
    match value {
        None => Box::new(std::iter::empty()),
        Some(whole @ Value::Array(items)) => Box::new(std::iter::once(whole).chain(items.iter())),
        Some(v) => Box::new(std::iter::once(v)),
    }
}

fn eq_matches(value: Option<&Value>, target: &Value) -> bool {
    match value {
        // A missing field equals null
        None => target.is_null(),
        Some(_) => candidates(value).any(|v| values_equal(v, target)),
    }
}

fn cmp_matches(value: Option<&Value>, target: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    candidates(value).any(|v| {
        type_rank(v) == type_rank(target) && accept(compare_values(v, target))
    })
}

/// Structural equality where numbers compare by value (`1 == 1.0`).
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(l, r)| values_equal(l, r))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| values_equal(v, other)))
        }
        _ => a == b,
    }
}

/// Sort rank of a value's type: null < numbers < strings < objects < arrays < booleans.
pub fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}

/// Total order over JSON values, ranking types first.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y) {
                let ord = compare_values(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y) {
                let ord = lk.cmp(rk).then_with(|| compare_values(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> DocumentData {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn check(filter: Value, document: Value) -> bool {
        Filter::parse(&filter).unwrap().matches(&doc(document))
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        assert!(check(json!({}), json!({ "a": 1 })));
        assert!(Filter::parse(&Value::Null).unwrap().matches(&doc(json!({}))));
    }

    #[test]
    fn test_equality_and_missing_fields() {
        assert!(check(json!({ "username": "a" }), json!({ "username": "a" })));
        assert!(!check(json!({ "username": "a" }), json!({ "username": "b" })));
        assert!(check(json!({ "bio": null }), json!({ "username": "a" })));
        assert!(check(json!({ "n": 1 }), json!({ "n": 1.0 })));
    }

    #[test]
    fn test_array_membership() {
        let d = json!({ "tags": ["rust", "db"] });
        assert!(check(json!({ "tags": "rust" }), d.clone()));
        assert!(check(json!({ "tags": ["rust", "db"] }), d.clone()));
        assert!(!check(json!({ "tags": "go" }), d.clone()));
        assert!(check(json!({ "tags": { "$size": 2 } }), d));
    }

    #[test]
    fn test_comparisons_respect_type_brackets() {
        let d = json!({ "age": 30, "name": "zed" });
        assert!(check(json!({ "age": { "$gt": 18, "$lte": 30 } }), d.clone()));
        assert!(!check(json!({ "age": { "$lt": 30 } }), d.clone()));
        assert!(!check(json!({ "name": { "$gt": 5 } }), d.clone()));
        assert!(check(json!({ "name": { "$gte": "a" } }), d));
    }

    #[test]
    fn test_in_nin_ne_exists() {
        let d = json!({ "role": "admin" });
        assert!(check(json!({ "role": { "$in": ["admin", "user"] } }), d.clone()));
        assert!(!check(json!({ "role": { "$nin": ["admin"] } }), d.clone()));
        assert!(check(json!({ "role": { "$ne": "guest" } }), d.clone()));
        assert!(check(json!({ "avatar": { "$exists": false } }), d.clone()));
        assert!(!check(json!({ "role": { "$exists": false } }), d));
    }

    #[test]
    fn test_regex_with_options() {
        let d = json!({ "email": "Alice@Example.com" });
        assert!(check(json!({ "email": { "$regex": "^alice", "$options": "i" } }), d.clone()));
        assert!(!check(json!({ "email": { "$regex": "^alice" } }), d));
    }

    #[test]
    fn test_logical_operators() {
        let d = json!({ "a": 1, "b": 2 });
        assert!(check(json!({ "$or": [{ "a": 5 }, { "b": 2 }] }), d.clone()));
        assert!(!check(json!({ "$and": [{ "a": 1 }, { "b": 3 }] }), d.clone()));
        assert!(check(json!({ "$nor": [{ "a": 5 }] }), d.clone()));
        assert!(check(json!({ "a": { "$not": { "$gt": 3 } } }), d));
    }

    #[test]
    fn test_dotted_paths() {
        let d = json!({ "profile": { "city": "Paris" } });
        assert!(check(json!({ "profile.city": "Paris" }), d));
    }

    #[test]
    fn test_invalid_filters_rejected() {
        assert!(Filter::parse(&json!([1, 2])).is_err());
        assert!(Filter::parse(&json!({ "$where": "1" })).is_err());
        assert!(Filter::parse(&json!({ "a": { "$near": 1 } })).is_err());
        assert!(Filter::parse(&json!({ "$or": [] })).is_err());
        assert!(Filter::parse(&json!({ "a": { "$regex": "(" } })).is_err());
    }

    #[test]
    fn test_equality_seed() {
        let filter = Filter::parse(&json!({
            "username": "a",
            "age": { "$gt": 3 },
            "role": { "$eq": "user" }
        }))
        .unwrap();
        let seed = filter.equality_seed();
        assert_eq!(Value::Object(seed), json!({ "username": "a", "role": "user" }));
    }

    #[test]
    fn test_compare_values_orders_types() {
        assert_eq!(compare_values(&json!(null), &json!(1)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!("a")), Ordering::Less);
        assert_eq!(compare_values(&json!("b"), &json!("a")), Ordering::Greater);
        assert_eq!(compare_values(&json!(1.5), &json!(1)), Ordering::Greater);
    }
}
