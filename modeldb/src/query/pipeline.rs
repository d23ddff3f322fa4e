use super::filter::{compare_values, values_equal, Filter};
use super::projection::Projection;
use super::sort::Sort;
use crate::document::{get_value_path, set_path};
use crate::error::{ModelDbError, Result};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Run an aggregation pipeline over the documents of one collection.
///
/// Supported stages: `$match`, `$project`, `$sort`, `$skip`, `$limit`,
/// `$unwind`, `$group` and `$count`.
pub fn run_pipeline(mut rows: Vec<Value>, pipeline: &[Value]) -> Result<Vec<Value>> {
    for stage in pipeline {
        let (name, arg) = match stage.as_object() {
            Some(map) if map.len() == 1 => map.iter().next().ok_or_else(|| {
                ModelDbError::Query("Empty pipeline stage".into())
            })?,
            _ => {
                return Err(ModelDbError::Query(
                    "Each pipeline stage must be an object with exactly one key".into(),
                ))
            }
        };
        rows = match name.as_str() {
            "$match" => {
                let filter = Filter::parse(arg)?;
                rows.into_iter().filter(|r| filter.matches_value(r)).collect()
            }
            "$project" => project_stage(rows, arg)?,
            "$sort" => {
                let sort = Sort::parse(arg)?;
                sort.apply(&mut rows, get_value_path);
                rows
            }
            "$skip" => rows.into_iter().skip(count_arg(name, arg)?).collect(),
            "$limit" => rows.into_iter().take(count_arg(name, arg)?).collect(),
            "$unwind" => unwind_stage(rows, arg)?,
            "$group" => group_stage(rows, arg)?,
            "$count" => {
                let field = arg.as_str().filter(|s| !s.is_empty()).ok_or_else(|| {
                    ModelDbError::Query("$count expects a non-empty field name".into())
                })?;
                if rows.is_empty() {
                    Vec::new()
                } else {
                    let mut out = Map::new();
                    out.insert(field.to_string(), Value::from(rows.len()));
                    vec![Value::Object(out)]
                }
            }
            other => {
                return Err(ModelDbError::Query(format!(
                    "Unsupported pipeline stage: {other}"
                )))
            }
        };
    }
    Ok(rows)
}

fn count_arg(stage: &str, arg: &Value) -> Result<usize> {
    arg.as_u64()
        .map(|n| n as usize)
        .ok_or_else(|| ModelDbError::Query(format!("{stage} expects a non-negative integer")))
}

/// Evaluate an expression: `"$path"` reads a field, anything else is a literal
/// (objects are evaluated member by member).
fn eval(row: &Value, expr: &Value) -> Value {
    match expr {
        Value::String(s) if s.starts_with('$') => get_value_path(row, &s[1..])
            .cloned()
            .unwrap_or(Value::Null),
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), eval(row, v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

fn project_stage(rows: Vec<Value>, arg: &Value) -> Result<Vec<Value>> {
    let spec = arg
        .as_object()
        .ok_or_else(|| ModelDbError::Query("$project expects an object".into()))?;

    let computed: Vec<(&String, &Value)> = spec
        .iter()
        .filter(|(_, v)| !matches!(v, Value::Bool(_) | Value::Number(_)))
        .collect();
    if computed.is_empty() {
        let projection = Projection::parse(arg)?;
        return rows
            .into_iter()
            .map(|row| match (&projection, row) {
                (Some(p), Value::Object(map)) => p.apply(map).map(Value::Object),
                (_, row) => Ok(row),
            })
            .collect();
    }

    // Computed fields: keep flagged fields and evaluate the rest
    rows.into_iter()
        .map(|row| {
            let mut out = Map::new();
            let keep_id = !matches!(spec.get("_id"), Some(Value::Bool(false)))
                && !matches!(spec.get("_id"), Some(Value::Number(n)) if n.as_f64() == Some(0.0));
            if keep_id {
                if let Some(id) = row.get("_id") {
                    out.insert("_id".to_string(), id.clone());
                }
            }
            for (field, value) in spec {
                if field == "_id" && matches!(value, Value::Bool(_) | Value::Number(_)) {
                    continue;
                }
                let v = match value {
                    Value::Bool(true) => get_value_path(&row, field).cloned(),
                    Value::Number(n) if n.as_f64() != Some(0.0) => {
                        get_value_path(&row, field).cloned()
                    }
                    Value::Bool(false) | Value::Number(_) => None,
                    expr => Some(eval(&row, expr)),
                };
                if let Some(v) = v {
                    set_path(&mut out, field, v)?;
                }
            }
            Ok(Value::Object(out))
        })
        .collect()
}

fn unwind_stage(rows: Vec<Value>, arg: &Value) -> Result<Vec<Value>> {
    let path = arg
        .as_str()
        .and_then(|s| s.strip_prefix('$'))
        .ok_or_else(|| ModelDbError::Query("$unwind expects a \"$field\" path".into()))?;

    let mut out = Vec::new();
    for row in rows {
        let items = match get_value_path(&row, path) {
            Some(Value::Array(items)) => items.clone(),
            // Missing, null or empty arrays drop the row
            None | Some(Value::Null) => continue,
            Some(other) => vec![other.clone()],
        };
        for item in items {
            let mut copy = row.clone();
            if let Value::Object(map) = &mut copy {
                set_path(map, path, item)?;
            }
            out.push(copy);
        }
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Accumulator {
    Sum,
    Avg,
    Min,
    Max,
    First,
    Last,
    Push,
}

struct GroupState {
    key: Value,
    values: Vec<Vec<Value>>,
}

fn group_stage(rows: Vec<Value>, arg: &Value) -> Result<Vec<Value>> {
    let spec = arg
        .as_object()
        .ok_or_else(|| ModelDbError::Query("$group expects an object".into()))?;
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| ModelDbError::Query("$group requires an _id expression".into()))?;

    let mut fields: Vec<(String, Accumulator, Value)> = Vec::new();
    for (name, def) in spec.iter().filter(|(k, _)| k.as_str() != "_id") {
        let (op, expr) = match def.as_object() {
            Some(map) if map.len() == 1 => map.iter().next().ok_or_else(|| {
                ModelDbError::Query(format!("$group field '{name}' is empty"))
            })?,
            _ => {
                return Err(ModelDbError::Query(format!(
                    "$group field '{name}' must be a single accumulator object"
                )))
            }
        };
        let acc = match op.as_str() {
            "$sum" => Accumulator::Sum,
            "$avg" => Accumulator::Avg,
            "$min" => Accumulator::Min,
            "$max" => Accumulator::Max,
            "$first" => Accumulator::First,
            "$last" => Accumulator::Last,
            "$push" => Accumulator::Push,
            other => {
                return Err(ModelDbError::Query(format!(
                    "Unsupported accumulator {other} in '{name}'"
                )))
            }
        };
        fields.push((name.clone(), acc, expr.clone()));
    }

    // Groups keep the order in which their key first appears
    let mut groups: Vec<GroupState> = Vec::new();
    for row in &rows {
        let key = eval(row, key_expr);
        let index = match groups.iter().position(|g| values_equal(&g.key, &key)) {
            Some(i) => i,
            None => {
                groups.push(GroupState {
                    key,
                    values: vec![Vec::new(); fields.len()],
                });
                groups.len() - 1
            }
        };
        for (slot, (_, _, expr)) in fields.iter().enumerate() {
            groups[index].values[slot].push(eval(row, expr));
        }
    }

    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let mut doc = Map::new();
        doc.insert("_id".to_string(), group.key);
        for ((name, acc, _), values) in fields.iter().zip(group.values) {
            doc.insert(name.clone(), accumulate(*acc, values));
        }
        out.push(Value::Object(doc));
    }
    Ok(out)
}

fn accumulate(acc: Accumulator, values: Vec<Value>) -> Value {
    match acc {
        Accumulator::Sum => {
            let numbers: Vec<&serde_json::Number> = values
                .iter()
                .filter_map(|v| match v {
                    Value::Number(n) => Some(n),
                    _ => None,
                })
                .collect();
            if numbers.iter().all(|n| n.is_i64()) {
                Value::from(numbers.iter().filter_map(|n| n.as_i64()).sum::<i64>())
            } else {
                Value::from(numbers.iter().filter_map(|n| n.as_f64()).sum::<f64>())
            }
        }
        Accumulator::Avg => {
            let numbers: Vec<f64> = values.iter().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::from(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
        Accumulator::Min => extreme(values, Ordering::Less),
        Accumulator::Max => extreme(values, Ordering::Greater),
        Accumulator::First => values.into_iter().next().unwrap_or(Value::Null),
        Accumulator::Last => values.into_iter().last().unwrap_or(Value::Null),
        Accumulator::Push => Value::Array(values),
    }
}

fn extreme(values: Vec<Value>, wanted: Ordering) -> Value {
    values
        .into_iter()
        .filter(|v| !v.is_null())
        .reduce(|best, v| if compare_values(&v, &best) == wanted { v } else { best })
        .unwrap_or(Value::Null)
}
