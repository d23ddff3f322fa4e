use crate::document::{get_path, remove_path, set_path, DocumentData, ID_FIELD};
use crate::error::{ModelDbError, Result};
use serde_json::{Map, Value};

/// Field projection: either keep only the listed fields or drop them.
/// `_id` is kept unless excluded explicitly.
#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    Include { fields: Vec<String>, keep_id: bool },
    Exclude { fields: Vec<String> },
}

impl Projection {
    /// Parse `{ field: 1 | 0 | true | false }`. `null` / `{}` mean no projection.
    pub fn parse(value: &Value) -> Result<Option<Self>> {
        let map = match value {
            Value::Null => return Ok(None),
            Value::Object(map) if map.is_empty() => return Ok(None),
            Value::Object(map) => map,
            _ => return Err(ModelDbError::Query("Projection must be an object".into())),
        };

        let mut include = Vec::new();
        let mut exclude = Vec::new();
        let mut keep_id = true;
        for (field, flag) in map {
            let on = match flag {
                Value::Bool(b) => *b,
                Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
                other => {
                    return Err(ModelDbError::Query(format!(
                        "Projection value for '{field}' must be 0/1 or a boolean, got {other}"
                    )))
                }
            };
            if field == ID_FIELD {
                keep_id = on;
            } else if on {
                include.push(field.clone());
            } else {
                exclude.push(field.clone());
            }
        }

        match (include.is_empty(), exclude.is_empty()) {
            (false, false) => Err(ModelDbError::Query(
                "Projection cannot mix inclusion and exclusion".into(),
            )),
            (false, true) => Ok(Some(Projection::Include {
                fields: include,
                keep_id,
            })),
            (true, true) if keep_id => Ok(Some(Projection::Include {
                fields: include,
                keep_id,
            })),
            (true, _) => {
                if !keep_id {
                    exclude.push(ID_FIELD.to_string());
                }
                Ok(Some(Projection::Exclude { fields: exclude }))
            }
        }
    }

    pub fn apply(&self, data: DocumentData) -> Result<DocumentData> {
        match self {
            Projection::Include { fields, keep_id } => {
                let mut out = Map::new();
                if *keep_id {
                    if let Some(id) = data.get(ID_FIELD) {
                        out.insert(ID_FIELD.to_string(), id.clone());
                    }
                }
                for field in fields {
                    if let Some(value) = get_path(&data, field) {
                        set_path(&mut out, field, value.clone())?;
                    }
                }
                Ok(out)
            }
            Projection::Exclude { fields } => {
                let mut out = data;
                for field in fields {
                    remove_path(&mut out, field);
                }
                Ok(out)
            }
        }
    }
}

/// Apply an optional projection given in document form.
pub fn project(data: DocumentData, projection: Option<&Value>) -> Result<DocumentData> {
    match projection.map(Projection::parse).transpose()?.flatten() {
        Some(p) => p.apply(data),
        None => Ok(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> DocumentData {
        match json!({
            "_id": "u1",
            "username": "a",
            "passwordHash": "secret",
            "profile": { "city": "Paris", "zip": "75001" }
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_inclusion_keeps_id() {
        let out = project(doc(), Some(&json!({ "username": 1 }))).unwrap();
        assert_eq!(Value::Object(out), json!({ "_id": "u1", "username": "a" }));
    }

    #[test]
    fn test_inclusion_without_id() {
        let out = project(doc(), Some(&json!({ "username": 1, "_id": 0 }))).unwrap();
        assert_eq!(Value::Object(out), json!({ "username": "a" }));
    }

    #[test]
    fn test_exclusion() {
        let out = project(doc(), Some(&json!({ "passwordHash": 0, "profile.zip": false }))).unwrap();
        assert_eq!(
            Value::Object(out),
            json!({ "_id": "u1", "username": "a", "profile": { "city": "Paris" } })
        );
    }

    #[test]
    fn test_nested_inclusion() {
        let out = project(doc(), Some(&json!({ "profile.city": 1 }))).unwrap();
        assert_eq!(Value::Object(out), json!({ "_id": "u1", "profile": { "city": "Paris" } }));
    }

    #[test]
    fn test_mixed_projection_rejected() {
        assert!(Projection::parse(&json!({ "a": 1, "b": 0 })).is_err());
    }

    #[test]
    fn test_empty_projection_is_identity() {
        let out = project(doc(), Some(&json!({}))).unwrap();
        assert_eq!(out, doc());
    }
}
