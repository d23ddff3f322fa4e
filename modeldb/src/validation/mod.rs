use crate::document::{DocumentData, CREATED_AT_FIELD, ID_FIELD, UPDATED_AT_FIELD};
use crate::error::{ModelDbError, Result};
use crate::schema::{FieldDefinition, FieldType, ModelSchema};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

/// Fields the store manages itself; never counted as additional properties.
const RESERVED_FIELDS: [&str; 3] = [ID_FIELD, CREATED_AT_FIELD, UPDATED_AT_FIELD];

/// Compiled `match` patterns, keyed by source
static PATTERNS: OnceLock<RwLock<HashMap<String, Regex>>> = OnceLock::new();

/// Compile a field pattern once and reuse it for every later document.
fn compiled_pattern(pattern: &str) -> std::result::Result<Regex, regex::Error> {
    let cache = PATTERNS.get_or_init(|| RwLock::new(HashMap::new()));
    if let Some(re) = cache
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(pattern)
    {
        return Ok(re.clone());
    }
    let re = Regex::new(pattern)?;
    cache
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .insert(pattern.to_string(), re.clone());
    Ok(re)
}

/// Result of validating a document
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

/// Validate a document's data against its model schema.
/// If strict mode is on, validation issues are errors.
/// If strict mode is off, validation issues are warnings only.
pub fn validate_document(schema: &ModelSchema, data: &DocumentData) -> ValidationResult {
    let mut result = ValidationResult {
        errors: Vec::new(),
        warnings: Vec::new(),
    };

    for (field_name, field_def) in &schema.fields {
        let value = data.get(field_name);

        if field_def.required && value.map_or(true, Value::is_null) {
            let message = field_def.message_for(
                "required",
                format!("Required field '{field_name}' is missing"),
            );
            add_issue(&mut result, schema.strict, message);
            continue;
        }

        if let Some(val) = value {
            if !val.is_null() {
                validate_field_value(field_name, field_def, val, schema.strict, &mut result);
            }
        }
    }

    if !schema.additional_properties {
        for key in data.keys() {
            if !schema.fields.contains_key(key) && !RESERVED_FIELDS.contains(&key.as_str()) {
                add_issue(
                    &mut result,
                    schema.strict,
                    format!("Unexpected field '{key}' (additional_properties is false)"),
                );
            }
        }
    }

    result
}

/// Apply default values to fields that are missing or null.
pub fn apply_defaults(schema: &ModelSchema, data: &mut DocumentData) {
    for (field_name, field_def) in &schema.fields {
        let has_value = data.get(field_name).map_or(false, |v| !v.is_null());
        if !has_value {
            if let Some(default) = &field_def.default {
                data.insert(field_name.clone(), default.clone());
            }
        }
    }
}

/// Apply `trim` / `lowercase` to string fields.
pub fn apply_transforms(schema: &ModelSchema, data: &mut DocumentData) {
    for (field_name, field_def) in &schema.fields {
        if !field_def.trim && !field_def.lowercase {
            continue;
        }
        if let Some(Value::String(s)) = data.get_mut(field_name) {
            if field_def.trim {
                *s = s.trim().to_string();
            }
            if field_def.lowercase {
                *s = s.to_lowercase();
            }
        }
    }
}

fn validate_field_value(
    field_name: &str,
    field_def: &FieldDefinition,
    value: &Value,
    strict: bool,
    result: &mut ValidationResult,
) {
    match field_def.field_type {
        FieldType::String => {
            let Some(s) = value.as_str() else {
                add_issue(
                    result,
                    strict,
                    format!("Field '{field_name}' expected string, got {}", type_name(value)),
                );
                return;
            };
            validate_string(field_name, field_def, s, strict, result);
        }
        FieldType::Number => {
            let Some(n) = value.as_f64() else {
                add_issue(
                    result,
                    strict,
                    format!("Field '{field_name}' expected number, got {}", type_name(value)),
                );
                return;
            };
            if let Some(min) = field_def.min {
                if n < min {
                    let message = field_def.message_for(
                        "min",
                        format!("Field '{field_name}' must be at least {min}, got {n}"),
                    );
                    add_issue(result, strict, message);
                }
            }
            if let Some(max) = field_def.max {
                if n > max {
                    let message = field_def.message_for(
                        "max",
                        format!("Field '{field_name}' must be at most {max}, got {n}"),
                    );
                    add_issue(result, strict, message);
                }
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                add_issue(
                    result,
                    strict,
                    format!("Field '{field_name}' expected boolean, got {}", type_name(value)),
                );
            }
        }
        FieldType::Date => {
            // Dates are stored as RFC 3339 or YYYY-MM-DD strings
            let parses = value.as_str().is_some_and(|s| {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            });
            if !parses {
                add_issue(
                    result,
                    strict,
                    format!("Field '{field_name}' expected date string, got {value}"),
                );
            }
        }
        FieldType::List => {
            if !value.is_array() {
                add_issue(
                    result,
                    strict,
                    format!("Field '{field_name}' expected list, got {}", type_name(value)),
                );
            }
        }
        FieldType::Object => {
            if !value.is_object() {
                add_issue(
                    result,
                    strict,
                    format!("Field '{field_name}' expected object, got {}", type_name(value)),
                );
            }
        }
        FieldType::Any => {}
    }
}

fn validate_string(
    field_name: &str,
    field_def: &FieldDefinition,
    s: &str,
    strict: bool,
    result: &mut ValidationResult,
) {
    if let Some(enum_values) = &field_def.enum_values {
        if !enum_values.iter().any(|v| v == s) {
            let message = field_def.message_for(
                "enum",
                format!("Field '{field_name}' value '{s}' is not in enum: {enum_values:?}"),
            );
            add_issue(result, strict, message);
        }
    }

    let len = s.chars().count();
    if let Some(min) = field_def.min_length {
        if len < min {
            let message = field_def.message_for(
                "min_length",
                format!("Field '{field_name}' must be at least {min} characters"),
            );
            add_issue(result, strict, message);
        }
    }
    if let Some(max) = field_def.max_length {
        if len > max {
            let message = field_def.message_for(
                "max_length",
                format!("Field '{field_name}' must be at most {max} characters"),
            );
            add_issue(result, strict, message);
        }
    }

    if let Some(pattern) = &field_def.pattern {
        match compiled_pattern(pattern) {
            Ok(re) if re.is_match(s) => {}
            Ok(_) => {
                let message = field_def.message_for(
                    "match",
                    format!("Field '{field_name}' value '{s}' does not match {pattern}"),
                );
                add_issue(result, strict, message);
            }
            Err(e) => add_issue(
                result,
                true,
                format!("Field '{field_name}' has an invalid pattern: {e}"),
            ),
        }
    }
}

fn add_issue(result: &mut ValidationResult, strict: bool, message: String) {
    if strict {
        result.errors.push(message);
    } else {
        result.warnings.push(message);
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

/// Apply defaults and transforms, then validate. Returns an error if strict
/// validation fails, otherwise the warnings.
pub fn validate_and_prepare(schema: &ModelSchema, data: &mut DocumentData) -> Result<Vec<String>> {
    apply_defaults(schema, data);
    apply_transforms(schema, data);
    let result = validate_document(schema, data);

    if !result.is_ok() {
        return Err(ModelDbError::Validation(format!(
            "Document validation failed:\n  - {}",
            result.errors.join("\n  - ")
        )));
    }

    Ok(result.warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{parse_schema_str, SchemaFile};

    fn test_schema() -> SchemaFile {
        parse_schema_str(
            r#"
models:
  User:
    fields:
      username: { type: string, required: true, trim: true, min_length: 3, max_length: 50 }
      email:
        type: string
        required: true
        lowercase: true
        trim: true
        match: '^\S+@\S+\.\S+$'
        messages: { match: 'please provide a valid email address' }
      role: { type: string, enum: [admin, user, guest], default: user }
      age: { type: number, min: 0, max: 150 }
      lastLogin: { type: date }
    additional_properties: false
    strict: true

  Event:
    fields:
      kind: { type: string, required: true }
      payload: { type: object }
    additional_properties: true
    strict: false
"#,
        )
        .unwrap()
    }

    fn data(yaml: &str) -> DocumentData {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_valid_user() {
        let file = test_schema();
        let schema = &file.models["User"];
        let d = data("username: alice\nemail: alice@test.com\nrole: admin\nage: 30");

        let result = validate_document(schema, &d);
        assert!(result.is_ok(), "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_missing_required_field() {
        let file = test_schema();
        let result = validate_document(&file.models["User"], &data("username: alice"));
        assert!(!result.is_ok());
        assert!(result.errors.iter().any(|e| e.contains("email")));
    }

    #[test]
    fn test_invalid_enum_value() {
        let file = test_schema();
        let result = validate_document(
            &file.models["User"],
            &data("username: alice\nemail: a@x.com\nrole: superadmin"),
        );
        assert!(!result.is_ok());
        assert!(result.errors.iter().any(|e| e.contains("superadmin")));
    }

    #[test]
    fn test_type_mismatch() {
        let file = test_schema();
        let result =
            validate_document(&file.models["User"], &data("username: 42\nemail: a@x.com"));
        assert!(!result.is_ok());
        assert!(result.errors.iter().any(|e| e.contains("username")));
    }

    #[test]
    fn test_length_and_range() {
        let file = test_schema();
        let result = validate_document(
            &file.models["User"],
            &data("username: al\nemail: a@x.com\nage: 200"),
        );
        assert_eq!(result.errors.len(), 2, "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_pattern_uses_custom_message() {
        let file = test_schema();
        let result =
            validate_document(&file.models["User"], &data("username: alice\nemail: nope"));
        assert_eq!(result.errors, vec!["please provide a valid email address".to_string()]);
    }

    #[test]
    fn test_patterns_are_compiled_once() {
        let pattern = r"^cached-\d+$";
        let first = compiled_pattern(pattern).unwrap();
        let second = compiled_pattern(pattern).unwrap();
        assert_eq!(first.as_str(), second.as_str());
        assert!(second.is_match("cached-42"));

        let cache = PATTERNS.get().unwrap().read().unwrap();
        assert!(cache.contains_key(pattern));
        drop(cache);

        assert!(compiled_pattern("([").is_err());
        assert!(!PATTERNS.get().unwrap().read().unwrap().contains_key("(["));
    }

    #[test]
    fn test_date_field() {
        let file = test_schema();
        let schema = &file.models["User"];
        let ok = validate_document(
            schema,
            &data("username: alice\nemail: a@x.com\nlastLogin: '2026-01-01T10:00:00Z'"),
        );
        assert!(ok.is_ok(), "Errors: {:?}", ok.errors);
        let bad = validate_document(
            schema,
            &data("username: alice\nemail: a@x.com\nlastLogin: yesterday"),
        );
        assert!(!bad.is_ok());
    }

    #[test]
    fn test_additional_properties_rejected() {
        let file = test_schema();
        let result = validate_document(
            &file.models["User"],
            &data("username: alice\nemail: a@x.com\nextra_field: oops"),
        );
        assert!(!result.is_ok());
        assert!(result.errors.iter().any(|e| e.contains("extra_field")));
    }

    #[test]
    fn test_reserved_fields_are_not_additional() {
        let file = test_schema();
        let result = validate_document(
            &file.models["User"],
            &data("_id: u1\nusername: alice\nemail: a@x.com\ncreatedAt: '2026-01-01T00:00:00Z'"),
        );
        assert!(result.is_ok(), "Errors: {:?}", result.errors);
    }

    #[test]
    fn test_non_strict_mode_warnings() {
        let file = test_schema();
        let result = validate_document(&file.models["Event"], &data("kind: 123\nextra: data"));
        assert!(result.is_ok());
        assert!(result.has_warnings());
    }

    #[test]
    fn test_validate_and_prepare_applies_defaults_and_transforms() {
        let file = test_schema();
        let mut d = data("username: '  alice  '\nemail: ' Alice@Test.COM '");

        let warnings = validate_and_prepare(&file.models["User"], &mut d).unwrap();
        assert!(warnings.is_empty());
        assert_eq!(d["username"], "alice");
        assert_eq!(d["email"], "alice@test.com");
        assert_eq!(d["role"], "user");
    }

    #[test]
    fn test_apply_defaults_doesnt_overwrite() {
        let file = test_schema();
        let mut d = data("username: alice\nemail: a@x.com\nrole: admin");
        apply_defaults(&file.models["User"], &mut d);
        assert_eq!(d["role"], "admin");
    }

    #[test]
    fn test_validate_and_prepare_rejects() {
        let file = test_schema();
        let mut d = data("username: alice");
        let err = validate_and_prepare(&file.models["User"], &mut d).unwrap_err();
        assert!(matches!(err, ModelDbError::Validation(_)));
    }
}
