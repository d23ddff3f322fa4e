use crate::error::Result;
use super::types::{ModelSchema, SchemaFile};
use std::path::Path;

/// Parse a schema file (a `models:` map) from disk
pub fn parse_schema_file(path: &Path) -> Result<SchemaFile> {
    let content = std::fs::read_to_string(path)?;
    parse_schema_str(&content)
}

/// Parse a schema file from a YAML string and check every model in it
pub fn parse_schema_str(content: &str) -> Result<SchemaFile> {
    let file: SchemaFile = serde_yaml::from_str(content)?;
    for schema in file.models.values() {
        schema.check()?;
    }
    Ok(file)
}

/// Parse a single model definition (no `models:` wrapper)
pub fn parse_model_str(content: &str) -> Result<ModelSchema> {
    let schema: ModelSchema = serde_yaml::from_str(content)?;
    schema.check()?;
    Ok(schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AutoIdStrategy, FieldType};

    #[test]
    fn test_parse_models() {
        let file = parse_schema_str(
            r#"
models:
  Post:
    fields:
      title: { type: string, required: true, max_length: 120 }
      views: { type: number, min: 0 }
      tags: { type: list }
    id: { auto: nanoid }
  Event:
    timestamps: false
    strict: false
    fields:
      kind: { type: string, enum: [click, view] }
"#,
        )
        .unwrap();

        assert_eq!(file.models.len(), 2);
        let post = &file.models["Post"];
        assert!(post.timestamps);
        assert!(post.strict);
        assert_eq!(post.auto_id(), AutoIdStrategy::Nanoid);
        assert_eq!(post.fields["title"].field_type, FieldType::String);
        assert_eq!(post.fields["title"].max_length, Some(120));
        assert_eq!(post.fields["views"].min, Some(0.0));

        let event = &file.models["Event"];
        assert!(!event.timestamps);
        assert!(!event.strict);
        assert_eq!(event.auto_id(), AutoIdStrategy::Ulid);
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        let result = parse_model_str("fields:\n  code: { type: string, match: '([a-z' }");
        assert!(result.is_err());
    }

    #[test]
    fn test_string_rule_on_number_rejected() {
        let result = parse_model_str("fields:\n  age: { type: number, lowercase: true }");
        assert!(result.is_err());
    }

    #[test]
    fn test_custom_messages() {
        let schema = parse_model_str(
            "fields:\n  name:\n    type: string\n    required: true\n    messages: { required: 'name please' }",
        )
        .unwrap();
        let def = &schema.fields["name"];
        assert_eq!(def.message_for("required", "x".into()), "name please");
        assert_eq!(def.message_for("max_length", "x".into()), "x");
    }
}
