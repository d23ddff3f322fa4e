use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Top-level schema file: every model an application registers at bootstrap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaFile {
    #[serde(default)]
    pub models: HashMap<String, ModelSchema>,
}

/// Definition of a single model (one collection of documents)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSchema {
    #[serde(default)]
    pub fields: HashMap<String, FieldDefinition>,
    #[serde(default = "default_true")]
    pub timestamps: bool,
    #[serde(default = "default_true")]
    pub additional_properties: bool,
    #[serde(default = "default_true")]
    pub strict: bool,
    #[serde(default)]
    pub id: Option<IdConfig>,
}

fn default_true() -> bool {
    true
}

impl Default for ModelSchema {
    fn default() -> Self {
        ModelSchema {
            fields: HashMap::new(),
            timestamps: true,
            additional_properties: true,
            strict: true,
            id: None,
        }
    }
}

/// Configuration for document ID generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdConfig {
    pub auto: Option<AutoIdStrategy>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutoIdStrategy {
    Ulid,
    Uuid,
    Nanoid,
}

/// Definition of a single field in a model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(rename = "enum", default)]
    pub enum_values: Option<Vec<String>>,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub trim: bool,
    #[serde(default)]
    pub lowercase: bool,
    #[serde(default)]
    pub min_length: Option<usize>,
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    #[serde(rename = "match", default)]
    pub pattern: Option<String>,
    /// Custom messages keyed by rule name (`required`, `enum`, `min_length`,
    /// `max_length`, `min`, `max`, `match`)
    #[serde(default)]
    pub messages: HashMap<String, String>,
}

/// Field type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    List,
    Object,
    Any,
}

impl ModelSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, name: &str, definition: FieldDefinition) -> Self {
        self.fields.insert(name.to_string(), definition);
        self
    }

    pub fn with_timestamps(mut self, timestamps: bool) -> Self {
        self.timestamps = timestamps;
        self
    }

    pub fn with_additional_properties(mut self, allowed: bool) -> Self {
        self.additional_properties = allowed;
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_auto_id(mut self, strategy: AutoIdStrategy) -> Self {
        self.id = Some(IdConfig {
            auto: Some(strategy),
        });
        self
    }

    /// ID strategy for new documents. Defaults to ULID.
    pub fn auto_id(&self) -> AutoIdStrategy {
        self.id
            .as_ref()
            .and_then(|c| c.auto)
            .unwrap_or(AutoIdStrategy::Ulid)
    }

    /// Names of the fields that carry a unique constraint, sorted.
    pub fn unique_fields(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .fields
            .iter()
            .filter(|(_, def)| def.unique)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    /// Check that the definition itself is coherent: patterns compile,
    /// ranges are ordered and string-only rules sit on string fields.
    pub fn check(&self) -> crate::Result<()> {
        for (name, def) in &self.fields {
            if let Some(pattern) = &def.pattern {
                regex::Regex::new(pattern).map_err(|e| {
                    crate::ModelDbError::Schema(format!(
                        "Field '{name}' has an invalid match pattern: {e}"
                    ))
                })?;
            }
            if let (Some(lo), Some(hi)) = (def.min_length, def.max_length) {
                if lo > hi {
                    return Err(crate::ModelDbError::Schema(format!(
                        "Field '{name}' has min_length {lo} greater than max_length {hi}"
                    )));
                }
            }
            if let (Some(lo), Some(hi)) = (def.min, def.max) {
                if lo > hi {
                    return Err(crate::ModelDbError::Schema(format!(
                        "Field '{name}' has min {lo} greater than max {hi}"
                    )));
                }
            }
            let string_rules = def.enum_values.is_some()
                || def.pattern.is_some()
                || def.trim
                || def.lowercase;
            if string_rules && def.field_type != FieldType::String {
                return Err(crate::ModelDbError::Schema(format!(
                    "Field '{name}' uses string rules but has type {:?}",
                    def.field_type
                )));
            }
        }
        Ok(())
    }
}

impl FieldDefinition {
    pub fn new(field_type: FieldType) -> Self {
        FieldDefinition {
            field_type,
            required: false,
            enum_values: None,
            default: None,
            unique: false,
            trim: false,
            lowercase: false,
            min_length: None,
            max_length: None,
            min: None,
            max: None,
            pattern: None,
            messages: HashMap::new(),
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn trim(mut self) -> Self {
        self.trim = true;
        self
    }

    pub fn lowercase(mut self) -> Self {
        self.lowercase = true;
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn one_of(mut self, values: &[&str]) -> Self {
        self.enum_values = Some(values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn matches(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn message(mut self, rule: &str, message: &str) -> Self {
        self.messages.insert(rule.to_string(), message.to_string());
        self
    }

    /// Message for a failed rule, falling back to the generated one.
    pub fn message_for(&self, rule: &str, fallback: String) -> String {
        self.messages.get(rule).cloned().unwrap_or(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_fields_sorted() {
        let schema = ModelSchema::new()
            .field("username", FieldDefinition::string().unique())
            .field("email", FieldDefinition::string().unique())
            .field("name", FieldDefinition::string());
        assert_eq!(schema.unique_fields(), vec!["email", "username"]);
    }

    #[test]
    fn test_auto_id_defaults_to_ulid() {
        assert_eq!(ModelSchema::new().auto_id(), AutoIdStrategy::Ulid);
        assert_eq!(
            ModelSchema::new().with_auto_id(AutoIdStrategy::Uuid).auto_id(),
            AutoIdStrategy::Uuid
        );
    }

    #[test]
    fn test_check_rejects_bad_definitions() {
        let bad_pattern = ModelSchema::new().field("code", FieldDefinition::string().matches("(["));
        assert!(matches!(bad_pattern.check(), Err(crate::ModelDbError::Schema(_))));

        let bad_length = ModelSchema::new().field(
            "name",
            FieldDefinition::string().min_length(5).max_length(2),
        );
        assert!(bad_length.check().is_err());

        let enum_on_number = ModelSchema::new().field(
            "age",
            FieldDefinition::new(FieldType::Number).one_of(&["1"]),
        );
        assert!(enum_on_number.check().is_err());

        let fine = ModelSchema::new().field(
            "email",
            FieldDefinition::string().trim().lowercase().matches(r"^\S+@\S+$"),
        );
        assert!(fine.check().is_ok());
    }

    #[test]
    fn test_custom_message_fallback() {
        let def = FieldDefinition::string().message("required", "Username is required");
        assert_eq!(def.message_for("required", "x".into()), "Username is required");
        assert_eq!(def.message_for("enum", "fallback".into()), "fallback");
    }
}
