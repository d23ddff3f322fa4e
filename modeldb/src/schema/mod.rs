mod parser;
mod types;

pub use parser::{parse_model_str, parse_schema_file, parse_schema_str};
pub use types::{AutoIdStrategy, FieldDefinition, FieldType, IdConfig, ModelSchema, SchemaFile};
