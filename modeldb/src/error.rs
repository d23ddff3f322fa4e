use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelDbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Database is not connected; call initialize() first")]
    NotConnected,

    #[error("Schema \"{0}\" is not registered; call register_schema() first")]
    SchemaNotRegistered(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Duplicate key: {model}.{field} = {value}")]
    DuplicateKey {
        model: String,
        field: String,
        value: String,
    },

    #[error("Query error: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("{0}")]
    Other(String),
}

impl ModelDbError {
    /// Short machine-readable code, used as the envelope `error` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ModelDbError::Connection(_) => "ConnectionError",
            ModelDbError::NotConnected => "NotConnected",
            ModelDbError::SchemaNotRegistered(_) => "SchemaNotRegistered",
            ModelDbError::Schema(_) => "SchemaError",
            ModelDbError::Validation(_) => "ValidationError",
            ModelDbError::DuplicateKey { .. } => "DuplicateKey",
            ModelDbError::Query(_) => "QueryError",
            ModelDbError::Io(_) => "IoError",
            ModelDbError::Yaml(_) | ModelDbError::Json(_) => "SerializationError",
            ModelDbError::Sqlite(_) => "StorageError",
            ModelDbError::Other(_) => "Error",
        }
    }
}

pub type Result<T> = std::result::Result<T, ModelDbError>;
