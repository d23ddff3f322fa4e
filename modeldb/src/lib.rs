pub mod config;
pub mod connection;
pub mod document;
pub mod driver;
pub mod error;
pub mod factory;
pub mod options;
pub mod query;
pub mod response;
pub mod schema;
pub mod schemas;
pub mod service;
pub mod validation;

pub use config::DbConfig;
pub use connection::{ConnectionManager, ConnectionStatus};
pub use document::Document;
pub use error::{ModelDbError, Result};
pub use factory::{DbServiceFactory, FactoryBuilder};
pub use options::{FindOptions, PaginationOptions, UpdateOptions};
pub use query::{Sort, SortDirection};
pub use response::{DbFailure, DbResponse, PaginatedResult};
pub use schema::{FieldDefinition, FieldType, ModelSchema};
pub use service::{Model, ModelService, TypedService};
