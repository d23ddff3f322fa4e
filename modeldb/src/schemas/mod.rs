// Built-in model definitions

pub mod user;

pub use user::{user_schema, User, UserRole, UserService, UserStatus, USER_MODEL_NAME};
