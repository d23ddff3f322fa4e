use crate::document::Document;
use crate::error::Result;
use crate::factory::DbServiceFactory;
use crate::response::DbResponse;
use crate::schema::{FieldDefinition, FieldType, ModelSchema};
use crate::service::TypedService;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const USER_MODEL_NAME: &str = "User";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    #[default]
    User,
    Guest,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    #[default]
    Active,
    Inactive,
    Banned,
}

/// A user account as stored in the `User` model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    #[serde(default)]
    pub role: UserRole,
    #[serde(default)]
    pub status: UserStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(username: &str, email: &str, password_hash: &str) -> Self {
        User {
            username: username.to_string(),
            email: email.to_string(),
            password_hash: password_hash.to_string(),
            role: UserRole::default(),
            status: UserStatus::default(),
            avatar: None,
            bio: None,
            last_login: None,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Schema of the `User` model.
pub fn user_schema() -> ModelSchema {
    ModelSchema::new()
        .field(
            "username",
            FieldDefinition::string()
                .required()
                .unique()
                .trim()
                .min_length(3)
                .max_length(50)
                .message("required", "Username is required")
                .message("min_length", "Username must be at least 3 characters")
                .message("max_length", "Username must be at most 50 characters"),
        )
        .field(
            "email",
            FieldDefinition::string()
                .required()
                .unique()
                .trim()
                .lowercase()
                .matches(r"^\S+@\S+\.\S+$")
                .message("required", "Email is required")
                .message("match", "Please provide a valid email address"),
        )
        .field(
            "passwordHash",
            FieldDefinition::string()
                .required()
                .min_length(6)
                .message("required", "Password is required")
                .message("min_length", "Password must be at least 6 characters"),
        )
        .field(
            "role",
            FieldDefinition::string()
                .one_of(&["admin", "user", "guest"])
                .default_value(json!("user")),
        )
        .field(
            "status",
            FieldDefinition::string()
                .one_of(&["active", "inactive", "banned"])
                .default_value(json!("active")),
        )
        .field("avatar", FieldDefinition::string())
        .field(
            "bio",
            FieldDefinition::string()
                .max_length(500)
                .message("max_length", "Bio must be at most 500 characters"),
        )
        .field("lastLogin", FieldDefinition::new(FieldType::Date))
}

/// Typed access to the `User` model.
#[derive(Clone)]
pub struct UserService {
    users: TypedService<User>,
}

impl UserService {
    /// Resolve the cached `User` service. The schema must be registered.
    pub fn new(factory: &DbServiceFactory) -> Result<Self> {
        Ok(UserService {
            users: factory.typed_service(USER_MODEL_NAME)?,
        })
    }

    pub fn users(&self) -> &TypedService<User> {
        &self.users
    }

    /// Look a user up by email, normalized the way the schema stores it.
    pub async fn find_by_email(&self, email: &str) -> DbResponse<Option<Document<User>>> {
        let filter: Value = json!({ "email": email.trim().to_lowercase() });
        self.users.find_one(&filter).await
    }
}
