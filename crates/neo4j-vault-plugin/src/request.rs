//! Host request and response types.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use neo4j_vault_core::UsernameMetadata;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitializeRequest {
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub verify_connection: bool,
}

/// Echoes the config the instance was initialized with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InitializeResponse {
    pub config: Map<String, Value>,
}

/// Statements supplied with a request. Only the first creation statement
/// is used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Statements {
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct NewUserRequest {
    #[serde(default)]
    pub username_config: UsernameMetadata,
    #[serde(default)]
    pub statements: Statements,
    pub password: String,
    /// Lease expiry chosen by the host. Leasing is the host's concern.
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

impl fmt::Debug for NewUserRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUserRequest")
            .field("username_config", &self.username_config)
            .field("statements", &self.statements)
            .field("password", &"[redacted]")
            .field("expiration", &self.expiration)
            .finish()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserResponse {
    pub username: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteUserRequest {
    pub username: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteUserResponse {}

#[derive(Clone, Serialize, Deserialize)]
pub struct ChangePassword {
    pub new_password: String,
}

impl fmt::Debug for ChangePassword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangePassword")
            .field("new_password", &"[redacted]")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeExpiration {
    pub new_expiration: DateTime<Utc>,
}

/// Only password changes are applied; any other change is accepted and
/// ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateUserRequest {
    pub username: String,
    #[serde(default)]
    pub password: Option<ChangePassword>,
    #[serde(default)]
    pub expiration: Option<ChangeExpiration>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUserResponse {}
