//! Creation statements and role normalization.
//!
//! A creation statement names the roles a new credential should receive:
//!
//! ```json
//! { "db": "admin", "roles": [ { "role": "readWrite" }, { "role": "read", "db": "test" } ] }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::StatementError;

/// Database a role spec targets when the statement does not name one.
pub const DEFAULT_ROLE_DATABASE: &str = "admin";

/// A single role entry, optionally qualified by a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db: Option<String>,
}

impl Role {
    pub fn new(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: None,
        }
    }

    pub fn on(role: impl Into<String>, db: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            db: Some(db.into()),
        }
    }
}

/// An ordered list of role entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roles(pub Vec<Role>);

/// One element of the standard roles array: a bare role name, or a role
/// document scoped to a database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RoleGrant {
    Name(String),
    Scoped { role: String, db: String },
}

impl Roles {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Convert role documents into the standard roles array, preserving
    /// order. `[{role: "readWrite"}, {role: "read", db: "test"}]` becomes
    /// `["readWrite", {role: "read", db: "test"}]`.
    pub fn normalize(&self) -> Vec<RoleGrant> {
        self.0
            .iter()
            .map(|r| match r.db.as_deref() {
                None | Some("") => RoleGrant::Name(r.role.clone()),
                Some(db) => RoleGrant::Scoped {
                    role: r.role.clone(),
                    db: db.to_string(),
                },
            })
            .collect()
    }
}

/// A parsed creation statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleSpec {
    pub db: String,
    pub roles: Roles,
}

#[derive(Deserialize)]
struct RawRoleSpec {
    #[serde(default)]
    db: Option<String>,
    #[serde(default)]
    roles: Option<Roles>,
}

impl RoleSpec {
    /// Parse a creation statement, defaulting the database to `admin` and
    /// rejecting statements without roles.
    pub fn parse(statement: &str) -> Result<Self, StatementError> {
        let raw: RawRoleSpec = serde_json::from_str(statement)?;

        let db = raw
            .db
            .filter(|db| !db.is_empty())
            .unwrap_or_else(|| DEFAULT_ROLE_DATABASE.to_string());
        let roles = raw.roles.unwrap_or_default();
        if roles.is_empty() {
            return Err(StatementError::MissingRoles);
        }

        Ok(Self { db, roles })
    }
}
