//! User-management commands and the Cypher they run.
//!
//! Values are always bound as named parameters, never spliced into the
//! statement text.

use std::collections::BTreeMap;
use std::fmt;

use crate::roles::RoleGrant;

pub const CREATE_USER: &str =
    "CREATE OR REPLACE USER $username SET PASSWORD $password CHANGE NOT REQUIRED";
pub const DROP_USER: &str = "DROP USER $username";
pub const ALTER_USER_PASSWORD: &str =
    "ALTER USER $username SET PASSWORD $password CHANGE NOT REQUIRED";

/// A credential lifecycle command.
#[derive(Clone, PartialEq, Eq)]
pub enum Command {
    /// Create (or replace) a user with a password that need not be changed.
    /// `roles` is the normalized roles array from the creation statement.
    CreateUser {
        username: String,
        password: String,
        roles: Vec<RoleGrant>,
    },
    DropUser {
        username: String,
    },
    AlterUserPassword {
        username: String,
        password: String,
    },
}

impl Command {
    pub fn username(&self) -> &str {
        match self {
            Self::CreateUser { username, .. }
            | Self::DropUser { username }
            | Self::AlterUserPassword { username, .. } => username,
        }
    }

    /// Short name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateUser { .. } => "create_user",
            Self::DropUser { .. } => "drop_user",
            Self::AlterUserPassword { .. } => "alter_user_password",
        }
    }

    /// Build the statement text and its parameters.
    pub fn statement(&self) -> Statement {
        match self {
            Self::CreateUser {
                username, password, ..
            } => Statement::new(CREATE_USER)
                .param("username", username)
                .param("password", password),
            Self::DropUser { username } => Statement::new(DROP_USER).param("username", username),
            Self::AlterUserPassword { username, password } => Statement::new(ALTER_USER_PASSWORD)
                .param("username", username)
                .param("password", password),
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateUser {
                username, roles, ..
            } => f
                .debug_struct("CreateUser")
                .field("username", username)
                .field("password", &"[redacted]")
                .field("roles", roles)
                .finish(),
            Self::DropUser { username } => {
                f.debug_struct("DropUser").field("username", username).finish()
            }
            Self::AlterUserPassword { username, .. } => f
                .debug_struct("AlterUserPassword")
                .field("username", username)
                .field("password", &"[redacted]")
                .finish(),
        }
    }
}

/// Statement text plus named string parameters.
#[derive(Clone, PartialEq, Eq)]
pub struct Statement {
    text: &'static str,
    params: BTreeMap<&'static str, String>,
}

impl Statement {
    pub fn new(text: &'static str) -> Self {
        Self {
            text,
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.params.insert(name, value.into());
        self
    }

    pub fn text(&self) -> &'static str {
        self.text
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn params(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.params.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

// Parameter values carry passwords; only names are printed.
impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Statement")
            .field("text", &self.text)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}
