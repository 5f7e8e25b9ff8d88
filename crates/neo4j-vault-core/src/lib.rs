//! neo4j-vault-core: Shared configuration, statements, and templates for the
//! Neo4j credential plugin.
//!
//! Nothing in this crate performs I/O. It provides:
//! - Connection configuration decoded from the host's untyped config map
//! - Role specs parsed from creation statements, and their normalization
//! - The closed set of user-management commands and their Cypher statements
//! - Username templates used to generate credential names
//! - Common error types

pub mod command;
pub mod config;
pub mod error;
pub mod roles;
pub mod template;

pub use command::{Command, Statement};
pub use config::ConnectionConfig;
pub use error::{ConfigError, StatementError};
pub use roles::{Role, RoleGrant, RoleSpec, Roles};
pub use template::{TemplateError, UsernameGenerator, UsernameMetadata, UsernameTemplate};
