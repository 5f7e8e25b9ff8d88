//! neo4j-vault-plugin: Database credential plugin for Neo4j.
//!
//! Turns the secrets manager's lifecycle requests (initialize, new user,
//! update user, delete user) into parameterized Cypher run through a single
//! serialized connection, retrying once when the connection was reset.

pub mod engine;
pub mod error;
pub mod execute;
pub mod request;
pub mod server;
pub mod settings;

pub use engine::{Neo4jDatabase, NEO4J_TYPE_NAME, REPORTED_VERSION};
pub use error::PluginError;
