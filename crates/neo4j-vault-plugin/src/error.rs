//! Error types for the neo4j-vault-plugin crate.

use thiserror::Error;

use neo4j_vault_core::{ConfigError, StatementError, TemplateError};
use neo4j_vault_graph::GraphError;

#[derive(Error, Debug)]
pub enum PluginError {
    #[error("failed to retrieve username_template: {0}")]
    UsernameTemplateField(#[source] ConfigError),

    #[error("unable to initialize username template: {0}")]
    TemplateSyntax(#[source] TemplateError),

    #[error("invalid username template: {0}")]
    InvalidTemplate(#[source] TemplateError),

    #[error("failed to verify connection: {0}")]
    VerifyConnection(#[source] GraphError),

    #[error("empty creation statements")]
    EmptyCreationStatement,

    #[error(transparent)]
    Statement(#[from] StatementError),

    #[error(transparent)]
    Username(#[from] TemplateError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl PluginError {
    pub fn not_initialized() -> Self {
        Self::Graph(GraphError::NotInitialized)
    }

    pub fn is_not_initialized(&self) -> bool {
        matches!(self, Self::Graph(GraphError::NotInitialized))
    }
}

pub type Result<T> = std::result::Result<T, PluginError>;
