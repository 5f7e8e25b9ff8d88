//! The credential engine.
//!
//! [`Neo4jDatabase`] answers the four lifecycle requests. Every request that
//! touches the database holds the producer lock from start to finish, so
//! operations against one instance are fully serialized.

use std::collections::HashMap;
use std::sync::OnceLock;

use neo4j_vault_core::config::weak_string;
use neo4j_vault_core::template::DEFAULT_USERNAME_TEMPLATE;
use neo4j_vault_core::{
    Command, ConfigError, RoleSpec, UsernameGenerator, UsernameMetadata, UsernameTemplate,
};
use neo4j_vault_graph::{BoltDriver, ConnectionProducer, Driver, DriverHandle, GraphError};

use crate::error::{PluginError, Result};
use crate::execute::run_with_retry;
use crate::request::{
    DeleteUserRequest, DeleteUserResponse, InitializeRequest, InitializeResponse, NewUserRequest,
    NewUserResponse, UpdateUserRequest, UpdateUserResponse,
};

pub const NEO4J_TYPE_NAME: &str = "neo4j";

/// Version reported to the host.
pub const REPORTED_VERSION: &str = "v1.0.0-beta";

/// Neo4j credential backend.
pub struct Neo4jDatabase<D: Driver = BoltDriver> {
    producer: ConnectionProducer<D>,
    username_producer: OnceLock<Box<dyn UsernameGenerator>>,
}

impl Neo4jDatabase<BoltDriver> {
    pub fn new() -> Self {
        Self::with_driver(BoltDriver::default())
    }
}

impl Default for Neo4jDatabase<BoltDriver> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Driver> Neo4jDatabase<D> {
    pub fn with_driver(driver: D) -> Self {
        Self {
            producer: ConnectionProducer::new(driver),
            username_producer: OnceLock::new(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        NEO4J_TYPE_NAME
    }

    pub fn plugin_version(&self) -> &'static str {
        REPORTED_VERSION
    }

    pub fn producer(&self) -> &ConnectionProducer<D> {
        &self.producer
    }

    pub async fn is_initialized(&self) -> bool {
        self.producer.is_initialized().await
    }

    /// Configure the instance.
    ///
    /// The username template is resolved and trial-generated before the
    /// connection config is loaded, so a bad template never leaves a usable
    /// instance behind. The instance is marked initialized before the
    /// optional connection check: if that check fails the configuration
    /// stays loaded and later requests connect lazily.
    pub async fn initialize(&self, req: InitializeRequest) -> Result<InitializeResponse> {
        let mut conn = self.producer.lock().await;
        if conn.is_initialized() {
            return Err(GraphError::from(ConfigError::AlreadyInitialized).into());
        }

        let source = weak_string(&req.config, "username_template")
            .map_err(PluginError::UsernameTemplateField)?;
        let source = if source.is_empty() {
            DEFAULT_USERNAME_TEMPLATE
        } else {
            source.as_str()
        };
        let template = UsernameTemplate::parse(source).map_err(PluginError::TemplateSyntax)?;
        template
            .generate(&UsernameMetadata::default())
            .map_err(PluginError::InvalidTemplate)?;

        conn.load_config(&req.config)?;
        if self.username_producer.set(Box::new(template)).is_err() {
            return Err(GraphError::from(ConfigError::AlreadyInitialized).into());
        }
        conn.mark_initialized();

        if req.verify_connection {
            let client = conn
                .create_client()
                .await
                .map_err(PluginError::VerifyConnection)?;
            if let Err(err) = conn.probe(&client).await {
                let _ = client.close().await;
                return Err(PluginError::VerifyConnection(err));
            }
            conn.store_client(client).await;
        }

        tracing::info!(
            verify_connection = req.verify_connection,
            "Initialized neo4j database plugin"
        );
        Ok(InitializeResponse { config: req.config })
    }

    /// Create a user from the first creation statement and return the
    /// generated username.
    pub async fn new_user(&self, req: NewUserRequest) -> Result<NewUserResponse> {
        let Some(statement) = req.statements.commands.first() else {
            return Err(PluginError::EmptyCreationStatement);
        };

        let mut conn = self.producer.lock().await;
        let generator = self
            .username_producer
            .get()
            .ok_or_else(PluginError::not_initialized)?;
        let username = generator.generate(&req.username_config)?;

        let spec = RoleSpec::parse(statement)?;
        let command = Command::CreateUser {
            username: username.clone(),
            password: req.password,
            roles: spec.roles.normalize(),
        };

        run_with_retry(&mut conn, &command).await?;

        tracing::info!(
            username = %username,
            db = %spec.db,
            roles = spec.roles.len(),
            "Created database user"
        );
        Ok(NewUserResponse { username })
    }

    /// Drop a user. A missing user's error is surfaced as-is.
    pub async fn delete_user(&self, req: DeleteUserRequest) -> Result<DeleteUserResponse> {
        let mut conn = self.producer.lock().await;
        let command = Command::DropUser {
            username: req.username,
        };

        run_with_retry(&mut conn, &command).await?;

        tracing::info!(username = %command.username(), "Dropped database user");
        Ok(DeleteUserResponse {})
    }

    /// Change a user's password. Requests without a password change succeed
    /// without touching the database.
    pub async fn update_user(&self, req: UpdateUserRequest) -> Result<UpdateUserResponse> {
        let Some(change) = req.password else {
            if req.expiration.is_some() {
                tracing::debug!(username = %req.username, "Ignoring expiration change");
            }
            return Ok(UpdateUserResponse {});
        };

        let mut conn = self.producer.lock().await;
        let command = Command::AlterUserPassword {
            username: req.username,
            password: change.new_password,
        };

        run_with_retry(&mut conn, &command).await?;

        tracing::info!(username = %command.username(), "Rotated database user password");
        Ok(UpdateUserResponse {})
    }

    pub async fn close(&self) -> Result<()> {
        self.producer.close().await?;
        Ok(())
    }

    /// Secrets an external sanitizer should redact from error text.
    pub async fn secret_values(&self) -> HashMap<String, String> {
        self.producer.secret_values().await
    }
}
