//! Connection producer.
//!
//! Owns the decoded configuration and the single live driver handle. All
//! access goes through [`ProducerGuard`], which holds the producer's one
//! lock for as long as it lives, so configuration, connection creation and
//! statement execution are serialized against each other.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{Mutex, MutexGuard};

use neo4j_vault_core::{ConfigError, ConnectionConfig, Statement};

use crate::driver::{BasicAuth, Driver, DriverError, DriverHandle, Session, SessionOf, SessionOptions};

/// Upper bound on closing the live handle, independent of any caller deadline.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(60);

/// Errors from the connection producer.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("connection producer is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error("failed to close connection: {0}")]
    Close(#[source] DriverError),
}

impl GraphError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Driver(e) if e.is_transient())
    }
}

struct ProducerState<H> {
    config: Option<ConnectionConfig>,
    raw_config: Map<String, Value>,
    session_options: SessionOptions,
    initialized: bool,
    client: Option<H>,
}

/// Single owner of the live driver handle.
pub struct ConnectionProducer<D: Driver> {
    driver: D,
    state: Mutex<ProducerState<D::Handle>>,
}

impl<D: Driver> ConnectionProducer<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: Mutex::new(ProducerState {
                config: None,
                raw_config: Map::new(),
                session_options: SessionOptions::default(),
                initialized: false,
                client: None,
            }),
        }
    }

    /// Acquire the producer lock. Callers that run several steps (configure,
    /// connect, execute) hold the guard across all of them.
    pub async fn lock(&self) -> ProducerGuard<'_, D> {
        ProducerGuard {
            driver: &self.driver,
            state: self.state.lock().await,
        }
    }

    /// Lock, then return a session on the live handle.
    pub async fn connection(&self) -> Result<SessionOf<D>, GraphError> {
        self.lock().await.connection().await
    }

    /// Lock, then close the live handle.
    pub async fn close(&self) -> Result<(), GraphError> {
        self.lock().await.close().await
    }

    pub async fn is_initialized(&self) -> bool {
        self.lock().await.is_initialized()
    }

    pub async fn secret_values(&self) -> HashMap<String, String> {
        self.lock().await.secret_values()
    }
}

/// Exclusive access to the producer state.
pub struct ProducerGuard<'a, D: Driver> {
    driver: &'a D,
    state: MutexGuard<'a, ProducerState<D::Handle>>,
}

impl<'a, D: Driver> ProducerGuard<'a, D> {
    /// Decode and store configuration. Does not contact the database.
    pub fn load_config(&mut self, raw: &Map<String, Value>) -> Result<(), GraphError> {
        if self.state.initialized {
            return Err(ConfigError::AlreadyInitialized.into());
        }

        let config = ConnectionConfig::from_raw(raw)?;
        self.state.session_options = SessionOptions {
            database: config.database.clone(),
        };
        self.state.raw_config = raw.clone();
        self.state.config = Some(config);
        Ok(())
    }

    /// Mark the producer usable. Never reverts for the producer's lifetime.
    pub fn mark_initialized(&mut self) {
        self.state.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized
    }

    pub fn raw_config(&self) -> &Map<String, Value> {
        &self.state.raw_config
    }

    pub fn session_options(&self) -> &SessionOptions {
        &self.state.session_options
    }

    pub fn has_client(&self) -> bool {
        self.state.client.is_some()
    }

    /// Return a session on the live handle.
    ///
    /// An existing handle is probed first; if the probe fails it is closed
    /// and replaced. Without a handle a new one is created and stored. A
    /// creation failure stores nothing.
    pub async fn connection(&mut self) -> Result<SessionOf<D>, GraphError> {
        if !self.state.initialized {
            return Err(GraphError::NotInitialized);
        }

        // Taken out of the slot so an aborted call never leaves a
        // half-closed handle behind.
        if let Some(client) = self.state.client.take() {
            match self.probe(&client).await {
                Ok(()) => {
                    let session = client.new_session(&self.state.session_options);
                    self.state.client = Some(client);
                    return Ok(session);
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Connectivity check failed, reconnecting");
                    // Discarded either way; a close failure changes nothing.
                    let _ = client.close().await;
                }
            }
        }

        let client = self.create_client().await?;
        let session = client.new_session(&self.state.session_options);
        self.state.client = Some(client);
        Ok(session)
    }

    /// Open a new authenticated handle against the configured endpoint.
    /// Does not store it.
    pub async fn create_client(&self) -> Result<D::Handle, GraphError> {
        if !self.state.initialized {
            return Err(GraphError::NotInitialized);
        }
        let config = self.state.config.as_ref().ok_or(GraphError::NotInitialized)?;

        let auth = BasicAuth::new(config.username.as_str(), config.password.as_str());
        let endpoint = config.resolved_url();
        let handle = bounded(
            config.connect_timeout,
            "connect",
            self.driver.open(&endpoint, &auth),
        )
        .await?;

        tracing::info!(
            uri = %config.connection_url,
            user = %config.username,
            database = %self.state.session_options.database,
            "Created Neo4j driver handle"
        );
        Ok(handle)
    }

    /// Probe a handle, bounded by the connect timeout.
    pub async fn probe(&self, client: &D::Handle) -> Result<(), GraphError> {
        let limit = self
            .state
            .config
            .as_ref()
            .map(|c| c.connect_timeout)
            .unwrap_or_default();
        bounded(limit, "verify connectivity", client.verify_connectivity()).await?;
        Ok(())
    }

    /// Store a handle as the live one, closing any handle it replaces.
    pub async fn store_client(&mut self, client: D::Handle) {
        if let Some(previous) = self.state.client.replace(client) {
            let _ = previous.close().await;
        }
    }

    /// Run one statement on a session, bounded by the socket timeout.
    pub async fn execute(
        &self,
        session: &mut SessionOf<D>,
        statement: &Statement,
    ) -> Result<(), DriverError> {
        let limit = self
            .state
            .config
            .as_ref()
            .map(|c| c.socket_timeout)
            .unwrap_or_default();
        bounded(limit, "execute statement", session.execute_write(statement)).await
    }

    /// Close the live handle. The slot is cleared even when closing fails so
    /// the next connection re-creates rather than reuses it.
    pub async fn close(&mut self) -> Result<(), GraphError> {
        let Some(client) = self.state.client.take() else {
            return Ok(());
        };

        match tokio::time::timeout(CLOSE_TIMEOUT, client.close()).await {
            Ok(Ok(())) => {
                tracing::info!("Closed Neo4j driver handle");
                Ok(())
            }
            Ok(Err(err)) => Err(GraphError::Close(err)),
            Err(_) => Err(GraphError::Close(DriverError::Timeout {
                operation: "close",
                after: CLOSE_TIMEOUT,
            })),
        }
    }

    /// Secret strings an external sanitizer should redact, mapped to their
    /// placeholders.
    pub fn secret_values(&self) -> HashMap<String, String> {
        let mut secrets = HashMap::new();
        if let Some(config) = &self.state.config {
            if !config.password.is_empty() {
                secrets.insert(config.password.clone(), "[password]".to_string());
            }
        }
        secrets
    }
}

/// Await `fut`, failing with [`DriverError::Timeout`] once `limit` elapses.
/// A zero limit means unbounded.
async fn bounded<T, F>(limit: Duration, operation: &'static str, fut: F) -> Result<T, DriverError>
where
    F: Future<Output = Result<T, DriverError>>,
{
    if limit.is_zero() {
        return fut.await;
    }
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| DriverError::Timeout {
            operation,
            after: limit,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDriver;
    use serde_json::json;

    const ADMIN: &str = "neo4j";
    const ADMIN_PASSWORD: &str = "a_secure_password";

    fn raw_config() -> Map<String, Value> {
        match json!({
            "connection_url": "neo4j://localhost:7687",
            "username": ADMIN,
            "password": ADMIN_PASSWORD,
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    async fn initialized(driver: &MockDriver) -> ConnectionProducer<MockDriver> {
        let producer = ConnectionProducer::new(driver.clone());
        {
            let mut guard = producer.lock().await;
            guard.load_config(&raw_config()).unwrap();
            guard.mark_initialized();
        }
        producer
    }

    fn server() -> MockDriver {
        MockDriver::new().with_account(ADMIN, ADMIN_PASSWORD)
    }

    #[tokio::test]
    async fn test_connection_requires_initialization() {
        let driver = server();
        let producer = ConnectionProducer::new(driver.clone());

        assert!(matches!(
            producer.connection().await,
            Err(GraphError::NotInitialized)
        ));

        // Loaded but not yet marked initialized.
        producer.lock().await.load_config(&raw_config()).unwrap();
        assert!(matches!(
            producer.connection().await,
            Err(GraphError::NotInitialized)
        ));
        assert_eq!(driver.opens(), 0);
    }

    #[tokio::test]
    async fn test_load_config_does_not_contact_database() {
        let driver = server();
        let producer = ConnectionProducer::new(driver.clone());
        let mut guard = producer.lock().await;

        let mut raw = raw_config();
        raw.insert("connection_url".into(), json!(""));
        assert!(matches!(
            guard.load_config(&raw),
            Err(GraphError::Config(ConfigError::EmptyConnectionUrl))
        ));

        guard.load_config(&raw_config()).unwrap();
        assert_eq!(guard.session_options().database, "system");
        assert_eq!(guard.raw_config(), &raw_config());
        assert!(!guard.is_initialized());
        assert_eq!(driver.opens(), 0);
    }

    #[tokio::test]
    async fn test_load_config_rejected_once_initialized() {
        let driver = server();
        let producer = initialized(&driver).await;

        assert!(matches!(
            producer.lock().await.load_config(&raw_config()),
            Err(GraphError::Config(ConfigError::AlreadyInitialized))
        ));
        assert!(producer.is_initialized().await);
    }

    #[tokio::test]
    async fn test_connection_reuses_live_handle() {
        let driver = server();
        let producer = initialized(&driver).await;

        producer.connection().await.unwrap();
        producer.connection().await.unwrap();
        producer.connection().await.unwrap();

        assert_eq!(driver.opens(), 1);
        assert_eq!(driver.probes(), 2);
        assert_eq!(driver.handle_closes(), 0);
    }

    #[tokio::test]
    async fn test_connection_replaces_stale_handle() {
        let driver = server();
        let producer = initialized(&driver).await;

        producer.connection().await.unwrap();
        driver.kill_handles();
        producer.connection().await.unwrap();

        assert_eq!(driver.opens(), 2);
        assert_eq!(driver.handle_closes(), 1);

        // The replacement is healthy and reused.
        producer.connection().await.unwrap();
        assert_eq!(driver.opens(), 2);
    }

    #[tokio::test]
    async fn test_stale_handle_close_error_is_swallowed() {
        let driver = server();
        let producer = initialized(&driver).await;

        producer.connection().await.unwrap();
        driver.kill_handles();
        driver.fail_next_close(DriverError::Connection("already gone".into()));

        assert!(producer.connection().await.is_ok());
        assert_eq!(driver.opens(), 2);
    }

    #[tokio::test]
    async fn test_creation_failure_stores_nothing() {
        let driver = server();
        let producer = initialized(&driver).await;
        driver.set_unreachable(true);

        let err = producer.connection().await.unwrap_err();
        assert!(matches!(err, GraphError::Driver(DriverError::Connection(_))));
        assert!(!producer.lock().await.has_client());

        driver.set_unreachable(false);
        producer.connection().await.unwrap();
        assert!(producer.lock().await.has_client());
    }

    #[tokio::test]
    async fn test_create_client_does_not_store() {
        let driver = server();
        let producer = initialized(&driver).await;
        let guard = producer.lock().await;

        let handle = guard.create_client().await.unwrap();
        assert!(!guard.has_client());
        guard.probe(&handle).await.unwrap();
        assert_eq!(driver.opens(), 1);
    }

    #[tokio::test]
    async fn test_create_client_requires_initialization() {
        let producer = ConnectionProducer::new(server());
        assert!(matches!(
            producer.lock().await.create_client().await,
            Err(GraphError::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_close_clears_handle() {
        let driver = server();
        let producer = initialized(&driver).await;

        // Nothing to close yet.
        producer.close().await.unwrap();
        assert_eq!(driver.handle_closes(), 0);

        producer.connection().await.unwrap();
        producer.close().await.unwrap();
        assert_eq!(driver.handle_closes(), 1);
        assert!(!producer.lock().await.has_client());

        producer.connection().await.unwrap();
        assert_eq!(driver.opens(), 2);
    }

    #[tokio::test]
    async fn test_close_error_still_clears_handle() {
        let driver = server();
        let producer = initialized(&driver).await;
        producer.connection().await.unwrap();

        driver.fail_next_close(DriverError::Connection("socket closed".into()));
        let err = producer.close().await.unwrap_err();
        assert!(matches!(err, GraphError::Close(DriverError::Connection(_))));
        assert!(!producer.lock().await.has_client());

        producer.connection().await.unwrap();
        assert_eq!(driver.opens(), 2);
    }

    #[tokio::test]
    async fn test_connect_timeout_bounds_open() {
        let driver = server();
        driver.set_latency(Duration::from_secs(5));

        let producer = ConnectionProducer::new(driver.clone());
        {
            let mut guard = producer.lock().await;
            let mut raw = raw_config();
            raw.insert("connect_timeout".into(), json!("50ms"));
            guard.load_config(&raw).unwrap();
            guard.mark_initialized();
        }

        let err = producer.connection().await.unwrap_err();
        assert!(matches!(
            err,
            GraphError::Driver(DriverError::Timeout { operation: "connect", .. })
        ));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_execute_runs_on_session_database() {
        let driver = server();
        let producer = initialized(&driver).await;
        let mut guard = producer.lock().await;

        let mut session = guard.connection().await.unwrap();
        let statement = neo4j_vault_core::Command::DropUser {
            username: ADMIN.into(),
        }
        .statement();
        guard.execute(&mut session, &statement).await.unwrap();

        let executed = driver.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].0, "system");
        assert!(!driver.has_account(ADMIN));
    }

    #[tokio::test]
    async fn test_socket_timeout_bounds_execution() {
        let driver = server();
        let producer = ConnectionProducer::new(driver.clone());
        let mut guard = producer.lock().await;
        let mut raw = raw_config();
        raw.insert("socket_timeout".into(), json!("50ms"));
        guard.load_config(&raw).unwrap();
        guard.mark_initialized();

        let mut session = guard.connection().await.unwrap();
        driver.set_latency(Duration::from_secs(5));

        let statement = neo4j_vault_core::Command::DropUser {
            username: ADMIN.into(),
        }
        .statement();
        let err = guard.execute(&mut session, &statement).await.unwrap_err();

        assert!(matches!(
            err,
            DriverError::Timeout {
                operation: "execute statement",
                ..
            }
        ));
        assert!(!err.is_transient());
        assert!(driver.has_account(ADMIN));
    }

    #[tokio::test]
    async fn test_secret_values() {
        let driver = server();
        let producer = ConnectionProducer::new(driver.clone());
        assert!(producer.secret_values().await.is_empty());

        producer.lock().await.load_config(&raw_config()).unwrap();
        let secrets = producer.secret_values().await;
        assert_eq!(secrets.get(ADMIN_PASSWORD).map(String::as_str), Some("[password]"));
        assert_eq!(secrets.len(), 1);
    }
}
