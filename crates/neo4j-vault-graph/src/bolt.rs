//! Bolt driver backed by `neo4rs`.

use std::io::ErrorKind;

use async_trait::async_trait;
use neo4rs::{query, ConfigBuilder, Graph};

use neo4j_vault_core::Statement;

use crate::driver::{BasicAuth, Driver, DriverError, DriverHandle, Session, SessionOptions};

/// Opens `neo4rs` graph handles.
#[derive(Debug, Clone)]
pub struct BoltDriver {
    pub max_connections: usize,
    pub fetch_size: usize,
}

impl Default for BoltDriver {
    fn default() -> Self {
        // Credential operations are serialized, so a small pool suffices.
        Self {
            max_connections: 2,
            fetch_size: 16,
        }
    }
}

#[async_trait]
impl Driver for BoltDriver {
    type Handle = BoltHandle;

    async fn open(&self, endpoint: &str, auth: &BasicAuth) -> Result<BoltHandle, DriverError> {
        let config = ConfigBuilder::default()
            .uri(endpoint)
            .user(auth.username.as_str())
            .password(auth.password.as_str())
            .max_connections(self.max_connections)
            .fetch_size(self.fetch_size)
            .build()
            .map_err(|e| DriverError::Connection(e.to_string()))?;

        let graph = Graph::connect(config).await.map_err(classify)?;

        tracing::debug!(uri = %endpoint, user = %auth.username, "Opened Bolt driver");
        Ok(BoltHandle { graph })
    }
}

/// A pooled `neo4rs` graph. Clone is cheap (inner Arc).
#[derive(Clone)]
pub struct BoltHandle {
    graph: Graph,
}

#[async_trait]
impl DriverHandle for BoltHandle {
    type Session = BoltSession;

    async fn verify_connectivity(&self) -> Result<(), DriverError> {
        self.graph.run(query("RETURN 1")).await.map_err(classify)
    }

    fn new_session(&self, options: &SessionOptions) -> BoltSession {
        BoltSession {
            graph: self.graph.clone(),
            database: options.database.clone(),
        }
    }

    async fn close(self) -> Result<(), DriverError> {
        // Dropping the last Graph reference tears down the pool.
        drop(self.graph);
        Ok(())
    }
}

/// A session targeting one database.
pub struct BoltSession {
    graph: Graph,
    database: String,
}

#[async_trait]
impl Session for BoltSession {
    async fn execute_write(&mut self, statement: &Statement) -> Result<(), DriverError> {
        let mut q = query(statement.text());
        for (name, value) in statement.params() {
            q = q.param(name, value.to_string());
        }

        let mut txn = self
            .graph
            .start_txn_on(self.database.as_str())
            .await
            .map_err(classify)?;
        txn.run(q).await.map_err(classify)?;
        txn.commit().await.map_err(classify)
    }

    async fn close(self) -> Result<(), DriverError> {
        Ok(())
    }
}

/// Map a `neo4rs` error onto the driver boundary. Stream closures become
/// [`DriverError::ConnectionReset`] so the executor can classify them
/// without inspecting message text.
fn classify(err: neo4rs::Error) -> DriverError {
    match &err {
        neo4rs::Error::IOError { detail } if is_stream_closed(detail.kind()) => {
            DriverError::ConnectionReset(err.to_string())
        }
        neo4rs::Error::ConnectionError => DriverError::ConnectionReset(err.to_string()),
        neo4rs::Error::IOError { .. } => DriverError::Connection(err.to_string()),
        neo4rs::Error::AuthenticationError(_) => DriverError::Auth(err.to_string()),
        _ => DriverError::Execution(err.to_string()),
    }
}

fn is_stream_closed(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
    )
}
