//! The driver boundary.
//!
//! Everything the producer and the engine need from a graph database
//! driver: open an authenticated handle, probe it, hand out sessions that
//! run one write statement in a managed transaction, and close.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use neo4j_vault_core::config::DEFAULT_SESSION_DATABASE;
use neo4j_vault_core::Statement;

/// Errors surfaced by a driver implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    /// The network stream was closed underneath the call (EOF, reset,
    /// broken pipe). The only kind worth one transparent retry.
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("statement failed: {0}")]
    Execution(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl DriverError {
    /// Whether the error means the stream closed and a fresh connection is
    /// likely to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionReset(_))
    }
}

/// Username/password credentials for opening a handle.
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// Options applied to every session created from a handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub database: String,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            database: DEFAULT_SESSION_DATABASE.to_string(),
        }
    }
}

/// Opens driver handles.
#[async_trait]
pub trait Driver: Send + Sync {
    type Handle: DriverHandle;

    async fn open(&self, endpoint: &str, auth: &BasicAuth) -> Result<Self::Handle, DriverError>;
}

/// A live, authenticated driver handle.
#[async_trait]
pub trait DriverHandle: Send + Sync + Sized + 'static {
    type Session: Session;

    /// Round-trip to the server to check the handle is still usable.
    async fn verify_connectivity(&self) -> Result<(), DriverError>;

    /// Sessions are lightweight and never cached.
    fn new_session(&self, options: &SessionOptions) -> Self::Session;

    async fn close(self) -> Result<(), DriverError>;
}

/// A short-lived session bound to a handle.
#[async_trait]
pub trait Session: Send + Sized {
    /// Run one statement inside a managed write transaction and commit it.
    async fn execute_write(&mut self, statement: &Statement) -> Result<(), DriverError>;

    async fn close(self) -> Result<(), DriverError>;
}

/// The session type produced by a driver's handles.
pub type SessionOf<D> = <<D as Driver>::Handle as DriverHandle>::Session;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connection_reset_is_transient() {
        assert!(DriverError::ConnectionReset("EOF".into()).is_transient());
        assert!(!DriverError::Connection("refused".into()).is_transient());
        assert!(!DriverError::Execution("unexpected EOF in user name".into()).is_transient());
        assert!(!DriverError::Auth("bad password".into()).is_transient());
        assert!(!DriverError::Timeout {
            operation: "execute statement",
            after: Duration::from_secs(1),
        }
        .is_transient());
    }

    #[test]
    fn test_basic_auth_debug_redacts() {
        let auth = BasicAuth::new("neo4j", "hunter2");
        assert!(!format!("{auth:?}").contains("hunter2"));
    }
}
