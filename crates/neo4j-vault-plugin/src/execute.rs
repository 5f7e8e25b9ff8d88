//! Retry-wrapped statement execution.

use neo4j_vault_core::{Command, Statement};
use neo4j_vault_graph::{Driver, DriverError, GraphError, ProducerGuard, Session};

/// Run a command on a fresh session, retrying exactly once if the statement
/// failed because the connection was reset.
///
/// Must be called with the producer lock held. Failing to obtain a session
/// is returned immediately: the producer already reconnects on its own.
/// Any other execution error is returned without a retry.
pub async fn run_with_retry<D: Driver>(
    conn: &mut ProducerGuard<'_, D>,
    command: &Command,
) -> Result<(), GraphError> {
    let statement = command.statement();

    match attempt(conn, &statement).await? {
        Ok(()) => Ok(()),
        Err(err) if err.is_transient() => {
            tracing::warn!(
                command = command.kind(),
                username = %command.username(),
                error = %err,
                "Connection reset during statement, retrying once"
            );
            attempt(conn, &statement).await?.map_err(GraphError::from)
        }
        Err(err) => Err(err.into()),
    }
}

/// One execution. The outer error is a failure to get a session; the inner
/// one is the statement's own outcome. The session is always closed.
async fn attempt<D: Driver>(
    conn: &mut ProducerGuard<'_, D>,
    statement: &Statement,
) -> Result<Result<(), DriverError>, GraphError> {
    let mut session = conn.connection().await?;
    let result = conn.execute(&mut session, statement).await;

    if let Err(err) = session.close().await {
        tracing::debug!(error = %err, "Failed to close session");
    }
    Ok(result)
}
