//! Line-delimited JSON front end.
//!
//! The host writes one request object per line and reads one response line
//! back. Requests are handled in order against a single engine instance.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::Instrument;
use uuid::Uuid;

use neo4j_vault_graph::Driver;

use crate::engine::Neo4jDatabase;
use crate::error::PluginError;
use crate::request::{DeleteUserRequest, InitializeRequest, NewUserRequest, UpdateUserRequest};

/// A request from the host, tagged by `op`.
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum HostRequest {
    Initialize(InitializeRequest),
    NewUser(NewUserRequest),
    DeleteUser(DeleteUserRequest),
    UpdateUser(UpdateUserRequest),
    Type,
    Version,
    Close,
}

impl HostRequest {
    fn op(&self) -> &'static str {
        match self {
            Self::Initialize(_) => "initialize",
            Self::NewUser(_) => "new_user",
            Self::DeleteUser(_) => "delete_user",
            Self::UpdateUser(_) => "update_user",
            Self::Type => "type",
            Self::Version => "version",
            Self::Close => "close",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HostResponse {
    pub fn success(result: Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

/// Serve requests until `reader` reaches EOF.
pub async fn serve<D, R, W>(db: &Neo4jDatabase<D>, reader: R, mut writer: W) -> std::io::Result<()>
where
    D: Driver,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request_id = Uuid::new_v4();
        let response = handle_line(db, line)
            .instrument(tracing::info_span!("request", %request_id))
            .await;

        let mut out = serde_json::to_vec(&response).map_err(std::io::Error::other)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }
    Ok(())
}

async fn handle_line<D: Driver>(db: &Neo4jDatabase<D>, line: &str) -> HostResponse {
    let request: HostRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Rejected malformed request");
            return HostResponse::failure(format!("invalid request: {e}"));
        }
    };

    let op = request.op();
    tracing::debug!(op, "Handling request");

    let outcome = match request {
        HostRequest::Initialize(req) => reply(db.initialize(req).await),
        HostRequest::NewUser(req) => reply(db.new_user(req).await),
        HostRequest::DeleteUser(req) => reply(db.delete_user(req).await),
        HostRequest::UpdateUser(req) => reply(db.update_user(req).await),
        HostRequest::Type => Ok(Value::from(db.type_name())),
        HostRequest::Version => Ok(Value::from(db.plugin_version())),
        HostRequest::Close => reply(db.close().await),
    };

    match outcome {
        Ok(result) => HostResponse::success(result),
        Err(message) => {
            tracing::warn!(op, error = %message, "Request failed");
            HostResponse::failure(message)
        }
    }
}

fn reply<T: Serialize>(result: Result<T, PluginError>) -> Result<Value, String> {
    let value = result.map_err(|e| e.to_string())?;
    serde_json::to_value(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use neo4j_vault_graph::mock::MockDriver;
    use serde_json::json;

    async fn exchange(db: &Neo4jDatabase<MockDriver>, requests: &[Value]) -> Vec<HostResponse> {
        let mut input = String::new();
        for request in requests {
            input.push_str(&request.to_string());
            input.push('\n');
        }

        let mut output = Vec::new();
        serve(db, input.as_bytes(), &mut output).await.unwrap();

        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn initialize() -> Value {
        json!({
            "op": "initialize",
            "config": {
                "connection_url": "neo4j://localhost:7687",
                "username": "neo4j",
                "password": "a_secure_password",
            },
            "verify_connection": true,
        })
    }

    #[tokio::test]
    async fn test_identity_ops() {
        let db = Neo4jDatabase::with_driver(MockDriver::new());
        let responses = exchange(&db, &[json!({"op": "type"}), json!({"op": "version"})]).await;

        assert_eq!(responses[0], HostResponse::success(json!("neo4j")));
        assert_eq!(responses[1], HostResponse::success(json!("v1.0.0-beta")));
    }

    #[tokio::test]
    async fn test_lifecycle_over_lines() {
        let driver = MockDriver::new().with_account("neo4j", "a_secure_password");
        let db = Neo4jDatabase::with_driver(driver.clone());

        let responses = exchange(
            &db,
            &[
                initialize(),
                json!({
                    "op": "new_user",
                    "username_config": {"display_name": "token", "role_name": "reader"},
                    "statements": {"commands": [r#"{"roles": [{"role": "readWrite"}]}"#]},
                    "password": "p1",
                }),
            ],
        )
        .await;

        assert!(responses.iter().all(|r| r.ok), "{responses:?}");
        assert_eq!(
            responses[0].result.as_ref().unwrap()["config"]["username"],
            json!("neo4j")
        );

        let username = responses[1].result.as_ref().unwrap()["username"]
            .as_str()
            .unwrap()
            .to_string();
        assert_eq!(driver.password_of(&username).as_deref(), Some("p1"));

        let responses = exchange(
            &db,
            &[
                json!({"op": "update_user", "username": username, "password": {"new_password": "p2"}}),
                json!({"op": "delete_user", "username": username}),
                json!({"op": "close"}),
            ],
        )
        .await;

        assert!(responses.iter().all(|r| r.ok), "{responses:?}");
        assert!(!driver.has_account(&username));
        assert_eq!(driver.handle_closes(), 1);
    }

    #[tokio::test]
    async fn test_errors_are_reported_per_line() {
        let db = Neo4jDatabase::with_driver(MockDriver::new());

        let mut output = Vec::new();
        let input = "not json\n\n{\"op\": \"delete_user\", \"username\": \"bob\"}\n{\"op\": \"launch\"}\n";
        serve(&db, input.as_bytes(), &mut output).await.unwrap();

        let responses: Vec<HostResponse> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();

        // The blank line is skipped.
        assert_eq!(responses.len(), 3);
        assert!(responses[0].error.as_deref().unwrap().starts_with("invalid request"));
        assert_eq!(
            responses[1].error.as_deref(),
            Some("connection producer is not initialized")
        );
        assert!(!responses[2].ok);
    }

    #[tokio::test]
    async fn test_failed_operation_keeps_serving() {
        let driver = MockDriver::new().with_account("neo4j", "a_secure_password");
        let db = Neo4jDatabase::with_driver(driver);

        let responses = exchange(
            &db,
            &[
                initialize(),
                json!({"op": "new_user", "statements": {"commands": []}, "password": "p1"}),
                json!({"op": "type"}),
            ],
        )
        .await;

        assert!(responses[0].ok);
        assert_eq!(responses[1].error.as_deref(), Some("empty creation statements"));
        assert!(responses[2].ok);
    }
}
