//! Connection configuration for the credential plugin.
//!
//! The host hands over configuration as an untyped JSON map. Every
//! recognized key is decoded here with weak coercion; unknown keys are
//! ignored. Only the endpoint and the timeouts are validated since nothing
//! else can make the producer unusable.

use std::fmt;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Session database used when the config does not name one. Neo4j only
/// accepts user administration statements against `system`.
pub const DEFAULT_SESSION_DATABASE: &str = "system";

/// Decoded connection configuration. Immutable once loaded.
#[derive(Clone, Default)]
pub struct ConnectionConfig {
    /// Bolt endpoint. May contain `{{username}}` / `{{password}}` placeholders.
    pub connection_url: String,
    /// Stored for parity with the host config; not applied.
    pub write_concern: String,
    pub username: String,
    pub password: String,
    pub tls_certificate_key: Option<Vec<u8>>,
    pub tls_ca: Option<Vec<u8>>,
    /// Bounds one statement execution. Zero means unbounded.
    pub socket_timeout: Duration,
    /// Bounds opening a driver handle and probing it. Zero means unbounded.
    pub connect_timeout: Duration,
    /// Validated and stored; the Bolt driver has no server selection phase.
    pub server_selection_timeout: Duration,
    /// Target database for sessions.
    pub database: String,
}

impl ConnectionConfig {
    /// Decode and validate a raw host config map.
    pub fn from_raw(raw: &Map<String, Value>) -> Result<Self, ConfigError> {
        let connection_url = weak_string(raw, "connection_url")?;
        if connection_url.is_empty() {
            return Err(ConfigError::EmptyConnectionUrl);
        }

        let database = match weak_string(raw, "database")? {
            db if db.is_empty() => DEFAULT_SESSION_DATABASE.to_string(),
            db => db,
        };

        Ok(Self {
            connection_url,
            write_concern: weak_string(raw, "write_concern")?,
            username: weak_string(raw, "username")?,
            password: weak_string(raw, "password")?,
            tls_certificate_key: weak_bytes(raw, "tls_certificate_key")?,
            tls_ca: weak_bytes(raw, "tls_ca")?,
            socket_timeout: weak_duration(raw, "socket_timeout")?,
            connect_timeout: weak_duration(raw, "connect_timeout")?,
            server_selection_timeout: weak_duration(raw, "server_selection_timeout")?,
            database,
        })
    }

    /// The endpoint with credential placeholders substituted.
    pub fn resolved_url(&self) -> String {
        self.connection_url
            .replace("{{username}}", &self.username)
            .replace("{{password}}", &self.password)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("connection_url", &self.connection_url)
            .field("write_concern", &self.write_concern)
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .field("tls_certificate_key", &self.tls_certificate_key.as_ref().map(|_| "[redacted]"))
            .field("tls_ca", &self.tls_ca.as_ref().map(Vec::len))
            .field("socket_timeout", &self.socket_timeout)
            .field("connect_timeout", &self.connect_timeout)
            .field("server_selection_timeout", &self.server_selection_timeout)
            .field("database", &self.database)
            .finish()
    }
}

/// Read a string field, coercing numbers and booleans. Missing or null
/// fields decode to the empty string.
pub fn weak_string(raw: &Map<String, Value>, field: &str) -> Result<String, ConfigError> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Bool(b)) => Ok(if *b { "1" } else { "0" }.to_string()),
        Some(other) => Err(invalid(field, format!("expected a string, got {}", kind(other)))),
    }
}

fn weak_bytes(raw: &Map<String, Value>, field: &str) -> Result<Option<Vec<u8>>, ConfigError> {
    let s = weak_string(raw, field)?;
    Ok((!s.is_empty()).then(|| s.into_bytes()))
}

/// Read a non-negative duration. Integers are seconds; strings are either
/// integer seconds or unit-suffixed spans such as `500ms` or `1m30s`.
fn weak_duration(raw: &Map<String, Value>, field: &'static str) -> Result<Duration, ConfigError> {
    match raw.get(field) {
        None | Some(Value::Null) => Ok(Duration::ZERO),
        Some(Value::Number(n)) => {
            if let Some(secs) = n.as_i64() {
                if secs < 0 {
                    return Err(ConfigError::NegativeTimeout { field });
                }
                Ok(Duration::from_secs(secs as u64))
            } else if let Some(secs) = n.as_f64() {
                if secs < 0.0 {
                    return Err(ConfigError::NegativeTimeout { field });
                }
                Duration::try_from_secs_f64(secs).map_err(|e| invalid(field, e.to_string()))
            } else {
                Err(invalid(field, format!("{n} is out of range")))
            }
        }
        Some(Value::String(s)) => parse_duration(field, s.trim()),
        Some(other) => Err(invalid(field, format!("expected a duration, got {}", kind(other)))),
    }
}

fn parse_duration(field: &'static str, s: &str) -> Result<Duration, ConfigError> {
    if s.is_empty() {
        return Ok(Duration::ZERO);
    }
    if s.starts_with('-') {
        return Err(ConfigError::NegativeTimeout { field });
    }
    // Bare integers are seconds, like numeric values.
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    humantime::parse_duration(s).map_err(|e| invalid(field, format!("{s:?}: {e}")))
}

fn invalid(field: &str, reason: String) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test config must be an object"),
        }
    }

    #[test]
    fn test_minimal_config() {
        let config = ConnectionConfig::from_raw(&raw(json!({
            "connection_url": "neo4j://localhost:7687",
            "username": "neo4j",
            "password": "secret",
        })))
        .unwrap();

        assert_eq!(config.connection_url, "neo4j://localhost:7687");
        assert_eq!(config.username, "neo4j");
        assert_eq!(config.password, "secret");
        assert_eq!(config.database, DEFAULT_SESSION_DATABASE);
        assert_eq!(config.socket_timeout, Duration::ZERO);
        assert!(config.tls_ca.is_none());
    }

    #[test]
    fn test_empty_connection_url_rejected() {
        let err = ConnectionConfig::from_raw(&raw(json!({"username": "neo4j"}))).unwrap_err();
        assert_eq!(err, ConfigError::EmptyConnectionUrl);

        let err = ConnectionConfig::from_raw(&raw(json!({"connection_url": ""}))).unwrap_err();
        assert_eq!(err, ConfigError::EmptyConnectionUrl);
    }

    #[test]
    fn test_negative_timeouts_rejected() {
        for field in ["socket_timeout", "connect_timeout", "server_selection_timeout"] {
            let mut map = raw(json!({"connection_url": "bolt://db:7687"}));
            map.insert(field.to_string(), json!(-1));
            let err = ConnectionConfig::from_raw(&map).unwrap_err();
            assert_eq!(err, ConfigError::NegativeTimeout { field });
            assert_eq!(err.to_string(), format!("{field} must be >= 0"));

            map.insert(field.to_string(), json!("-5s"));
            assert!(matches!(
                ConnectionConfig::from_raw(&map),
                Err(ConfigError::NegativeTimeout { .. })
            ));
        }
    }

    #[test]
    fn test_weak_coercion() {
        let config = ConnectionConfig::from_raw(&raw(json!({
            "connection_url": "bolt://db:7687",
            "username": 42,
            "password": true,
            "socket_timeout": "30",
            "connect_timeout": "500ms",
            "server_selection_timeout": 2.5,
            "unknown_key": {"ignored": true},
        })))
        .unwrap();

        assert_eq!(config.username, "42");
        assert_eq!(config.password, "1");
        assert_eq!(config.socket_timeout, Duration::from_secs(30));
        assert_eq!(config.connect_timeout, Duration::from_millis(500));
        assert_eq!(config.server_selection_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_duration_units() {
        assert_eq!(parse_duration("t", "2m").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("t", "1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("t", "15s").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_duration("t", "45").unwrap(), Duration::from_secs(45));
        assert_eq!(parse_duration("t", "").unwrap(), Duration::ZERO);
        assert!(matches!(
            parse_duration("t", "10 fortnights"),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse_duration("t", "soon"),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_compound_durations() {
        assert_eq!(parse_duration("t", "1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("t", "1m 30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("t", "2 min").unwrap(), Duration::from_secs(120));
        assert_eq!(parse_duration("t", "30sec").unwrap(), Duration::from_secs(30));
        assert_eq!(
            parse_duration("t", "1h 500ms").unwrap(),
            Duration::from_millis(3_600_500)
        );

        let config = ConnectionConfig::from_raw(&raw(json!({
            "connection_url": "bolt://db:7687",
            "connect_timeout": "1m30s",
        })))
        .unwrap();
        assert_eq!(config.connect_timeout, Duration::from_secs(90));
    }

    #[test]
    fn test_structured_value_rejected() {
        let err = ConnectionConfig::from_raw(&raw(json!({
            "connection_url": ["bolt://a", "bolt://b"],
        })))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "connection_url"));
    }

    #[test]
    fn test_resolved_url_substitutes_credentials() {
        let config = ConnectionConfig::from_raw(&raw(json!({
            "connection_url": "neo4j://{{username}}:{{password}}@db:7687",
            "username": "admin",
            "password": "pw",
            "database": "neo4j",
        })))
        .unwrap();

        assert_eq!(config.resolved_url(), "neo4j://admin:pw@db:7687");
        assert_eq!(config.database, "neo4j");
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig {
            connection_url: "bolt://db".into(),
            password: "hunter2".into(),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
