//! Process settings for the plugin binary.

use serde::Deserialize;
use serde_json::{Map, Value};

/// Plugin process settings.
///
/// Loaded from the `[plugin]` section of `neo4j-vault.toml` or
/// `NEO4J_VAULT__PLUGIN__` environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PluginSettings {
    /// Connection config used to initialize the engine at start-up. Same
    /// keys the host sends with an initialize request.
    #[serde(default)]
    pub connection: Option<Map<String, Value>>,

    /// Verify connectivity during start-up initialization.
    #[serde(default)]
    pub verify_connection: bool,
}

/// Load settings from `<file_prefix>.{toml,json,yaml,...}` (optional)
/// overlaid by the environment. A missing `[plugin]` section yields the
/// defaults.
pub fn load_settings(file_prefix: &str) -> Result<PluginSettings, config::ConfigError> {
    let cfg = config::Config::builder()
        .add_source(config::File::with_name(file_prefix).required(false))
        .add_source(
            config::Environment::with_prefix("NEO4J_VAULT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match cfg.get::<PluginSettings>("plugin") {
        Ok(settings) => Ok(settings),
        Err(config::ConfigError::NotFound(_)) => Ok(PluginSettings::default()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let prefix = dir.path().join("absent");

        let settings = load_settings(prefix.to_str().unwrap()).unwrap();
        assert!(settings.connection.is_none());
        assert!(!settings.verify_connection);
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("neo4j-vault.toml"),
            r#"
[plugin]
verify_connection = true

[plugin.connection]
connection_url = "neo4j://localhost:7687"
username = "neo4j"
password = "a_secure_password"
connect_timeout = "5s"
"#,
        )
        .unwrap();

        let prefix = dir.path().join("neo4j-vault");
        let settings = load_settings(prefix.to_str().unwrap()).unwrap();

        assert!(settings.verify_connection);
        let connection = settings.connection.unwrap();
        assert_eq!(
            connection.get("connection_url").and_then(Value::as_str),
            Some("neo4j://localhost:7687")
        );
        assert_eq!(
            connection.get("connect_timeout").and_then(Value::as_str),
            Some("5s")
        );
    }

    #[test]
    fn test_file_without_plugin_section() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("other.toml"), "[unrelated]\nkey = 1\n").unwrap();

        let prefix = dir.path().join("other");
        let settings = load_settings(prefix.to_str().unwrap()).unwrap();
        assert!(settings.connection.is_none());
    }
}
