//! Service configuration: where the queries files live, how to reach the
//! database, and runtime tuning knobs. Loaded from a TOML file, with the
//! database password resolvable from the environment so it never has to be
//! written to disk.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::db::DbConfig;

/// Environment variables checked, in order, when the configured password is
/// empty.
const PASSWORD_ENV_VARS: &[&str] = &["QUERYFILE_DB_PASSWORD", "PGPASSWORD"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub db: DbConfig,
    /// Path to the primary queries file.
    pub queries_file: PathBuf,
    /// Optional second queries file for definitions that are safe to expose
    /// without authorization. Loaded into the same catalog.
    #[serde(default)]
    pub public_queries_file: Option<PathBuf>,
    /// 0 = quiet, 1 = log each executed query, 2 = also log pool stats per
    /// call.
    #[serde(default)]
    pub debug_level: u8,
    /// Per-statement execution deadline. Absent means no deadline.
    #[serde(default)]
    pub statement_timeout_secs: Option<u64>,
}

impl ServiceConfig {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("queryfile")
            .join("config.toml")
    }

    /// Load from a TOML file and fill the database password from the
    /// environment if the file left it empty.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut config: ServiceConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        if config.db.password.is_empty() {
            if let Some(password) = password_from_env() {
                config.db.password = password;
            }
        }
        Ok(config)
    }
}

fn password_from_env() -> Option<String> {
    PASSWORD_ENV_VARS
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let raw = r#"
            queries_file = "/etc/queryfile/queries.json"

            [db]
            host = "db.internal"
            port = 5432
            dbname = "app"
            user = "reader"
        "#;
        let config: ServiceConfig = toml::from_str(raw).unwrap();
        assert_eq!(
            config.queries_file,
            PathBuf::from("/etc/queryfile/queries.json")
        );
        assert!(config.public_queries_file.is_none());
        assert_eq!(config.debug_level, 0);
        assert!(config.statement_timeout_secs.is_none());
        assert_eq!(config.db.max_connections, 15);
    }

    #[test]
    fn test_full_config_parses() {
        let raw = r#"
            queries_file = "queries.json"
            public_queries_file = "public-queries.json"
            debug_level = 2
            statement_timeout_secs = 30

            [db]
            host = "localhost"
            port = 5433
            dbname = "app"
            user = "svc"
            ssl_mode = "require"
            max_connections = 4
        "#;
        let config: ServiceConfig = toml::from_str(raw).unwrap();
        assert_eq!(
            config.public_queries_file,
            Some(PathBuf::from("public-queries.json"))
        );
        assert_eq!(config.debug_level, 2);
        assert_eq!(config.statement_timeout_secs, Some(30));
        assert_eq!(config.db.port, 5433);
        assert_eq!(config.db.max_connections, 4);
    }

    #[test]
    fn test_default_path_ends_with_crate_dir() {
        let path = ServiceConfig::default_path();
        assert!(path.ends_with("queryfile/config.toml"));
    }
}
