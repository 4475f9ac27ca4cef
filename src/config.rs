//! Explicit configuration for one load.
//!
//! A [`LoadConfig`] is built from a YAML file, command-line flags, or both
//! (flags win) and handed to the entry point. Nothing is read from the
//! process environment.

use std::{fmt, path::Path, time::Duration};

use anyhow::Result;
use postgres::NoTls;
use serde::{Deserialize, Serialize};

use crate::{
    catalog::ensure_identifier,
    error::LoadError,
    io_utils,
    store::PostgresStore,
};

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_PORT: u16 = 5432;

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub dbname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("dbname", &self.dbname)
            .field("application_name", &self.application_name)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .finish()
    }
}

impl ConnectionConfig {
    pub fn new(user: impl Into<String>, dbname: impl Into<String>) -> Self {
        Self {
            host: default_host(),
            port: DEFAULT_PORT,
            user: user.into(),
            password: None,
            dbname: dbname.into(),
            application_name: None,
            connect_timeout_secs: None,
        }
    }

    pub fn to_pg_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname)
            .application_name(self.application_name.as_deref().unwrap_or("pg-upserter"));
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(secs) = self.connect_timeout_secs {
            config.connect_timeout(Duration::from_secs(secs));
        }
        config
    }

    pub fn connect(&self) -> Result<PostgresStore, LoadError> {
        let client = self.to_pg_config().connect(NoTls).map_err(|err| {
            LoadError::Connection(format!(
                "{}@{}:{}/{}: {err}",
                self.user, self.host, self.port, self.dbname
            ))
        })?;
        Ok(PostgresStore::new(client))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadConfig {
    pub table: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default)]
    pub ignore_columns: Vec<String>,
    #[serde(default)]
    pub show_progress: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionConfig>,
}

impl LoadConfig {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            schema: default_schema(),
            ignore_columns: Vec::new(),
            show_progress: false,
            connection: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        io_utils::read_yaml(path)
    }

    pub fn validate(&self) -> Result<(), LoadError> {
        ensure_identifier(&self.table)?;
        ensure_identifier(&self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_defaults_fill_schema_and_port() {
        let config: LoadConfig = serde_yaml::from_str(
            "table: meta_ads_metrics\nconnection:\n  user: loader\n  dbname: ads\n",
        )
        .expect("parse config");
        assert_eq!(config.schema, "public");
        assert!(!config.show_progress);
        let connection = config.connection.expect("connection section");
        assert_eq!(connection.port, 5432);
        assert_eq!(connection.host, "localhost");
    }

    #[test]
    fn debug_output_redacts_password() {
        let mut connection = ConnectionConfig::new("loader", "ads");
        connection.password = Some("hunter2".to_string());
        let rendered = format!("{connection:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn validate_rejects_qualified_names() {
        let config = LoadConfig::new("public.ads");
        assert!(matches!(
            config.validate(),
            Err(LoadError::InvalidIdentifier(name)) if name == "public.ads"
        ));
    }
}
