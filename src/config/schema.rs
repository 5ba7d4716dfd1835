use std::collections::HashMap;
use std::path::Path;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "USERDB";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct UserDbConfig {
    pub catalog: Catalog,
    pub backend: Backend,
    #[serde(default)]
    pub limits: Limits,
    #[serde(default)]
    pub import: Import,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Catalog {
    #[cfg(feature = "catalog-postgres")]
    Postgres(Postgres),
    Sqlite(Sqlite),
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Postgres {
    pub dsn: String,
    #[serde(default = "default_schema")]
    pub schema: String,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Sqlite {
    pub dsn: String,
}

fn default_schema() -> String {
    "public".to_string()
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Backend {
    pub url: String,
    pub tenant_id: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default = "default_path_prefix")]
    pub path_prefix: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_path_prefix() -> String {
    "/xingchen-db/v1".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Limits {
    pub max_tables_per_database: u64,
    pub max_fields_per_table: u64,
    pub max_page_size: u64,
    pub max_export_ids: u64,
    pub export_row_limit: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_tables_per_database: 20,
            max_fields_per_table: 20,
            max_page_size: 1000,
            max_export_ids: 1000,
            export_row_limit: 1000,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Import {
    pub chunk_size: usize,
    pub max_retries: usize,
    pub max_rows: usize,
}

impl Default for Import {
    fn default() -> Self {
        Self {
            chunk_size: 200,
            max_retries: 3,
            max_rows: 10000,
        }
    }
}

pub fn validate_config(config: UserDbConfig) -> Result<UserDbConfig, ConfigError> {
    let limits = &config.limits;
    let zero_limit = [
        ("max_tables_per_database", limits.max_tables_per_database),
        ("max_fields_per_table", limits.max_fields_per_table),
        ("max_page_size", limits.max_page_size),
        ("max_export_ids", limits.max_export_ids),
        ("export_row_limit", limits.export_row_limit),
    ]
    .into_iter()
    .find(|(_, value)| *value == 0);

    if let Some((name, _)) = zero_limit {
        return Err(ConfigError::Message(format!(
            "limits.{name} must be greater than zero"
        )));
    }
    if config.import.chunk_size == 0 || config.import.max_rows == 0 {
        return Err(ConfigError::Message(
            "import.chunk_size and import.max_rows must be greater than zero".to_string(),
        ));
    }
    Ok(config)
}

fn environment(env_override: Option<HashMap<String, String>>) -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
        .source(env_override)
}

pub fn load_config(path: &Path) -> Result<UserDbConfig, ConfigError> {
    let path = path
        .to_str()
        .ok_or_else(|| ConfigError::Message(format!("Invalid config path {path:?}")))?;

    Config::builder()
        .add_source(File::with_name(path))
        .add_source(environment(None))
        .build()?
        .try_deserialize()
        .and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
    env_override: Option<HashMap<String, String>>,
) -> Result<UserDbConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(config_str, FileFormat::Toml))
        .add_source(environment(env_override))
        .build()?
        .try_deserialize();

    if skip_validation {
        config
    } else {
        config.and_then(validate_config)
    }
}
