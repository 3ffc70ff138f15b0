use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Local,
    Memory,
}

#[derive(Clone, Deserialize, Debug, Default)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    pub http_port: u16,
    #[serde(default)]
    pub storage: StorageKind,
    /// Base URL of the external indexing service.
    #[serde(default = "default_index_service_url")]
    pub index_service_url: String,
    #[serde(default = "default_crawl_timeout_secs")]
    pub crawl_timeout_secs: u64,
    #[serde(default = "default_index_timeout_secs")]
    pub index_timeout_secs: u64,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_index_service_url() -> String {
    "http://127.0.0.1:8787".to_string()
}

fn default_crawl_timeout_secs() -> u64 {
    30
}

fn default_index_timeout_secs() -> u64 {
    30
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
