use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use crate::ingest::IngestOptions;

pub const ENV_PREFIX: &str = "SHARDLINE";
pub const ENV_SEPARATOR: &str = "__";

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct ShardlineConfig {
    pub catalog: Catalog,
    #[serde(default)]
    pub shard_store: ShardStore,
    #[serde(default)]
    pub ingest: Ingest,
    #[serde(default)]
    pub session: Session,
    #[serde(default)]
    pub frontend: Frontend,
    #[serde(default)]
    pub misc: Misc,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Catalog {
    Sqlite(Sqlite),
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Sqlite {
    pub dsn: String,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShardStore {
    Memory(Memory),
}

impl Default for ShardStore {
    fn default() -> Self {
        ShardStore::Memory(Memory::default())
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Memory {
    pub shard_count: u32,
}

impl Default for Memory {
    fn default() -> Self {
        Self { shard_count: 16 }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Ingest {
    pub max_in_flight: usize,
    pub append_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for Ingest {
    fn default() -> Self {
        Self {
            max_in_flight: 8,
            append_timeout_ms: 5000,
            max_retries: 3,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 2000,
        }
    }
}

impl From<&Ingest> for IngestOptions {
    fn from(ingest: &Ingest) -> Self {
        IngestOptions {
            max_in_flight: ingest.max_in_flight,
            append_timeout: Duration::from_millis(ingest.append_timeout_ms),
            max_retries: ingest.max_retries,
            retry_base_delay: Duration::from_millis(ingest.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(ingest.retry_max_delay_ms),
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Session {
    pub max_sessions: usize,
    pub acquire_timeout_ms: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            max_sessions: 64,
            acquire_timeout_ms: 5000,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Default, Clone)]
pub struct Frontend {
    pub http: Option<HttpFrontend>,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct HttpFrontend {
    pub bind_host: String,
    pub bind_port: u16,
}

impl Default for HttpFrontend {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            bind_port: 8080,
        }
    }
}

#[derive(Deserialize, Debug, PartialEq, Eq, Default, Clone)]
pub struct Misc {
    pub metrics: Option<Metrics>,
}

#[derive(Deserialize, Debug, PartialEq, Eq, Clone)]
#[serde(default)]
pub struct Metrics {
    pub host: String,
    pub port: u16,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9090,
        }
    }
}

pub fn validate_config(config: ShardlineConfig) -> Result<ShardlineConfig, ConfigError> {
    let ShardStore::Memory(Memory { shard_count }) = config.shard_store;
    if shard_count == 0 {
        return Err(ConfigError::Message(
            "The shard store needs at least one shard".to_string(),
        ));
    }

    if config.ingest.max_in_flight == 0 {
        return Err(ConfigError::Message(
            "ingest.max_in_flight must be at least 1".to_string(),
        ));
    }

    if config.ingest.retry_base_delay_ms > config.ingest.retry_max_delay_ms {
        return Err(ConfigError::Message(format!(
            "ingest.retry_base_delay_ms ({}) can't exceed ingest.retry_max_delay_ms ({})",
            config.ingest.retry_base_delay_ms, config.ingest.retry_max_delay_ms
        )));
    }

    if config.session.max_sessions == 0 {
        return Err(ConfigError::Message(
            "session.max_sessions must be at least 1".to_string(),
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

pub fn load_config(path: &Path) -> Result<ShardlineConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from(path))
        .add_source(environment(None));

    config.build()?.try_deserialize().and_then(validate_config)
}

// Load a config from a string (to test our structs are defined correctly)
pub fn load_config_from_string(
    config_str: &str,
    skip_validation: bool,
    env_override: Option<HashMap<String, String>>,
) -> Result<ShardlineConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::from_str(config_str, FileFormat::Toml))
        .add_source(environment(env_override));

    if skip_validation {
        config.build()?.try_deserialize()
    } else {
        config.build()?.try_deserialize().and_then(validate_config)
    }
}
