//! Handles settings for the application. Configuration is read from
//! `settings.toml` (optional) and from `LEDGERBOOK__*` environment variables,
//! e.g. `LEDGERBOOK__STORAGE__DATA_DIR=/srv/ledger`.
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_CONFIG_PATH: &str = "settings";

#[derive(Debug, Deserialize)]
pub struct App {
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    pub data_dir: String,
    pub shard_capacity: usize,
    pub max_projection_steps: usize,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub app: App,
    pub storage: Storage,
}

impl Settings {
    pub fn new(path: Option<&str>) -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .set_default("app.level", "info")?
            .set_default("storage.data_dir", "./data")?
            .set_default("storage.shard_capacity", engine::MAX_MONTHS_PER_SHARD as i64)?
            .set_default("storage.max_projection_steps", engine::MAX_PROJECTION_STEPS as i64)?
            .add_source(File::with_name(path.unwrap_or(DEFAULT_CONFIG_PATH)).required(false))
            .add_source(Environment::with_prefix("LEDGERBOOK").separator("__"))
            .build()?;

        settings.try_deserialize()
    }
}
