use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const CONFIG_FILE: &str = "bulk_messenger";
const ENV_PREFIX: &str = "BULK";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub db_path: PathBuf,
    pub bridge_url: String,
    pub bridge_timeout_secs: u64,
    pub scrape_settle_ms: u64,
    pub failure_delay_secs: u64,
}

impl Settings {
    /// Defaults, then `bulk_messenger.toml` if present, then `BULK_*` env vars.
    pub fn load() -> Result<Self> {
        ::config::Config::builder()
            .set_default("db_path", "data/bulk_messenger.sqlite")?
            .set_default("bridge_url", "http://127.0.0.1:8787")?
            .set_default("bridge_timeout_secs", 90)?
            .set_default("scrape_settle_ms", 500)?
            .set_default("failure_delay_secs", 1)?
            .add_source(::config::File::with_name(CONFIG_FILE).required(false))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX))
            .build()?
            .try_deserialize()
            .context("Invalid settings")
    }

    pub fn scrape_settle(&self) -> Duration {
        Duration::from_millis(self.scrape_settle_ms)
    }

    pub fn failure_delay(&self) -> Duration {
        Duration::from_secs(self.failure_delay_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }
}
