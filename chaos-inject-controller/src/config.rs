use std::convert::{TryFrom, TryInto};
use std::path::PathBuf;

use anyhow::Error;
use chaos_inject_engine::config::Config as EngineConfig;

use crate::raw_config::RawConfig;

pub const DEFAULT_STORE_PATH: &str = "chaos-rules.json";

#[derive(Debug, Clone)]
pub struct Config {
    pub store: PathBuf,
    pub engine: EngineConfig,
}

impl TryFrom<RawConfig> for Config {
    type Error = Error;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        Ok(Config {
            store: raw
                .store
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STORE_PATH)),
            engine: raw.engine.try_into()?,
        })
    }
}
