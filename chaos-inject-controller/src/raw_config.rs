use std::path::PathBuf;

use chaos_inject_engine::raw_config::RawConfig as EngineRawConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)] // To prevent typos.
pub struct RawConfig {
    /// Path of the persisted rule store, `chaos-rules.json` by default.
    pub store: Option<PathBuf>,
    #[serde(default)]
    pub engine: EngineRawConfig,
}
