//! Top-level run configuration: the engine protocol plus the raw cap/filter strings validated
//! into a [`MiningConfig`] once CLI flags are known.

use serde::Deserialize;

use crate::error::{MiningError, Result};
use crate::protocol_config::EngineProtocolConfig;

fn default_nodes_cap() -> u32 {
    1_000_000
}

fn default_duration_cap_ms() -> u32 {
    2_000
}

fn default_engine_instances() -> u32 {
    1
}

fn default_max_waves() -> u32 {
    u32::MAX
}

fn default_max_frontier() -> u32 {
    10_000
}

fn default_max_total() -> u64 {
    u64::MAX
}

fn default_random_count() -> u32 {
    1
}

fn default_filter() -> String {
    "gate=AND;empty=true;".to_owned()
}

/// The TOML-backed configuration document loaded at startup, mirroring the engine protocol
/// descriptor's own defaulting style.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub engine: EngineProtocolConfig,

    #[serde(default = "default_nodes_cap")]
    pub max_nodes: u32,
    #[serde(default = "default_duration_cap_ms")]
    pub max_duration_ms: u32,
    #[serde(default = "default_engine_instances")]
    pub engine_instances: u32,
    #[serde(default = "default_max_waves")]
    pub max_waves: u32,
    #[serde(default = "default_max_frontier")]
    pub max_frontier: u32,
    #[serde(default = "default_max_total")]
    pub max_total: u64,
    #[serde(default = "default_random_count")]
    pub random_count: u32,

    #[serde(default)]
    pub chess960: bool,
    #[serde(default)]
    pub random_infinite: bool,

    #[serde(default = "default_filter")]
    pub puzzle_accelerate: String,
    #[serde(default = "default_filter")]
    pub puzzle_quality: String,
    #[serde(default = "default_filter")]
    pub puzzle_winning: String,
    #[serde(default = "default_filter")]
    pub puzzle_drawing: String,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| MiningError::ConfigInvalid(format!("config: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_caps_missing() {
        let config = Config::from_toml_str(
            r#"[engine]
path = "/usr/bin/stockfish"
"#,
        )
        .unwrap();
        assert_eq!(config.max_nodes, 1_000_000);
        assert_eq!(config.engine_instances, 1);
        assert_eq!(config.puzzle_accelerate, "gate=AND;empty=true;");
    }

    #[test]
    fn missing_engine_table_is_config_invalid() {
        assert!(Config::from_toml_str("").is_err());
    }
}
