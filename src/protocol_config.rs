//! The Engine Protocol descriptor (§6.1): a small TOML document describing how to talk to one
//! flavor of UCI engine.

use serde::Deserialize;

use crate::error::{MiningError, Result};

fn default_isready() -> String {
    "isready".to_owned()
}

fn default_readyok() -> String {
    "readyok".to_owned()
}

fn default_set_position() -> String {
    "position fen %s".to_owned()
}

fn default_nodes_option() -> String {
    "nodes %d".to_owned()
}

fn default_duration_option() -> String {
    "movetime %d".to_owned()
}

fn default_multipv_option() -> String {
    "setoption name MultiPV value %d".to_owned()
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineProtocolConfig {
    pub path: String,

    #[serde(default)]
    pub setup: Vec<String>,

    #[serde(default = "default_isready")]
    pub isready: String,
    #[serde(default = "default_readyok")]
    pub readyok: String,

    #[serde(default = "default_set_position", rename = "setPosition")]
    pub set_position: String,
    #[serde(default, rename = "setChess960")]
    pub set_chess960: Option<String>,

    #[serde(default = "default_nodes_option", rename = "nodesOption")]
    pub nodes_option: String,
    #[serde(default = "default_duration_option", rename = "durationOption")]
    pub duration_option: String,
    #[serde(default = "default_multipv_option", rename = "multipvOption")]
    pub multipv_option: String,
    #[serde(default, rename = "wdlOption")]
    pub wdl_option: Option<String>,

    #[serde(default)]
    pub name: Option<String>,
}

impl EngineProtocolConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|err| MiningError::ConfigInvalid(format!("engine protocol: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(MiningError::ConfigInvalid(
                "engine protocol 'path' is required".into(),
            ));
        }
        Ok(())
    }

    /// Renders `setPosition` with the FEN substituted for `%s`.
    pub fn render_set_position(&self, fen: &str) -> String {
        self.set_position.replacen("%s", fen, 1)
    }

    /// Renders `setChess960`, if configured, with a `true`/`false` substitution.
    pub fn render_set_chess960(&self, enabled: bool) -> Option<String> {
        self.set_chess960
            .as_ref()
            .map(|template| template.replacen("%s", if enabled { "true" } else { "false" }, 1))
    }

    /// Renders `wdlOption`, if configured. The template carries no placeholder; WDL reporting is
    /// either on or not, matching engines that expose it as a boolean UCI option.
    pub fn render_wdl_option(&self) -> Option<String> {
        self.wdl_option.clone()
    }

    /// Renders `multipvOption` with the requested line count substituted for `%d`.
    pub fn render_multipv_option(&self, count: u32) -> String {
        self.multipv_option.replacen("%d", &count.to_string(), 1)
    }

    /// Builds the `go` line suffix (everything after `go `) from the node and duration caps.
    pub fn render_go_suffix(&self, nodes_cap: u32, duration_cap_ms: u32) -> String {
        let nodes = self.nodes_option.replacen("%d", &nodes_cap.to_string(), 1);
        let duration = self
            .duration_option
            .replacen("%d", &duration_cap_ms.to_string(), 1);
        format!("{nodes} {duration}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_missing() {
        let config = EngineProtocolConfig::from_toml_str(r#"path = "/usr/bin/stockfish""#).unwrap();
        assert_eq!(config.isready, "isready");
        assert_eq!(config.set_position, "position fen %s");
        assert_eq!(config.nodes_option, "nodes %d");
    }

    #[test]
    fn missing_path_is_config_invalid() {
        let err = EngineProtocolConfig::from_toml_str("").unwrap_err();
        assert!(matches!(err, MiningError::ConfigInvalid(_)));
    }

    #[test]
    fn renders_set_position_template() {
        let config = EngineProtocolConfig::from_toml_str(r#"path = "engine""#).unwrap();
        assert_eq!(
            config.render_set_position("8/8/8/8/8/8/8/K6k w - - 0 1"),
            "position fen 8/8/8/8/8/8/8/K6k w - - 0 1"
        );
    }

    #[test]
    fn renders_go_suffix_from_caps() {
        let config = EngineProtocolConfig::from_toml_str(r#"path = "engine""#).unwrap();
        assert_eq!(
            config.render_go_suffix(1_000_000, 500),
            "nodes 1000000 movetime 500"
        );
    }

    #[test]
    fn renders_chess960_boolean_template() {
        let config = EngineProtocolConfig::from_toml_str(
            r#"
            path = "engine"
            setChess960 = "setoption name UCI_Chess960 value %s"
            "#,
        )
        .unwrap();
        assert_eq!(
            config.render_set_chess960(true),
            Some("setoption name UCI_Chess960 value true".to_owned())
        );
    }
}
