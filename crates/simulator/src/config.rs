//! Run configuration.
//!
//! The configuration is a JSON object with the field spelling shown in the
//! example below. Deserialization catches malformed JSON; `validate`
//! catches out-of-range values and resolves the enum-like string fields.
//!
//! ```json
//! {
//!   "numRuns": 1,
//!   "numConsensus": 10,
//!   "startingSeed": 0,
//!   "seedMultiplier": 100,
//!   "numNodes": 8,
//!   "nodeProcessingRate": 50.0,
//!   "switchProcessingRate": -1,
//!   "baseTimeLimit": 10.0,
//!   "networkType": "Clique",
//!   "networkParameters": [],
//!   "protocol": "IBFT"
//! }
//! ```

use latticebft_fabric::TopologyKind;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

/// Fatal configuration error; the CLI exits nonzero on any of these.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration field {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("unknown networkType {0:?} (expected Clique, Mesh, Torus, Butterfly or FoldedClos)")]
    UnknownNetworkType(String),

    #[error("unknown protocol {0:?} (expected IBFT or HotStuff)")]
    UnknownProtocol(String),
}

/// Which consensus machine the validators run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Ibft,
    HotStuff,
}

/// One run configuration, as read from the JSON file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunConfig {
    /// Number of independent trials.
    pub num_runs: u32,
    /// Terminate a trial once every validator reaches this count.
    pub num_consensus: u64,
    /// RNG seed for trial 0.
    pub starting_seed: i64,
    /// Trial `k` uses `startingSeed + k * seedMultiplier`.
    pub seed_multiplier: i64,
    /// Validator count.
    pub num_nodes: u32,
    /// Exponential service rate for validators; `-1` for instantaneous.
    pub node_processing_rate: f64,
    /// Exponential service rate for switches; `-1` for instantaneous.
    pub switch_processing_rate: f64,
    /// Round-0 timeout; doubles per round.
    pub base_time_limit: f64,
    /// Topology family: Clique, Mesh, Torus, Butterfly or FoldedClos.
    pub network_type: String,
    /// Per-topology parameters.
    #[serde(default)]
    pub network_parameters: Vec<i64>,
    /// Consensus protocol: IBFT (default) or HotStuff.
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Optional real-time budget per trial, in seconds.
    #[serde(default)]
    pub wall_clock_budget_secs: Option<f64>,
}

fn default_protocol() -> String {
    "IBFT".to_string()
}

impl RunConfig {
    /// Read and parse a configuration file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Range-check every field and resolve the string-typed enums.
    pub fn validate(&self) -> Result<(TopologyKind, Protocol), ConfigError> {
        if self.num_runs < 1 {
            return Err(invalid("numRuns", "must be at least 1"));
        }
        if self.num_consensus < 1 {
            return Err(invalid("numConsensus", "must be at least 1"));
        }
        if self.num_nodes < 4 {
            return Err(invalid("numNodes", "at least 4 validators are required"));
        }
        check_rate("nodeProcessingRate", self.node_processing_rate)?;
        check_rate("switchProcessingRate", self.switch_processing_rate)?;
        if !(self.base_time_limit > 0.0) {
            return Err(invalid("baseTimeLimit", "must be positive"));
        }
        if let Some(budget) = self.wall_clock_budget_secs {
            if !(budget >= 0.0) {
                return Err(invalid("wallClockBudgetSecs", "must be non-negative"));
            }
        }

        let topology = TopologyKind::parse(&self.network_type)
            .ok_or_else(|| ConfigError::UnknownNetworkType(self.network_type.clone()))?;
        let protocol = match self.protocol.as_str() {
            "IBFT" => Protocol::Ibft,
            "HotStuff" => Protocol::HotStuff,
            other => return Err(ConfigError::UnknownProtocol(other.to_string())),
        };
        Ok((topology, protocol))
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

/// Rates are either strictly positive or the `-1` instantaneous sentinel.
fn check_rate(field: &'static str, rate: f64) -> Result<(), ConfigError> {
    if rate > 0.0 || rate == -1.0 {
        Ok(())
    } else {
        Err(invalid(field, "must be positive or the -1 sentinel"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "numRuns": 2,
        "numConsensus": 5,
        "startingSeed": 0,
        "seedMultiplier": 100,
        "numNodes": 9,
        "nodeProcessingRate": 50.0,
        "switchProcessingRate": -1,
        "baseTimeLimit": 10.0,
        "networkType": "Mesh",
        "networkParameters": [3]
    }"#;

    #[test]
    fn parses_and_validates_sample() {
        let config = RunConfig::from_json(SAMPLE).expect("sample parses");
        let (topology, protocol) = config.validate().expect("sample is valid");
        assert_eq!(topology, TopologyKind::Mesh);
        assert_eq!(protocol, Protocol::Ibft, "protocol defaults to IBFT");
        assert_eq!(config.network_parameters, vec![3]);
    }

    #[test]
    fn rejects_unknown_fields() {
        let raw = SAMPLE.replacen("\"numRuns\"", "\"numRus\"", 1);
        assert!(matches!(
            RunConfig::from_json(&raw),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn rejects_zero_rate() {
        let raw = SAMPLE.replacen("50.0", "0.0", 1);
        let config = RunConfig::from_json(&raw).expect("parses");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "nodeProcessingRate",
                ..
            })
        ));
    }

    #[test]
    fn rejects_small_cluster() {
        let raw = SAMPLE.replacen("\"numNodes\": 9", "\"numNodes\": 3", 1);
        let config = RunConfig::from_json(&raw).expect("parses");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "numNodes",
                ..
            })
        ));
    }

    #[test]
    fn rejects_unknown_network_type() {
        let raw = SAMPLE.replacen("Mesh", "Ring", 1);
        let config = RunConfig::from_json(&raw).expect("parses");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownNetworkType(_))
        ));
    }

    #[test]
    fn parses_hotstuff_protocol() {
        let raw = SAMPLE.replacen(
            "\"networkParameters\": [3]",
            "\"networkParameters\": [3], \"protocol\": \"HotStuff\"",
            1,
        );
        let config = RunConfig::from_json(&raw).expect("parses");
        let (_, protocol) = config.validate().expect("valid");
        assert_eq!(protocol, Protocol::HotStuff);
    }
}
