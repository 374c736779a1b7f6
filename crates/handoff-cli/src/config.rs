//! CLI settings
//!
//! Defaults, overridden by an optional TOML file, overridden by `HANDOFF_*`
//! environment variables (`HANDOFF_DEVICE_NAME`,
//! `HANDOFF_COORDINATOR__APPROVAL_TIMEOUT_MS`, ...).

use std::path::PathBuf;

use config::{Config, ConfigError, Environment, File};
use handoff::CoordinatorConfig;
use serde::{Deserialize, Serialize};

const DEFAULT_WORK_DIR: &str = ".handoff";
const ENV_PREFIX: &str = "HANDOFF";

/// Link and ledger behaviour of the simulated mesh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Simulation {
    /// Name of the simulated counterpart
    pub peer_name: String,
    /// Probability that a frame is lost
    pub drop_rate: f64,
    /// Largest frame the link carries
    pub max_message_size: Option<usize>,
    /// Latency of every ledger call in milliseconds
    pub ledger_delay_ms: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            peer_name: "Mesh peer".to_string(),
            drop_rate: 0.0,
            max_message_size: None,
            ledger_delay_ms: 200,
        }
    }
}

/// Effective settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Name announced in permission requests
    pub device_name: String,
    /// Coordinator timing and delivery
    pub coordinator: CoordinatorConfig,
    /// Simulated mesh
    pub simulation: Simulation,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: "Handoff CLI".to_string(),
            coordinator: CoordinatorConfig::default(),
            simulation: Simulation::default(),
        }
    }
}

impl Settings {
    /// Load settings from `config_file`, or `~/.handoff/config.toml` when not given
    ///
    /// A missing file is not an error, a malformed one is.
    pub fn new(config_file: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config_file = match config_file {
            Some(path) => Some(path),
            None => home::home_dir().map(|home| home.join(DEFAULT_WORK_DIR).join("config.toml")),
        };

        let mut builder = Config::builder()
            // use defaults
            .add_source(Config::try_from(&Self::default())?);

        if let Some(path) = config_file {
            tracing::debug!("Reading settings from {}", path.display());
            // override with file contents
            builder = builder.add_source(File::from(path).required(false));
        }

        let config = builder
            // override with environment
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        config.try_deserialize()
    }
}
