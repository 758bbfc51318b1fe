//! Configuration management for pool admin
//!
//! Loads configuration from TOML files with environment variable substitution.
//! Every network carries its own address table and names its own key variable;
//! there is no configuration shared across networks.

use anyhow::{Context, Result};
use ethers::types::Address;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "POOL_ADMIN_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

lazy_static! {
    static ref ENV_VAR_PATTERN: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();
}

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    pub networks: HashMap<String, NetworkConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Safety buffer added to the node's gas estimate (10 = 1.1x)
    pub gas_limit_buffer_percent: u64,
    pub poll_interval_ms: u64,
    pub inclusion_timeout_secs: u64,
    /// Blocks the inclusion block must be buried under (1 = included)
    pub confirmations: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gas_limit_buffer_percent: 10,
            poll_interval_ms: 2_000,
            inclusion_timeout_secs: 300,
            confirmations: 1,
        }
    }
}

impl PipelineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn inclusion_timeout(&self) -> Duration {
        Duration::from_secs(self.inclusion_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactsConfig {
    /// Directory searched for `<ContractType>.json`
    pub dir: PathBuf,
    /// Explicit artifact paths by contract type, relative to `dir`
    pub contracts: HashMap<String, PathBuf>,
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("abi"),
            contracts: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: String,
    #[serde(default)]
    pub gas_price_strategy: GasPriceStrategy,
    /// Gas price in wei used by the `fixed` strategy
    pub gas_price_wei: Option<u64>,
    pub max_gas_price_gwei: u64,
    /// Name of the environment variable holding this network's private key
    pub private_key_env: String,
    /// Symbolic name -> deployed address
    #[serde(default)]
    pub contracts: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    #[default]
    Fixed,
    Legacy,
    Eip1559,
}

impl Settings {
    /// Load settings from the configured file
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => env::var(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let mut settings = Self::from_toml(&config_str)?;

        // Artifact paths are relative to the config file
        if settings.artifacts.dir.is_relative() {
            if let Some(parent) = config_path.parent() {
                settings.artifacts.dir = parent.join(&settings.artifacts.dir);
            }
        }

        Ok(settings)
    }

    /// Parse and validate settings from a TOML string
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            anyhow::bail!("At least one network must be configured");
        }
        if self.pipeline.poll_interval_ms == 0 {
            anyhow::bail!("pipeline.poll_interval_ms must be positive");
        }
        if self.pipeline.inclusion_timeout_secs == 0 {
            anyhow::bail!("pipeline.inclusion_timeout_secs must be positive");
        }
        if self.pipeline.confirmations == 0 {
            anyhow::bail!("pipeline.confirmations must be at least 1");
        }

        for (name, network) in &self.networks {
            if network.rpc_url.is_empty() {
                anyhow::bail!("Network {} has no RPC URL configured", name);
            }
            if network.private_key_env.is_empty() {
                anyhow::bail!("Network {} has no private_key_env configured", name);
            }
            if network.gas_price_strategy == GasPriceStrategy::Fixed
                && network.gas_price_wei.unwrap_or(0) == 0
            {
                anyhow::bail!("Network {} uses a fixed gas price but gas_price_wei is unset", name);
            }
            for (symbol, address) in &network.contracts {
                address.parse::<Address>().with_context(|| {
                    format!("Network {} has malformed address for {}: {}", name, symbol, address)
                })?;
            }
            if network.contracts.is_empty() {
                tracing::warn!("Network {} has an empty address table", name);
            }
        }

        Ok(())
    }

    /// Get network config by name
    pub fn network(&self, name: &str) -> Result<&NetworkConfig> {
        self.networks.get(name).with_context(|| {
            let mut known: Vec<_> = self.networks.keys().cloned().collect();
            known.sort();
            format!("Unknown network {} (configured: {})", name, known.join(", "))
        })
    }

    /// Address tables of all networks, keyed by network name
    pub fn address_tables(&self) -> HashMap<String, HashMap<String, String>> {
        self.networks
            .iter()
            .map(|(name, network)| (name.clone(), network.contracts.clone()))
            .collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();

    for cap in ENV_VAR_PATTERN.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}
