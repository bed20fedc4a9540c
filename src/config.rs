//! Configuration management for the settlement service
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::fees::{DynamicFeeParams, MAX_FEE};
use crate::pool::PoolKind;

use alloy_primitives::{Address, U256};
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub engine: EngineConfig,
    pub fees: FeesConfig,
    pub transports: TransportsConfig,
    #[serde(default)]
    pub destinations: Vec<DestinationConfig>,
    #[serde(default)]
    pub tokens: Vec<TokenConfig>,
    #[serde(default)]
    pub pools: Vec<PoolConfig>,
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    pub chain_id: u64,
    pub owner: Address,
    pub router_address: Address,
    pub treasury: Address,
    #[serde(default)]
    pub test_mode: bool,
    #[serde(default)]
    pub base_tokens: Vec<Address>,
    #[serde(default = "default_report_interval")]
    pub report_interval_secs: u64,
}

fn default_report_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeesConfig {
    pub tiers: Vec<FeeTierConfig>,
    #[serde(default)]
    pub dynamic: DynamicFeeConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FeeTierConfig {
    pub fee: u32,
    pub tick_spacing: i32,
}

/// Decimal strings so wei-sized values survive TOML's i64 integers
#[derive(Debug, Clone, Deserialize)]
pub struct DynamicFeeConfig {
    pub volume_unit: String,
    pub increment_unit: u32,
    pub max_adjustment: u32,
}

impl Default for DynamicFeeConfig {
    fn default() -> Self {
        let params = DynamicFeeParams::default();
        Self {
            volume_unit: params.volume_unit.to_string(),
            increment_unit: params.increment_unit,
            max_adjustment: params.max_adjustment,
        }
    }
}

impl DynamicFeeConfig {
    pub fn params(&self) -> Result<DynamicFeeParams> {
        Ok(DynamicFeeParams {
            volume_unit: parse_amount("fees.dynamic.volume_unit", &self.volume_unit)?,
            increment_unit: self.increment_unit,
            max_adjustment: self.max_adjustment,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportsConfig {
    pub a: TransportConfig,
    pub b: TransportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    pub name: String,
    pub endpoint: Address,
    pub fee_collector: Address,
    pub base_fee: String,
    #[serde(default = "zero_amount")]
    pub fee_per_byte: String,
}

fn zero_amount() -> String {
    "0".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct DestinationConfig {
    pub chain_id: u64,
    /// Router custody address on the destination chain
    pub router: Address,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenConfig {
    pub address: Address,
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub token_a: Address,
    pub token_b: Address,
    pub fee: u32,
    #[serde(default)]
    pub hooks: Option<Address>,
    #[serde(flatten)]
    pub kind: PoolKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from the file named by `DEX_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("DEX_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.chain_id == 0 {
            anyhow::bail!("engine.chain_id must be non-zero");
        }
        if engine.owner == Address::ZERO {
            anyhow::bail!("engine.owner must be set");
        }
        if engine.router_address == Address::ZERO {
            anyhow::bail!("engine.router_address must be set");
        }
        if engine.treasury == Address::ZERO {
            anyhow::bail!("engine.treasury must be set");
        }

        if self.fees.tiers.is_empty() {
            anyhow::bail!("At least one fee tier must be configured");
        }
        let mut fees = HashSet::new();
        for tier in &self.fees.tiers {
            if tier.fee == 0 || tier.fee > MAX_FEE || tier.tick_spacing <= 0 {
                anyhow::bail!(
                    "Invalid fee tier {} with tick spacing {}",
                    tier.fee,
                    tier.tick_spacing
                );
            }
            if !fees.insert(tier.fee) {
                anyhow::bail!("Fee tier {} configured twice", tier.fee);
            }
        }
        self.fees.dynamic.params()?;

        let (a, b) = (&self.transports.a, &self.transports.b);
        if a.name == b.name {
            anyhow::bail!("Transports must have distinct names, both are '{}'", a.name);
        }
        for transport in [a, b] {
            parse_amount("transport base_fee", &transport.base_fee)?;
            parse_amount("transport fee_per_byte", &transport.fee_per_byte)?;
            if transport.fee_collector == Address::ZERO {
                anyhow::bail!("Transport {} has no fee collector", transport.name);
            }
        }

        let mut chains = HashSet::new();
        for destination in &self.destinations {
            if destination.chain_id == 0 || destination.chain_id == engine.chain_id {
                anyhow::bail!("Invalid destination chain {}", destination.chain_id);
            }
            if !chains.insert(destination.chain_id) {
                anyhow::bail!("Destination chain {} configured twice", destination.chain_id);
            }
        }
        if self.destinations.is_empty() {
            tracing::warn!("No destination chains configured - cross-chain routes disabled");
        }

        let tokens: HashSet<Address> = self.tokens.iter().map(|t| t.address).collect();
        for pool in &self.pools {
            for token in [pool.token_a, pool.token_b] {
                if !tokens.contains(&token) {
                    anyhow::bail!("Pool references unknown token {}", token);
                }
            }
            if !fees.contains(&pool.fee) {
                anyhow::bail!("Pool uses unconfigured fee tier {}", pool.fee);
            }
        }

        Ok(())
    }

    pub fn get_destination(&self, chain_id: u64) -> Option<&DestinationConfig> {
        self.destinations.iter().find(|d| d.chain_id == chain_id)
    }
}

impl TransportConfig {
    pub fn base_fee(&self) -> Result<U256> {
        parse_amount("base_fee", &self.base_fee)
    }

    pub fn fee_per_byte(&self) -> Result<U256> {
        parse_amount("fee_per_byte", &self.fee_per_byte)
    }
}

fn parse_amount(field: &str, value: &str) -> Result<U256> {
    value
        .trim()
        .parse::<U256>()
        .with_context(|| format!("Invalid amount for {}: '{}'", field, value))
}

lazy_static! {
    static ref ENV_VAR: Regex = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static pattern");
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}
