//! Application configuration module
//!
//! Layered settings: built-in defaults, then an optional `Steward.toml`, then
//! `STEWARD__*` environment variables (a `.env` file is loaded first).

use crate::error::AppError;
use crate::ledger::SimulationParams;
use crate::types::{Address, Amount, BlockNumber, Weight};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Guild deployed for local development
const DEVELOP_DEPLOYMENT: &str = "0x9fd6b308b593ba02a5dbcfef0f30fbbca8b79b91";
/// The original guild on mainnet
const MAINNET_DEPLOYMENT: &str = "0x1fd169a4f5c59acf79d0fd5d91d1201ef1bce9f1";

const DEVELOP_SUMMONER: &str = "0x90f8bf6a479f320ead074411a4b0e7944ea8c9c1";
const DEVELOP_DEPOSIT_TOKEN: &str = "0xcfeb869f69431e42cdb54a4f4f105c19c080a601";

/// 10^18 base units
const ONE_TOKEN: u128 = 1_000_000_000_000_000_000;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    Source(#[from] ::config::ConfigError),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: Ipv4Addr,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::new(0, 0, 0, 0), // Bind to 0.0.0.0 for Docker
            port: 3000,
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec!["http://localhost:3001".to_string()],
        }
    }
}

/// Which guild to talk to and how to read it
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaoConfig {
    /// Selected network name
    pub network: String,
    /// Network name -> deployed guild address
    pub deployments: BTreeMap<String, Address>,
    /// Identity used when a request names none
    pub signer: Option<Address>,
    /// First block replayed when rebuilding membership
    pub members_from_block: BlockNumber,
    /// Max blocks per event query
    pub scan_window: u64,
    pub page_size: u64,
    /// Guild summoned in memory for the `develop` network
    pub simulation: SimulationParams,
}

impl Default for DaoConfig {
    fn default() -> Self {
        let mut deployments = BTreeMap::new();
        deployments.insert("develop".to_string(), Address::known(DEVELOP_DEPLOYMENT));
        deployments.insert("mainnet".to_string(), Address::known(MAINNET_DEPLOYMENT));

        Self {
            network: "develop".to_string(),
            deployments,
            signer: Some(Address::known(DEVELOP_SUMMONER)),
            members_from_block: 0,
            scan_window: 10_000,
            page_size: 50,
            simulation: SimulationParams {
                summoner: Address::known(DEVELOP_SUMMONER),
                deposit_token: Address::known(DEVELOP_DEPOSIT_TOKEN),
                approved_tokens: Vec::new(),
                proposal_deposit: Amount::new(10 * ONE_TOKEN),
                processing_reward: Amount::new(ONE_TOKEN / 10),
                voting_period_length: 5,
                grace_period_length: 2,
                summoner_shares: Weight::ONE,
                summoner_balance: Amount::new(1_000 * ONE_TOKEN),
                period_duration_secs: Some(60),
            },
        }
    }
}

impl DaoConfig {
    /// Address of the guild on the selected network
    pub fn ledger_address(&self) -> Result<Address, AppError> {
        self.deployments.get(&self.network).cloned().ok_or_else(|| {
            AppError::Config(format!(
                "Network '{}' has no guild deployment configured",
                self.network
            ))
        })
    }
}

/// Complete application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub dao: DaoConfig,
}

impl Settings {
    /// Load settings from defaults, `Steward.toml` and the environment
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (ignore errors if file not found)
        let _ = dotenvy::dotenv();

        let settings: Settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Settings::default())?)
            .add_source(::config::File::with_name("Steward").required(false))
            .add_source(
                ::config::Environment::with_prefix("STEWARD")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.dao.network.trim().is_empty() {
            return Err(ConfigError::InvalidValue("dao.network must not be empty".to_string()));
        }
        if self.dao.scan_window == 0 {
            return Err(ConfigError::InvalidValue("dao.scan_window must be at least 1".to_string()));
        }
        if self.dao.page_size == 0 {
            return Err(ConfigError::InvalidValue("dao.page_size must be at least 1".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_server_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(config.port, 3000);
    }

    #[test]
    fn test_known_networks_resolve() {
        let mut dao = DaoConfig::default();
        assert_eq!(dao.ledger_address().unwrap().as_str(), DEVELOP_DEPLOYMENT);

        dao.network = "mainnet".to_string();
        assert_eq!(dao.ledger_address().unwrap().as_str(), MAINNET_DEPLOYMENT);
    }

    #[test]
    fn test_unbound_network_is_a_config_error() {
        let dao = DaoConfig {
            network: "ropsten".to_string(),
            ..DaoConfig::default()
        };
        assert!(matches!(dao.ledger_address(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_file_overrides_merge_with_defaults() {
        let settings: Settings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&Settings::default()).unwrap())
            .add_source(::config::File::from_str(
                r#"
                [dao]
                network = "kovan"
                members_from_block = 10411729

                [dao.deployments]
                kovan = "0x00000000000000000000000000000000000000AA"
                "#,
                ::config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.dao.members_from_block, 10411729);
        assert_eq!(settings.dao.scan_window, 10_000);
        assert_eq!(
            settings.dao.ledger_address().unwrap(),
            Address::from_low_u64(0xaa)
        );
        // defaults survive alongside the new binding
        assert!(settings.dao.deployments.contains_key("mainnet"));
    }

    #[test]
    fn test_zero_scan_window_is_rejected() {
        let mut settings = Settings::default();
        settings.dao.scan_window = 0;
        assert!(matches!(settings.validate(), Err(ConfigError::InvalidValue(_))));
    }
}
