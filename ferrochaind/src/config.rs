//! Network-coordinator configuration: the `{network_magic, listen_port, ...}`
//! table, loaded from a TOML file. `network_magic` and
//! `listen_port` have no defaults on purpose — a missing value is a config
//! error, not a silently-chosen default, so two differently-configured nodes
//! can never drift onto the same network by accident.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use ferrochain_chain::params::{ChainParams, Network};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkSelection {
    Mainnet,
    Testnet,
    Regtest,
}

impl NetworkSelection {
    fn chain_params(self) -> ChainParams {
        match self {
            NetworkSelection::Mainnet => ChainParams::mainnet(),
            NetworkSelection::Testnet => ChainParams::testnet(),
            NetworkSelection::Regtest => ChainParams::regtest(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error(
        "network_magic {configured:#010x} does not match the {network:?} chain params magic {expected:#010x}"
    )]
    MagicMismatch {
        network: Network,
        configured: u32,
        expected: u32,
    },
}

/// Raw on-disk shape. Every required field is non-`Option` here, so a
/// missing key fails TOML deserialization with a field name rather than
/// silently defaulting.
#[derive(Deserialize)]
struct RawConfig {
    network: NetworkSelection,
    network_magic: u32,
    listen_port: u16,
    #[serde(default = "default_true")]
    listen_enabled: bool,
    #[serde(default)]
    enable_nat: bool,
    #[serde(default = "default_datadir")]
    datadir: PathBuf,
    #[serde(default = "default_connect_interval_secs")]
    connect_interval_secs: u64,
    #[serde(default = "default_maintenance_interval_secs")]
    maintenance_interval_secs: u64,
    #[serde(default = "default_feeler_max_delay_multiplier")]
    feeler_max_delay_multiplier: f64,
    test_nonce: Option<u64>,
    #[serde(default = "default_log_filter")]
    log_filter: String,
    #[serde(default)]
    bind_address: Option<IpAddr>,
}

fn default_true() -> bool {
    true
}

fn default_datadir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ferrochain")
}

fn default_connect_interval_secs() -> u64 {
    5
}

fn default_maintenance_interval_secs() -> u64 {
    60
}

fn default_feeler_max_delay_multiplier() -> f64 {
    1.0
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Resolved configuration plus the derived per-file persistence paths
/// (`peer_db_path`/`ban_db_path`/`anchors_path`/`headers_db_path`, all
/// derived from `datadir` unless overridden — this binary doesn't currently
/// expose the override knobs since nothing downstream needs them split from
/// `datadir` yet).
pub struct Config {
    pub network: NetworkSelection,
    pub chain_params: ChainParams,
    pub network_magic: u32,
    pub listen_port: u16,
    pub listen_enabled: bool,
    pub enable_nat: bool,
    pub datadir: PathBuf,
    pub connect_interval: Duration,
    pub maintenance_interval: Duration,
    pub feeler_max_delay_multiplier: f64,
    pub test_nonce: Option<u64>,
    pub log_filter: String,
    pub bind_address: IpAddr,
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let raw: RawConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Config, ConfigError> {
        let chain_params = raw.network.chain_params();
        if raw.network_magic != chain_params.network_magic {
            return Err(ConfigError::MagicMismatch {
                network: chain_params.network,
                configured: raw.network_magic,
                expected: chain_params.network_magic,
            });
        }
        Ok(Config {
            network: raw.network,
            listen_port: raw.listen_port,
            network_magic: raw.network_magic,
            listen_enabled: raw.listen_enabled,
            enable_nat: raw.enable_nat,
            datadir: raw.datadir,
            connect_interval: Duration::from_secs(raw.connect_interval_secs),
            maintenance_interval: Duration::from_secs(raw.maintenance_interval_secs),
            feeler_max_delay_multiplier: raw.feeler_max_delay_multiplier,
            test_nonce: raw.test_nonce,
            log_filter: raw.log_filter,
            bind_address: raw.bind_address.unwrap_or_else(|| "0.0.0.0".parse().unwrap()),
            chain_params,
        })
    }

    pub fn peers_path(&self) -> PathBuf {
        self.datadir.join("peers.json")
    }

    pub fn bans_path(&self) -> PathBuf {
        self.datadir.join("banlist.json")
    }

    pub fn anchors_path(&self) -> PathBuf {
        self.datadir.join("anchors.json")
    }

    pub fn headers_path(&self) -> PathBuf {
        self.datadir.join("headers.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_magic() {
        let raw = RawConfig {
            network: NetworkSelection::Regtest,
            network_magic: 0xdead_beef,
            listen_port: 29590,
            listen_enabled: true,
            enable_nat: false,
            datadir: PathBuf::from("/tmp/ferrochain-test"),
            connect_interval_secs: 5,
            maintenance_interval_secs: 60,
            feeler_max_delay_multiplier: 1.0,
            test_nonce: None,
            log_filter: "info".to_string(),
            bind_address: None,
        };
        assert!(matches!(
            Config::from_raw(raw),
            Err(ConfigError::MagicMismatch { .. })
        ));
    }

    #[test]
    fn accepts_matching_magic_and_derives_paths() {
        let raw = RawConfig {
            network: NetworkSelection::Regtest,
            network_magic: ChainParams::regtest().network_magic,
            listen_port: 29590,
            listen_enabled: true,
            enable_nat: false,
            datadir: PathBuf::from("/tmp/ferrochain-test"),
            connect_interval_secs: 5,
            maintenance_interval_secs: 60,
            feeler_max_delay_multiplier: 1.0,
            test_nonce: Some(42),
            log_filter: "debug".to_string(),
            bind_address: None,
        };
        let cfg = Config::from_raw(raw).unwrap();
        assert_eq!(cfg.peers_path(), PathBuf::from("/tmp/ferrochain-test/peers.json"));
        assert_eq!(cfg.test_nonce, Some(42));
    }
}
