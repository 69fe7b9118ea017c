//! Service configuration.
//!
//! Loaded from an optional TOML file, then overridden by `REWARDS_*`
//! environment variables, then by command-line flags in the binary.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};

use crate::amount::Amount;
use crate::auth::TokenGrant;
use crate::catalog::{default_methods, CatalogError, MethodCatalog, MethodEntry};
use crate::cooldown::DEFAULT_WITHDRAWAL_COOLDOWN;
use crate::currency::{ConversionError, CurrencyConverter};
use crate::rewards::{RewardPolicy, DEFAULT_REWARD, DEFAULT_REWARD_COOLDOWN};
use crate::withdrawal::WithdrawalPolicy;

// =============================================================================
// Errors
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value `{value}` for {name}")]
    InvalidEnv { name: &'static str, value: String },
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Currency(#[from] ConversionError),
    #[error("method `{method}` network `{network}` uses currency {currency} without a rate")]
    UnpricedNetwork {
        method: String,
        network: String,
        currency: String,
    },
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive; `RUST_LOG` wins when set.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardConfig {
    /// Canonical amount credited per ad watch.
    pub amount: Amount,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cooldown: Duration,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            amount: DEFAULT_REWARD,
            cooldown: DEFAULT_REWARD_COOLDOWN,
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WithdrawalConfig {
    #[serde_as(as = "DurationSeconds<u64>")]
    pub cooldown: Duration,
    pub enforce_cooldown: bool,
}

impl Default for WithdrawalConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_WITHDRAWAL_COOLDOWN,
            enforce_cooldown: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrencyConfig {
    pub canonical: String,
    /// Currency used for display amounts in API responses.
    pub display: String,
    /// Units of each currency per one canonical unit.
    pub rates: BTreeMap<String, Amount>,
}

impl Default for CurrencyConfig {
    fn default() -> Self {
        Self {
            canonical: "USDT".to_string(),
            display: "BDT".to_string(),
            rates: BTreeMap::from([("BDT".to_string(), Amount::from_whole(100))]),
        }
    }
}

// =============================================================================
// LedgerConfig
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub listen_addr: SocketAddr,
    /// `sqlite:` URL; the in-memory store is used when unset.
    pub database_url: Option<String>,
    pub log: LogConfig,
    pub rewards: RewardConfig,
    pub withdrawals: WithdrawalConfig,
    pub currency: CurrencyConfig,
    pub methods: Vec<MethodEntry>,
    pub tokens: Vec<TokenGrant>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 8080)),
            database_url: None,
            log: LogConfig::default(),
            rewards: RewardConfig::default(),
            withdrawals: WithdrawalConfig::default(),
            currency: CurrencyConfig::default(),
            methods: default_methods(),
            tokens: Vec::new(),
        }
    }
}

impl LedgerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `REWARDS_*` environment variables.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let get = |name: &'static str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .map(|v| (name, v))
        };

        if let Some((name, v)) = get("REWARDS_LISTEN_ADDR") {
            self.listen_addr = parse(name, v)?;
        }
        if let Some((_, v)) = get("REWARDS_DATABASE_URL") {
            self.database_url = Some(v);
        }
        if let Some((_, v)) = get("REWARDS_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Some((name, v)) = get("REWARDS_LOG_FORMAT") {
            self.log.format = v
                .parse()
                .map_err(|()| ConfigError::InvalidEnv { name, value: v })?;
        }
        if let Some((name, v)) = get("REWARDS_REWARD_AMOUNT") {
            self.rewards.amount = parse(name, v)?;
        }
        if let Some((name, v)) = get("REWARDS_REWARD_COOLDOWN_SECS") {
            self.rewards.cooldown = Duration::from_secs(parse(name, v)?);
        }
        if let Some((name, v)) = get("REWARDS_WITHDRAWAL_COOLDOWN_SECS") {
            self.withdrawals.cooldown = Duration::from_secs(parse(name, v)?);
        }
        if let Some((name, v)) = get("REWARDS_ENFORCE_WITHDRAWAL_COOLDOWN") {
            self.withdrawals.enforce_cooldown = parse(name, v)?;
        }
        Ok(())
    }

    pub fn reward_policy(&self) -> RewardPolicy {
        RewardPolicy {
            reward: self.rewards.amount,
            cooldown: self.rewards.cooldown,
        }
    }

    pub fn withdrawal_policy(&self) -> WithdrawalPolicy {
        WithdrawalPolicy {
            cooldown: self.withdrawals.cooldown,
            enforce_cooldown: self.withdrawals.enforce_cooldown,
            display_currency: self.currency.display.clone(),
        }
    }

    pub fn converter(&self) -> Result<CurrencyConverter, ConfigError> {
        let converter = CurrencyConverter::new(
            &self.currency.canonical,
            self.currency.rates.iter().map(|(c, r)| (c.as_str(), *r)),
        )?;
        if !converter.supports(&self.currency.display) {
            return Err(ConversionError::Unsupported(self.currency.display.clone()).into());
        }
        Ok(converter)
    }

    /// Build the catalog and check that every network's currency is priced
    /// by `converter`.
    pub fn catalog(&self, converter: &CurrencyConverter) -> Result<MethodCatalog, ConfigError> {
        for method in &self.methods {
            for network in &method.networks {
                if !converter.supports(&network.currency) {
                    return Err(ConfigError::UnpricedNetwork {
                        method: method.id.clone(),
                        network: network.id.clone(),
                        currency: network.currency.clone(),
                    });
                }
            }
        }
        Ok(MethodCatalog::new(self.methods.clone())?)
    }
}

fn parse<T: FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}
