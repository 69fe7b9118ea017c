//! Withdrawal method catalog.
//!
//! The catalog is configuration: a list of payout methods, each with an
//! ordered list of networks carrying fee, bounds, and settlement currency.
//! It is fixed once the ledger is built, so lookups never race with edits.
//!
//! Address patterns are compiled once at construction. A network's own
//! pattern wins over its method's pattern; with neither, any recipient is
//! accepted for crypto methods.

use std::collections::{HashMap, HashSet};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::error::LedgerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MethodKind {
    MobileMoney,
    Crypto,
}

/// Phone-number rules for a mobile-money rail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"), default)]
pub struct MobileMoneyRules {
    /// International dialling code stripped when present, e.g. `880`.
    pub country_code: String,
    /// National trunk prefix stripped when present, e.g. `0`.
    pub trunk_prefix: String,
    /// Subscriber-number length after normalisation.
    pub digits: usize,
    /// Allowed leading digit pairs of the subscriber number.
    pub operator_prefixes: Vec<String>,
}

impl Default for MobileMoneyRules {
    fn default() -> Self {
        Self {
            country_code: "880".to_string(),
            trunk_prefix: "0".to_string(),
            digits: 10,
            operator_prefixes: ["13", "14", "15", "16", "17", "18", "19"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct NetworkEntry {
    pub id: String,
    pub name: String,
    pub currency: String,
    #[serde(default)]
    pub fee: Amount,
    pub min_amount: Amount,
    pub max_amount: Amount,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_pattern: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all(serialize = "camelCase"))]
pub struct MethodEntry {
    pub id: String,
    pub name: String,
    pub kind: MethodKind,
    pub currency: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mobile_money: Option<MobileMoneyRules>,
    pub networks: Vec<NetworkEntry>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("duplicate withdrawal method `{0}`")]
    DuplicateMethod(String),
    #[error("duplicate network `{network}` in method `{method}`")]
    DuplicateNetwork { method: String, network: String },
    #[error("method `{0}` has no networks")]
    NoNetworks(String),
    #[error("network `{network}` of `{method}` has min {min} above max {max}")]
    InvertedBounds {
        method: String,
        network: String,
        min: Amount,
        max: Amount,
    },
    #[error("invalid address pattern for `{id}`: {source}")]
    Pattern {
        id: String,
        #[source]
        source: regex::Error,
    },
}

/// A method/network pair resolved from the catalog.
#[derive(Debug, Clone, Copy)]
pub struct Route<'a> {
    pub method: &'a MethodEntry,
    pub network: &'a NetworkEntry,
    pub(crate) pattern: Option<&'a Regex>,
}

impl Route<'_> {
    pub fn address_pattern(&self) -> Option<&Regex> {
        self.pattern
    }
}

#[derive(Debug)]
pub struct MethodCatalog {
    methods: Vec<MethodEntry>,
    /// (method id, network id) -> effective compiled pattern.
    patterns: HashMap<(String, String), Regex>,
}

impl MethodCatalog {
    pub fn new(methods: Vec<MethodEntry>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        let mut patterns = HashMap::new();

        for method in &methods {
            if !seen.insert(method.id.as_str()) {
                return Err(CatalogError::DuplicateMethod(method.id.clone()));
            }
            if method.networks.is_empty() {
                return Err(CatalogError::NoNetworks(method.id.clone()));
            }

            let mut seen_networks = HashSet::new();
            for network in &method.networks {
                if !seen_networks.insert(network.id.as_str()) {
                    return Err(CatalogError::DuplicateNetwork {
                        method: method.id.clone(),
                        network: network.id.clone(),
                    });
                }
                if network.min_amount > network.max_amount {
                    return Err(CatalogError::InvertedBounds {
                        method: method.id.clone(),
                        network: network.id.clone(),
                        min: network.min_amount,
                        max: network.max_amount,
                    });
                }

                let (owner, source) = match (&network.address_pattern, &method.address_pattern) {
                    (Some(p), _) => (format!("{}/{}", method.id, network.id), p),
                    (None, Some(p)) => (method.id.clone(), p),
                    (None, None) => continue,
                };
                let compiled = Regex::new(source)
                    .map_err(|source| CatalogError::Pattern { id: owner, source })?;
                patterns.insert((method.id.clone(), network.id.clone()), compiled);
            }
        }

        Ok(Self { methods, patterns })
    }

    /// Active methods with only their active networks, for listing.
    pub fn active_methods(&self) -> Vec<MethodEntry> {
        self.methods
            .iter()
            .filter(|m| m.active)
            .filter_map(|m| {
                let networks: Vec<_> = m.networks.iter().filter(|n| n.active).cloned().collect();
                (!networks.is_empty()).then(|| MethodEntry {
                    networks,
                    ..m.clone()
                })
            })
            .collect()
    }

    pub fn method(&self, method_id: &str) -> Option<&MethodEntry> {
        self.methods.iter().find(|m| m.id == method_id)
    }

    /// Resolve an active method/network pair.
    pub fn resolve(&self, method_id: &str, network_id: &str) -> Result<Route<'_>, LedgerError> {
        let method = self
            .method(method_id)
            .filter(|m| m.active)
            .ok_or_else(|| LedgerError::UnknownMethod(method_id.to_string()))?;
        let network = method
            .networks
            .iter()
            .find(|n| n.id == network_id && n.active)
            .ok_or_else(|| LedgerError::UnknownNetwork {
                method: method_id.to_string(),
                network: network_id.to_string(),
            })?;
        let pattern = self
            .patterns
            .get(&(method.id.clone(), network.id.clone()));
        Ok(Route {
            method,
            network,
            pattern,
        })
    }
}

fn mobile_method(id: &str, name: &str) -> MethodEntry {
    MethodEntry {
        id: id.to_string(),
        name: name.to_string(),
        kind: MethodKind::MobileMoney,
        currency: "BDT".to_string(),
        active: true,
        address_pattern: None,
        mobile_money: Some(MobileMoneyRules::default()),
        networks: vec![NetworkEntry {
            id: "personal".to_string(),
            name: "Personal account".to_string(),
            currency: "BDT".to_string(),
            fee: Amount::ZERO,
            min_amount: Amount::from_whole(50),
            max_amount: Amount::from_whole(5_000),
            active: true,
            address_pattern: None,
        }],
    }
}

fn usdt_network(id: &str, name: &str, fee: Amount) -> NetworkEntry {
    NetworkEntry {
        id: id.to_string(),
        name: name.to_string(),
        currency: "USDT".to_string(),
        fee,
        min_amount: Amount::from_units(500_000),
        max_amount: Amount::from_whole(50),
        active: true,
        address_pattern: None,
    }
}

/// The catalog a fresh deployment starts with.
pub fn default_methods() -> Vec<MethodEntry> {
    vec![
        mobile_method("bkash", "bKash"),
        mobile_method("nagad", "Nagad"),
        MethodEntry {
            id: "binance".to_string(),
            name: "Binance".to_string(),
            kind: MethodKind::Crypto,
            currency: "USDT".to_string(),
            active: true,
            address_pattern: Some("^0x[0-9a-fA-F]{40}$".to_string()),
            mobile_money: None,
            networks: vec![usdt_network(
                "bep20",
                "BNB Smart Chain (BEP20)",
                Amount::from_units(300_000),
            )],
        },
        MethodEntry {
            id: "bitget".to_string(),
            name: "Bitget".to_string(),
            kind: MethodKind::Crypto,
            currency: "USDT".to_string(),
            active: true,
            address_pattern: Some("^[0-9a-zA-Z]{34,42}$".to_string()),
            mobile_money: None,
            networks: vec![
                usdt_network("trc20", "Tron (TRC20)", Amount::from_whole(1)),
                usdt_network("bep20", "BNB Smart Chain (BEP20)", Amount::from_units(300_000)),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> MethodCatalog {
        MethodCatalog::new(default_methods()).unwrap()
    }

    #[test]
    fn test_resolve_known_route() {
        let catalog = catalog();
        let route = catalog.resolve("binance", "bep20").unwrap();
        assert_eq!(route.network.min_amount, Amount::from_units(500_000));
        assert!(route.address_pattern().is_some());

        let route = catalog.resolve("bkash", "personal").unwrap();
        assert_eq!(route.method.kind, MethodKind::MobileMoney);
        assert!(route.address_pattern().is_none());
    }

    #[test]
    fn test_resolve_unknown() {
        let catalog = catalog();
        assert!(matches!(
            catalog.resolve("paypal", "x"),
            Err(LedgerError::UnknownMethod(m)) if m == "paypal"
        ));
        assert!(matches!(
            catalog.resolve("binance", "erc20"),
            Err(LedgerError::UnknownNetwork { .. })
        ));
    }

    #[test]
    fn test_inactive_entries_hidden() {
        let mut methods = default_methods();
        methods[0].active = false;
        methods[3].networks[0].active = false;
        let catalog = MethodCatalog::new(methods).unwrap();

        assert!(matches!(
            catalog.resolve("bkash", "personal"),
            Err(LedgerError::UnknownMethod(_))
        ));
        assert!(matches!(
            catalog.resolve("bitget", "trc20"),
            Err(LedgerError::UnknownNetwork { .. })
        ));

        let listed = catalog.active_methods();
        assert!(listed.iter().all(|m| m.id != "bkash"));
        let bitget = listed.iter().find(|m| m.id == "bitget").unwrap();
        assert_eq!(bitget.networks.len(), 1);
        assert_eq!(bitget.networks[0].id, "bep20");
    }

    #[test]
    fn test_network_pattern_overrides_method_pattern() {
        let mut methods = default_methods();
        methods[3].networks[1].address_pattern = Some("^0x[0-9a-fA-F]{40}$".to_string());
        let catalog = MethodCatalog::new(methods).unwrap();
        let route = catalog.resolve("bitget", "bep20").unwrap();
        assert!(route
            .address_pattern()
            .unwrap()
            .is_match("0x52908400098527886E0F7030069857D2E4169EE7"));
    }

    #[test]
    fn test_rejects_bad_catalogs() {
        let mut dup = default_methods();
        dup.push(dup[0].clone());
        assert!(matches!(
            MethodCatalog::new(dup),
            Err(CatalogError::DuplicateMethod(_))
        ));

        let mut inverted = default_methods();
        inverted[2].networks[0].min_amount = Amount::from_whole(100);
        assert!(matches!(
            MethodCatalog::new(inverted),
            Err(CatalogError::InvertedBounds { .. })
        ));

        let mut bad_pattern = default_methods();
        bad_pattern[2].address_pattern = Some("^0x[".to_string());
        assert!(matches!(
            MethodCatalog::new(bad_pattern),
            Err(CatalogError::Pattern { .. })
        ));
    }

    #[test]
    fn test_listing_serializes_camel_case() {
        let listed = catalog().active_methods();
        let json = serde_json::to_value(&listed).unwrap();
        assert_eq!(json[0]["networks"][0]["minAmount"], "50.000000");
        assert_eq!(json[0]["kind"], "mobile_money");
        assert_eq!(json[0]["mobileMoney"]["operatorPrefixes"][0], "13");
    }
}
