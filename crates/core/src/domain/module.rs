use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    Shipping,
    Payment,
    Tax,
    Promotion,
}

impl ModuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shipping => "shipping",
            Self::Payment => "payment",
            Self::Tax => "tax",
            Self::Promotion => "promotion",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "shipping" => Some(Self::Shipping),
            "payment" => Some(Self::Payment),
            "tax" => Some(Self::Tax),
            "promotion" => Some(Self::Promotion),
            _ => None,
        }
    }
}

/// Opaque per-module configuration blob. Adapters read their own keys;
/// the engine never interprets the contents beyond the typed accessors.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleConfig(pub BTreeMap<String, String>);

impl ModuleConfig {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn decimal(&self, key: &str) -> Result<Option<Decimal>, DomainError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(raw) => Decimal::from_str(raw.trim())
                .map(Some)
                .map_err(|_| DomainError::InvalidModuleConfig {
                    key: key.to_string(),
                    value: raw.clone(),
                }),
        }
    }

    pub fn integer(&self, key: &str) -> Result<Option<u32>, DomainError> {
        match self.0.get(key) {
            None => Ok(None),
            Some(raw) => raw.trim().parse::<u32>().map(Some).map_err(|_| {
                DomainError::InvalidModuleConfig { key: key.to_string(), value: raw.clone() }
            }),
        }
    }

    pub fn with_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }
}

/// A merchant-configured external capability. The engine treats the record
/// as read-only; merchant administration owns creation and updates.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationModule {
    pub code: String,
    pub kind: ModuleKind,
    pub enabled: bool,
    pub config: ModuleConfig,
}

impl IntegrationModule {
    pub fn new(code: impl Into<String>, kind: ModuleKind) -> Self {
        Self { code: code.into(), kind, enabled: true, config: ModuleConfig::default() }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn with_config(mut self, config: ModuleConfig) -> Self {
        self.config = config;
        self
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::errors::DomainError;

    use super::{ModuleConfig, ModuleKind};

    #[test]
    fn module_kind_round_trips_from_storage_encoding() {
        let cases =
            [ModuleKind::Shipping, ModuleKind::Payment, ModuleKind::Tax, ModuleKind::Promotion];

        for kind in cases {
            assert_eq!(ModuleKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn decimal_accessor_parses_configured_value() {
        let config = ModuleConfig::default().with_entry("price", "4.50");

        assert_eq!(config.decimal("price").expect("price parses"), Some(Decimal::new(450, 2)));
        assert_eq!(config.decimal("missing").expect("missing key is None"), None);
    }

    #[test]
    fn malformed_decimal_is_a_typed_error() {
        let config = ModuleConfig::default().with_entry("price", "four-fifty");

        let error = config.decimal("price").expect_err("non-numeric price must fail");
        assert!(matches!(error, DomainError::InvalidModuleConfig { key, .. } if key == "price"));
    }
}
