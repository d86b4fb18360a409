use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use tally_core::domain::cart::MerchantId;
use tally_core::domain::module::{IntegrationModule, ModuleConfig, ModuleKind};

use crate::payment::PaymentGateway;
use crate::shipping::ShippingModule;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("module `{code}` is not configured for merchant `{merchant}`")]
    ModuleNotFound { merchant: String, code: String },
    #[error("module `{code}` is disabled for merchant `{merchant}`")]
    ModuleDisabled { merchant: String, code: String },
    #[error("no adapter is bound for module `{code}`")]
    AdapterNotBound { code: String },
}

#[derive(Clone, PartialEq, Eq, Hash)]
struct ModuleKey {
    merchant: MerchantId,
    kind: ModuleKind,
    code: String,
}

/// Explicit in-process registry of merchant-configured modules and the
/// adapter implementations bound to their codes. Populated at startup and
/// immutable afterwards, so it can be shared across concurrent requests
/// without locking.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<ModuleKey, IntegrationModule>,
    shipping_adapters: HashMap<String, Arc<dyn ShippingModule>>,
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, merchant: MerchantId, module: IntegrationModule) -> Self {
        let key = ModuleKey { merchant, kind: module.kind, code: module.code.clone() };
        self.modules.insert(key, module);
        self
    }

    pub fn with_shipping_adapter(mut self, adapter: Arc<dyn ShippingModule>) -> Self {
        self.shipping_adapters.insert(adapter.code().to_string(), adapter);
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(gateway.code().to_string(), gateway);
        self
    }

    /// All modules of a kind for a merchant, sorted by code so repeated
    /// listings are deterministic.
    pub fn list_modules(&self, merchant: &MerchantId, kind: ModuleKind) -> Vec<&IntegrationModule> {
        let mut modules: Vec<&IntegrationModule> = self
            .modules
            .iter()
            .filter(|(key, _)| key.merchant == *merchant && key.kind == kind)
            .map(|(_, module)| module)
            .collect();
        modules.sort_by(|a, b| a.code.cmp(&b.code));
        modules
    }

    /// Enabled modules only; disabled modules are never handed to an
    /// aggregator.
    pub fn enabled_modules(
        &self,
        merchant: &MerchantId,
        kind: ModuleKind,
    ) -> Vec<&IntegrationModule> {
        self.list_modules(merchant, kind).into_iter().filter(|module| module.enabled).collect()
    }

    pub fn get_module(
        &self,
        merchant: &MerchantId,
        kind: ModuleKind,
        code: &str,
    ) -> Result<&IntegrationModule, RegistryError> {
        let key = ModuleKey { merchant: merchant.clone(), kind, code: code.to_string() };
        self.modules.get(&key).ok_or_else(|| RegistryError::ModuleNotFound {
            merchant: merchant.0.clone(),
            code: code.to_string(),
        })
    }

    pub fn get_enabled_module(
        &self,
        merchant: &MerchantId,
        kind: ModuleKind,
        code: &str,
    ) -> Result<&IntegrationModule, RegistryError> {
        let module = self.get_module(merchant, kind, code)?;
        if !module.enabled {
            return Err(RegistryError::ModuleDisabled {
                merchant: merchant.0.clone(),
                code: code.to_string(),
            });
        }
        Ok(module)
    }

    pub fn get_configuration(
        &self,
        merchant: &MerchantId,
        kind: ModuleKind,
        code: &str,
    ) -> Result<&ModuleConfig, RegistryError> {
        self.get_module(merchant, kind, code).map(|module| &module.config)
    }

    pub fn shipping_adapter(&self, code: &str) -> Result<Arc<dyn ShippingModule>, RegistryError> {
        self.shipping_adapters
            .get(code)
            .cloned()
            .ok_or_else(|| RegistryError::AdapterNotBound { code: code.to_string() })
    }

    pub fn gateway(&self, code: &str) -> Result<Arc<dyn PaymentGateway>, RegistryError> {
        self.gateways
            .get(code)
            .cloned()
            .ok_or_else(|| RegistryError::AdapterNotBound { code: code.to_string() })
    }
}
