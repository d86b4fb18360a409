//! Built-in offline module adapters. These run entirely from the module's
//! configuration blob, which makes them usable in tests and in deployments
//! that sell with static rates, without any carrier or gateway client.

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use tally_core::domain::cart::{Cart, DeliveryAddress};
use tally_core::domain::module::ModuleConfig;
use tally_core::domain::shipping::ShippingOption;
use tally_core::domain::transaction::Transaction;

use crate::payment::{GatewayError, GatewayReceipt, GatewayTransactionState, PaymentGateway};
use crate::shipping::{ShippingModule, ShippingModuleError};

/// One price for every destination. Config keys: `price` (required),
/// `estimated_days`, `description`.
pub struct FlatRateShipping;

impl FlatRateShipping {
    pub const CODE: &'static str = "flat-rate";
}

#[async_trait]
impl ShippingModule for FlatRateShipping {
    fn code(&self) -> &str {
        Self::CODE
    }

    fn requires_postal_code(&self) -> bool {
        false
    }

    async fn quote(
        &self,
        _cart: &Cart,
        _address: &DeliveryAddress,
        config: &ModuleConfig,
    ) -> Result<Vec<ShippingOption>, ShippingModuleError> {
        let price = config
            .decimal("price")
            .map_err(|error| ShippingModuleError::Rejected(error.to_string()))?
            .ok_or_else(|| ShippingModuleError::Rejected("missing `price`".to_string()))?;
        let estimated_days = config
            .integer("estimated_days")
            .map_err(|error| ShippingModuleError::Rejected(error.to_string()))?;

        Ok(vec![ShippingOption {
            module_code: Self::CODE.to_string(),
            option_code: "standard".to_string(),
            price,
            estimated_days,
            description: config.get("description").unwrap_or("Flat rate delivery").to_string(),
        }])
    }
}

/// Per-country rate table. Config keys: `rate.<COUNTRY>` (price),
/// `days.<COUNTRY>` (optional estimate). A country with no entry produces
/// no options, which the aggregator treats as "no shipping there", not as
/// an error.
pub struct TableRateShipping;

impl TableRateShipping {
    pub const CODE: &'static str = "table-rate";
}

#[async_trait]
impl ShippingModule for TableRateShipping {
    fn code(&self) -> &str {
        Self::CODE
    }

    async fn quote(
        &self,
        _cart: &Cart,
        address: &DeliveryAddress,
        config: &ModuleConfig,
    ) -> Result<Vec<ShippingOption>, ShippingModuleError> {
        let country = address.country.trim().to_ascii_uppercase();
        let rate_key = format!("rate.{country}");
        if config.get(&rate_key).is_none() {
            return Ok(Vec::new());
        }

        let price = config
            .decimal(&rate_key)
            .map_err(|error| ShippingModuleError::Rejected(error.to_string()))?
            .unwrap_or(Decimal::ZERO);
        let estimated_days = config
            .integer(&format!("days.{country}"))
            .map_err(|error| ShippingModuleError::Rejected(error.to_string()))?;

        Ok(vec![ShippingOption {
            module_code: Self::CODE.to_string(),
            option_code: "ground".to_string(),
            price,
            estimated_days,
            description: format!("Ground delivery ({country})"),
        }])
    }
}

/// Gateway that settles everything locally. `simulate = "decline"` or
/// `simulate = "outage"` in the module config forces the corresponding
/// failure, which is how tests exercise the FAILED path.
pub struct OfflineGateway;

impl OfflineGateway {
    pub const CODE: &'static str = "offline";

    fn simulated_failure(config: &ModuleConfig) -> Option<GatewayError> {
        match config.get("simulate") {
            Some("decline") => Some(GatewayError::Declined("simulated decline".to_string())),
            Some("outage") => Some(GatewayError::Unreachable("simulated outage".to_string())),
            _ => None,
        }
    }
}

#[async_trait]
impl PaymentGateway for OfflineGateway {
    fn code(&self) -> &str {
        Self::CODE
    }

    async fn capture(
        &self,
        _transaction: &Transaction,
        config: &ModuleConfig,
    ) -> Result<GatewayReceipt, GatewayError> {
        if let Some(error) = Self::simulated_failure(config) {
            return Err(error);
        }
        Ok(GatewayReceipt { reference: format!("off-{}", Uuid::new_v4().simple()) })
    }

    async fn refund(
        &self,
        _transaction: &Transaction,
        _amount: Decimal,
        config: &ModuleConfig,
    ) -> Result<GatewayReceipt, GatewayError> {
        if let Some(error) = Self::simulated_failure(config) {
            return Err(error);
        }
        Ok(GatewayReceipt { reference: format!("off-{}", Uuid::new_v4().simple()) })
    }

    async fn lookup(
        &self,
        reference: &str,
        _config: &ModuleConfig,
    ) -> Result<GatewayTransactionState, GatewayError> {
        if reference.starts_with("off-") {
            return Ok(GatewayTransactionState::Captured);
        }
        Err(GatewayError::Unreachable(format!("unknown reference `{reference}`")))
    }
}
