use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::{debug, warn};

use tally_core::config::CheckoutConfig;
use tally_core::domain::cart::{Cart, DeliveryAddress, MerchantId};
use tally_core::domain::module::{ModuleConfig, ModuleKind};
use tally_core::domain::shipping::{
    QuoteReturnCode, QuoteWarning, QuoteWarningKind, ShippingOption, ShippingQuote,
};

use crate::registry::ModuleRegistry;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ShippingModuleError {
    #[error("carrier rejected the request: {0}")]
    Rejected(String),
    #[error("carrier is unreachable: {0}")]
    Unreachable(String),
}

/// Uniform capability interface every shipping module adapter exposes.
/// Adapters receive the merchant's opaque config blob and never see the
/// registry or each other.
#[async_trait]
pub trait ShippingModule: Send + Sync {
    fn code(&self) -> &str;

    fn requires_postal_code(&self) -> bool {
        true
    }

    async fn quote(
        &self,
        cart: &Cart,
        address: &DeliveryAddress,
        config: &ModuleConfig,
    ) -> Result<Vec<ShippingOption>, ShippingModuleError>;
}

/// Fans a quote request out to every enabled, applicable shipping module,
/// one task per module, and merges the results deterministically. A module
/// failure or timeout is recovered into a warning on the quote and never
/// aborts the sibling calls.
pub struct ShippingAggregator {
    registry: Arc<ModuleRegistry>,
    module_timeout: Duration,
    free_shipping_threshold: Option<Decimal>,
    handling_fee: Decimal,
}

impl ShippingAggregator {
    pub fn new(registry: Arc<ModuleRegistry>, config: &CheckoutConfig) -> Self {
        Self {
            registry,
            module_timeout: Duration::from_millis(config.shipping.module_timeout_ms),
            free_shipping_threshold: config.pricing.free_shipping_threshold,
            handling_fee: config.pricing.handling_fee,
        }
    }

    pub async fn quote(
        &self,
        merchant: &MerchantId,
        cart: &Cart,
        address: &DeliveryAddress,
    ) -> ShippingQuote {
        let modules = self.registry.enabled_modules(merchant, ModuleKind::Shipping);
        if modules.is_empty() {
            debug!(
                event_name = "shipping.no_modules_configured",
                merchant = %merchant.0,
                "no enabled shipping modules for merchant"
            );
            return ShippingQuote::empty_with_code(QuoteReturnCode::NoShippingModuleConfigured);
        }

        let mut warnings = Vec::new();
        let mut eligible = Vec::new();
        for module in modules {
            let adapter = match self.registry.shipping_adapter(&module.code) {
                Ok(adapter) => adapter,
                Err(error) => {
                    warn!(
                        event_name = "shipping.adapter_missing",
                        module_code = %module.code,
                        "shipping module has no bound adapter"
                    );
                    warnings.push(QuoteWarning {
                        module_code: module.code.clone(),
                        kind: QuoteWarningKind::ModuleFailure,
                        message: error.to_string(),
                    });
                    continue;
                }
            };

            if adapter.requires_postal_code() && address.postal_code().is_none() {
                warnings.push(QuoteWarning {
                    module_code: module.code.clone(),
                    kind: QuoteWarningKind::MissingPostalCode,
                    message: "delivery address has no postal code".to_string(),
                });
                continue;
            }

            eligible.push((module.clone(), adapter));
        }

        if eligible.is_empty() {
            // Only when every module was skipped for a missing postal code
            // does the whole quote carry NO_POSTAL_CODE.
            let all_postal = !warnings.is_empty()
                && warnings.iter().all(|warning| warning.kind == QuoteWarningKind::MissingPostalCode);
            let code = if all_postal {
                QuoteReturnCode::NoPostalCode
            } else {
                QuoteReturnCode::NoShippingToSelectedCountry
            };
            let mut quote = ShippingQuote::empty_with_code(code);
            quote.warnings = warnings;
            return quote;
        }

        let mut tasks = Vec::with_capacity(eligible.len());
        for (module, adapter) in eligible {
            let cart = cart.clone();
            let address = address.clone();
            let timeout = self.module_timeout;
            let code = module.code.clone();
            let handle = tokio::spawn(async move {
                tokio::time::timeout(timeout, adapter.quote(&cart, &address, &module.config)).await
            });
            tasks.push((code, handle));
        }

        let mut options = Vec::new();
        for (code, handle) in tasks {
            match handle.await {
                Ok(Ok(Ok(quoted))) => {
                    for option in quoted {
                        if option.price < Decimal::ZERO {
                            warnings.push(QuoteWarning {
                                module_code: code.clone(),
                                kind: QuoteWarningKind::ModuleFailure,
                                message: format!(
                                    "option `{}` dropped: negative price {}",
                                    option.option_code, option.price
                                ),
                            });
                            continue;
                        }
                        // Stamp the module code so every option references
                        // the module that produced it.
                        options.push(ShippingOption { module_code: code.clone(), ..option });
                    }
                }
                Ok(Ok(Err(error))) => {
                    warn!(
                        event_name = "shipping.module_failed",
                        module_code = %code,
                        error = %error,
                        "shipping module call failed"
                    );
                    warnings.push(QuoteWarning {
                        module_code: code.clone(),
                        kind: QuoteWarningKind::ModuleFailure,
                        message: error.to_string(),
                    });
                }
                Ok(Err(_elapsed)) => {
                    warn!(
                        event_name = "shipping.module_timed_out",
                        module_code = %code,
                        timeout_ms = self.module_timeout.as_millis() as u64,
                        "shipping module call timed out"
                    );
                    warnings.push(QuoteWarning {
                        module_code: code.clone(),
                        kind: QuoteWarningKind::Timeout,
                        message: format!(
                            "no response within {}ms",
                            self.module_timeout.as_millis()
                        ),
                    });
                }
                Err(join_error) => {
                    warnings.push(QuoteWarning {
                        module_code: code.clone(),
                        kind: QuoteWarningKind::ModuleFailure,
                        message: format!("module task aborted: {join_error}"),
                    });
                }
            }
        }

        options.sort_by(|a, b| {
            a.module_code
                .cmp(&b.module_code)
                .then(a.price.cmp(&b.price))
                .then(a.option_code.cmp(&b.option_code))
        });

        let free_shipping = self
            .free_shipping_threshold
            .map_or(false, |threshold| cart.subtotal() >= threshold);

        let return_code =
            options.is_empty().then_some(QuoteReturnCode::NoShippingToSelectedCountry);

        ShippingQuote {
            options,
            return_code,
            free_shipping,
            handling_fee: self.handling_fee,
            selected: None,
            warnings,
        }
    }
}
