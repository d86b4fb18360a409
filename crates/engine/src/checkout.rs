use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::info;

use tally_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use tally_core::config::CheckoutConfig;
use tally_core::domain::cart::{Cart, Customer, CustomerId, DeliveryAddress, MerchantId};
use tally_core::domain::shipping::{ShippingOption, ShippingQuote};
use tally_core::domain::transaction::{OrderId, Transaction};
use tally_core::errors::DomainError;
use tally_core::rules::RuleSetStore;
use tally_core::totals::{compute_totals, TotalsInput, TotalsOutcome};

use crate::payment::{PaymentError, PaymentOrchestrator, PaymentRequest};
use crate::registry::ModuleRegistry;
use crate::shipping::ShippingAggregator;

#[derive(Debug, Error)]
pub enum CheckoutError {
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

/// The exposed API of the engine: quote aggregation, explicit option
/// selection, total computation, and the transaction lifecycle. One
/// immutable component wired from the registry, the rule store, and the
/// merchant configuration.
pub struct CheckoutEngine {
    config: CheckoutConfig,
    rules: Arc<RuleSetStore>,
    audit: Arc<dyn AuditSink>,
    aggregator: ShippingAggregator,
    payments: PaymentOrchestrator,
}

impl CheckoutEngine {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        rules: Arc<RuleSetStore>,
        config: CheckoutConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let aggregator = ShippingAggregator::new(registry.clone(), &config);
        let payments = PaymentOrchestrator::new(registry, &config, audit.clone());
        Self { config, rules, audit, aggregator, payments }
    }

    pub async fn get_shipping_quote(
        &self,
        merchant: &MerchantId,
        cart: &Cart,
        address: &DeliveryAddress,
    ) -> Result<ShippingQuote, CheckoutError> {
        cart.validate()?;

        let quote = self.aggregator.quote(merchant, cart, address).await;
        info!(
            event_name = "checkout.quote_aggregated",
            merchant = %merchant.0,
            option_count = quote.options.len(),
            return_code = quote.return_code.map(|code| code.as_str()).unwrap_or("OK"),
            "shipping quote aggregated"
        );
        self.audit.emit(
            AuditEvent::new(
                None,
                "checkout.quote_aggregated",
                AuditCategory::Quote,
                "checkout-engine",
                AuditOutcome::Success,
            )
            .with_metadata("option_count", quote.options.len().to_string())
            .with_metadata(
                "return_code",
                quote.return_code.map(|code| code.as_str()).unwrap_or("OK"),
            ),
        );

        Ok(quote)
    }

    pub fn select_shipping_option(
        &self,
        quote: &mut ShippingQuote,
        module_code: &str,
        option_code: &str,
    ) -> Result<ShippingOption, CheckoutError> {
        Ok(quote.select(module_code, option_code)?.clone())
    }

    pub fn compute_order_total(
        &self,
        cart: &Cart,
        quote: &ShippingQuote,
        customer: &Customer,
    ) -> Result<TotalsOutcome, CheckoutError> {
        let outcome = compute_totals(&TotalsInput {
            cart,
            quote,
            customer,
            pricing: &self.config.pricing,
            rules: &self.rules,
            evaluated_at: Utc::now(),
        })?;

        info!(
            event_name = "checkout.totals_computed",
            total = %outcome.total,
            entry_count = outcome.entries.len(),
            warning_count = outcome.warnings.len(),
            "order total computed"
        );
        self.audit.emit(
            AuditEvent::new(
                None,
                "checkout.totals_computed",
                AuditCategory::Totals,
                "checkout-engine",
                AuditOutcome::Success,
            )
            .with_metadata("total", outcome.total.to_string())
            .with_metadata("entry_count", outcome.entries.len().to_string()),
        );

        Ok(outcome)
    }

    pub async fn init_transaction(
        &self,
        merchant: &MerchantId,
        order: &OrderId,
        customer: &CustomerId,
        payment: &PaymentRequest,
    ) -> Result<Transaction, CheckoutError> {
        Ok(self.payments.init_transaction(merchant, order, customer, payment).await?)
    }

    pub async fn capture_payment(
        &self,
        merchant: &MerchantId,
        order: &OrderId,
        customer: &CustomerId,
    ) -> Result<Transaction, CheckoutError> {
        Ok(self.payments.capture_payment(merchant, order, customer).await?)
    }

    pub async fn refund(
        &self,
        merchant: &MerchantId,
        order: &OrderId,
        customer: &CustomerId,
        amount: Decimal,
    ) -> Result<Transaction, CheckoutError> {
        Ok(self.payments.refund(merchant, order, customer, amount).await?)
    }

    pub async fn reconcile(
        &self,
        merchant: &MerchantId,
        order: &OrderId,
        customer: &CustomerId,
    ) -> Result<Transaction, CheckoutError> {
        Ok(self.payments.reconcile(merchant, order, customer).await?)
    }

    pub async fn find_transaction(
        &self,
        order: &OrderId,
        customer: &CustomerId,
    ) -> Option<Transaction> {
        self.payments.find_transaction(order, customer).await
    }
}
