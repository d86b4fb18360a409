use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration as TimeDelta, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use tally_core::audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink};
use tally_core::config::CheckoutConfig;
use tally_core::domain::cart::{CustomerId, MerchantId};
use tally_core::domain::module::{ModuleConfig, ModuleKind};
use tally_core::domain::transaction::{OrderId, Transaction, TransactionId, TransactionStatus};
use tally_core::errors::DomainError;

use crate::registry::{ModuleRegistry, RegistryError};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CardValidationError {
    #[error("card holder name is blank")]
    BlankHolder,
    #[error("card number must contain only digits")]
    NonNumeric,
    #[error("card number must be 12 to 19 digits")]
    InvalidLength,
    #[error("card number failed the checksum")]
    ChecksumFailed,
    #[error("card expiry month {0} is not in 1..=12")]
    InvalidExpiryMonth(u32),
    #[error("card expired {month:02}/{year}")]
    Expired { month: u32, year: i32 },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway declined the request: {0}")]
    Declined(String),
    #[error("gateway is unreachable: {0}")]
    Unreachable(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayReceipt {
    pub reference: String,
}

/// The gateway's view of a transaction, read during reconciliation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GatewayTransactionState {
    Pending,
    Captured,
    Refunded,
    Failed,
}

/// Uniform capability interface every payment module adapter exposes.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn code(&self) -> &str;

    async fn capture(
        &self,
        transaction: &Transaction,
        config: &ModuleConfig,
    ) -> Result<GatewayReceipt, GatewayError>;

    async fn refund(
        &self,
        transaction: &Transaction,
        amount: Decimal,
        config: &ModuleConfig,
    ) -> Result<GatewayReceipt, GatewayError>;

    async fn lookup(
        &self,
        reference: &str,
        config: &ModuleConfig,
    ) -> Result<GatewayTransactionState, GatewayError>;
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CardDetails {
    pub number: String,
    pub holder: String,
    pub expiry_month: u32,
    pub expiry_year: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentInstrument {
    Card(CardDetails),
    GatewayToken(String),
}

/// What the calling layer hands over when a transaction is initialized.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub module_code: String,
    pub instrument: PaymentInstrument,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("invalid card: {0}")]
    InvalidCard(#[from] CardValidationError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("no transaction found for order `{0}`")]
    TransactionNotFound(String),
    #[error("gateway failure: {0}")]
    Gateway(#[source] GatewayError),
    #[error("gateway outcome unknown after {timeout_ms}ms; reconcile before retrying")]
    OutcomeUnknown { timeout_ms: u64 },
}

/// Card checks that run before any gateway call. Failures here never reach
/// the gateway and are a distinct error kind from gateway failures.
pub fn validate_card(card: &CardDetails, now: DateTime<Utc>) -> Result<(), CardValidationError> {
    if card.holder.trim().is_empty() {
        return Err(CardValidationError::BlankHolder);
    }

    let number: String = card.number.chars().filter(|ch| !ch.is_whitespace()).collect();
    if !number.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(CardValidationError::NonNumeric);
    }
    if !(12..=19).contains(&number.len()) {
        return Err(CardValidationError::InvalidLength);
    }
    if !luhn_valid(&number) {
        return Err(CardValidationError::ChecksumFailed);
    }

    if !(1..=12).contains(&card.expiry_month) {
        return Err(CardValidationError::InvalidExpiryMonth(card.expiry_month));
    }
    // A card is valid through the last day of its expiry month.
    if (card.expiry_year, card.expiry_month) < (now.year(), now.month()) {
        return Err(CardValidationError::Expired {
            month: card.expiry_month,
            year: card.expiry_year,
        });
    }

    Ok(())
}

fn luhn_valid(number: &str) -> bool {
    let mut sum = 0u32;
    let mut double = false;
    for ch in number.chars().rev() {
        let Some(mut digit) = ch.to_digit(10) else {
            return false;
        };
        if double {
            digit *= 2;
            if digit > 9 {
                digit -= 9;
            }
        }
        sum += digit;
        double = !double;
    }
    sum % 10 == 0
}

#[derive(Default)]
struct TransactionStore {
    by_id: HashMap<TransactionId, Arc<Mutex<Transaction>>>,
    by_order: HashMap<(OrderId, CustomerId), TransactionId>,
}

/// Drives the transaction lifecycle against the merchant's selected payment
/// module. The store index is guarded by one lock; each transaction sits
/// behind its own lock so concurrent capture/refund attempts on the same id
/// are serialized while different transactions proceed independently.
pub struct PaymentOrchestrator {
    registry: Arc<ModuleRegistry>,
    audit: Arc<dyn AuditSink>,
    idempotency_window: TimeDelta,
    gateway_timeout: Duration,
    store: Mutex<TransactionStore>,
}

impl PaymentOrchestrator {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        config: &CheckoutConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            audit,
            idempotency_window: TimeDelta::seconds(config.payment.idempotency_window_secs as i64),
            gateway_timeout: Duration::from_millis(config.payment.gateway_timeout_ms),
            store: Mutex::new(TransactionStore::default()),
        }
    }

    /// Creates an INITIALIZED transaction. Repeated calls for the same
    /// `(order, customer)` inside the idempotency window return the stored
    /// transaction instead of creating a duplicate; a FAILED transaction is
    /// always replaced by a fresh one.
    pub async fn init_transaction(
        &self,
        merchant: &MerchantId,
        order: &OrderId,
        customer: &CustomerId,
        payment: &PaymentRequest,
    ) -> Result<Transaction, PaymentError> {
        if let PaymentInstrument::Card(card) = &payment.instrument {
            validate_card(card, Utc::now())?;
        }

        self.registry.get_enabled_module(merchant, ModuleKind::Payment, &payment.module_code)?;
        self.registry.gateway(&payment.module_code)?;

        let mut store = self.store.lock().await;
        let key = (order.clone(), customer.clone());

        if let Some(existing_id) = store.by_order.get(&key) {
            if let Some(cell) = store.by_id.get(existing_id) {
                let existing = cell.lock().await.clone();
                let within_window = Utc::now() - existing.created_at <= self.idempotency_window;
                if within_window && existing.status != TransactionStatus::Failed {
                    info!(
                        event_name = "payment.transaction_reused",
                        order_id = %order.0,
                        transaction_id = %existing.id.0,
                        "idempotent init returned the existing transaction"
                    );
                    return Ok(existing);
                }
            }
        }

        let transaction = Transaction::initialize(
            order.clone(),
            customer.clone(),
            payment.amount,
            &payment.currency,
            &payment.module_code,
            Utc::now(),
        );
        store.by_id.insert(transaction.id.clone(), Arc::new(Mutex::new(transaction.clone())));
        store.by_order.insert(key, transaction.id.clone());

        info!(
            event_name = "payment.transaction_initialized",
            order_id = %order.0,
            transaction_id = %transaction.id.0,
            module_code = %transaction.module_code,
            "transaction initialized"
        );
        self.audit.emit(
            AuditEvent::new(
                Some(order.clone()),
                "payment.transaction_initialized",
                AuditCategory::Payment,
                "payment-orchestrator",
                AuditOutcome::Success,
            )
            .with_metadata("transaction_id", transaction.id.0.to_string())
            .with_metadata("amount", transaction.amount.to_string()),
        );

        Ok(transaction)
    }

    /// Captures the INITIALIZED transaction for the order. A gateway error
    /// transitions the transaction to FAILED and is surfaced verbatim; it is
    /// never retried here, since payment retries have financial consequences.
    pub async fn capture_payment(
        &self,
        merchant: &MerchantId,
        order: &OrderId,
        customer: &CustomerId,
    ) -> Result<Transaction, PaymentError> {
        let cell = self.cell_for(order, customer).await?;
        let mut transaction = cell.lock().await;

        if transaction.status != TransactionStatus::Initialized {
            return Err(DomainError::InvalidTransactionTransition {
                from: transaction.status,
                to: TransactionStatus::Captured,
            }
            .into());
        }

        let module = self.registry.get_enabled_module(
            merchant,
            ModuleKind::Payment,
            &transaction.module_code,
        )?;
        let gateway = self.registry.gateway(&transaction.module_code)?;

        match tokio::time::timeout(
            self.gateway_timeout,
            gateway.capture(&transaction, &module.config),
        )
        .await
        {
            Ok(Ok(receipt)) => {
                transaction.gateway_reference = Some(receipt.reference);
                transaction.transition_to(TransactionStatus::Captured, Utc::now())?;
                info!(
                    event_name = "payment.transaction_captured",
                    order_id = %order.0,
                    transaction_id = %transaction.id.0,
                    "payment captured"
                );
                self.emit_transition(order, &transaction, AuditOutcome::Success);
                Ok(transaction.clone())
            }
            Ok(Err(error)) => {
                transaction.transition_to(TransactionStatus::Failed, Utc::now())?;
                warn!(
                    event_name = "payment.capture_failed",
                    order_id = %order.0,
                    transaction_id = %transaction.id.0,
                    error = %error,
                    "gateway rejected the capture"
                );
                self.emit_transition(order, &transaction, AuditOutcome::Failed);
                Err(PaymentError::Gateway(error))
            }
            Err(_elapsed) => {
                // The capture may or may not have landed; leave the state
                // untouched so a reconciliation read can converge it.
                warn!(
                    event_name = "payment.capture_outcome_unknown",
                    order_id = %order.0,
                    transaction_id = %transaction.id.0,
                    "gateway did not answer within the timeout"
                );
                Err(PaymentError::OutcomeUnknown {
                    timeout_ms: self.gateway_timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Refunds part or all of a CAPTURED transaction. The amount is checked
    /// against the remaining refundable amount before the gateway is called.
    pub async fn refund(
        &self,
        merchant: &MerchantId,
        order: &OrderId,
        customer: &CustomerId,
        amount: Decimal,
    ) -> Result<Transaction, PaymentError> {
        let cell = self.cell_for(order, customer).await?;
        let mut transaction = cell.lock().await;

        if transaction.status != TransactionStatus::Captured {
            return Err(DomainError::InvalidTransactionTransition {
                from: transaction.status,
                to: TransactionStatus::Refunded,
            }
            .into());
        }
        if amount <= Decimal::ZERO || amount > transaction.refundable_amount() {
            return Err(DomainError::RefundExceedsCapture {
                requested: amount,
                available: transaction.refundable_amount(),
            }
            .into());
        }

        let module = self.registry.get_enabled_module(
            merchant,
            ModuleKind::Payment,
            &transaction.module_code,
        )?;
        let gateway = self.registry.gateway(&transaction.module_code)?;

        match tokio::time::timeout(
            self.gateway_timeout,
            gateway.refund(&transaction, amount, &module.config),
        )
        .await
        {
            Ok(Ok(_receipt)) => {
                transaction.apply_refund(amount, Utc::now())?;
                info!(
                    event_name = "payment.transaction_refunded",
                    order_id = %order.0,
                    transaction_id = %transaction.id.0,
                    amount = %amount,
                    status = transaction.status.as_str(),
                    "refund accepted"
                );
                self.emit_transition(order, &transaction, AuditOutcome::Success);
                Ok(transaction.clone())
            }
            Ok(Err(error)) => {
                transaction.transition_to(TransactionStatus::Failed, Utc::now())?;
                warn!(
                    event_name = "payment.refund_failed",
                    order_id = %order.0,
                    transaction_id = %transaction.id.0,
                    error = %error,
                    "gateway rejected the refund"
                );
                self.emit_transition(order, &transaction, AuditOutcome::Failed);
                Err(PaymentError::Gateway(error))
            }
            Err(_elapsed) => Err(PaymentError::OutcomeUnknown {
                timeout_ms: self.gateway_timeout.as_millis() as u64,
            }),
        }
    }

    /// Resolves an unknown gateway outcome by reading the gateway's view of
    /// the transaction and converging local state. Never re-submits money
    /// movement.
    pub async fn reconcile(
        &self,
        merchant: &MerchantId,
        order: &OrderId,
        customer: &CustomerId,
    ) -> Result<Transaction, PaymentError> {
        let cell = self.cell_for(order, customer).await?;
        let mut transaction = cell.lock().await;

        let Some(reference) = transaction.gateway_reference.clone() else {
            // The gateway never acknowledged this transaction; there is no
            // remote state to read.
            return Ok(transaction.clone());
        };

        let module = self.registry.get_enabled_module(
            merchant,
            ModuleKind::Payment,
            &transaction.module_code,
        )?;
        let gateway = self.registry.gateway(&transaction.module_code)?;

        let state = match tokio::time::timeout(
            self.gateway_timeout,
            gateway.lookup(&reference, &module.config),
        )
        .await
        {
            Ok(Ok(state)) => state,
            Ok(Err(error)) => return Err(PaymentError::Gateway(error)),
            Err(_elapsed) => {
                return Err(PaymentError::OutcomeUnknown {
                    timeout_ms: self.gateway_timeout.as_millis() as u64,
                })
            }
        };

        match state {
            GatewayTransactionState::Captured
                if transaction.status == TransactionStatus::Initialized =>
            {
                transaction.transition_to(TransactionStatus::Captured, Utc::now())?;
            }
            GatewayTransactionState::Refunded
                if transaction.status == TransactionStatus::Captured =>
            {
                let remaining = transaction.refundable_amount();
                transaction.apply_refund(remaining, Utc::now())?;
            }
            GatewayTransactionState::Failed
                if transaction.status == TransactionStatus::Initialized =>
            {
                transaction.transition_to(TransactionStatus::Failed, Utc::now())?;
            }
            _ => {}
        }

        info!(
            event_name = "payment.transaction_reconciled",
            order_id = %order.0,
            transaction_id = %transaction.id.0,
            status = transaction.status.as_str(),
            "transaction reconciled against the gateway"
        );
        Ok(transaction.clone())
    }

    pub async fn find_transaction(
        &self,
        order: &OrderId,
        customer: &CustomerId,
    ) -> Option<Transaction> {
        let cell = self.cell_for(order, customer).await.ok()?;
        let transaction = cell.lock().await;
        Some(transaction.clone())
    }

    async fn cell_for(
        &self,
        order: &OrderId,
        customer: &CustomerId,
    ) -> Result<Arc<Mutex<Transaction>>, PaymentError> {
        let store = self.store.lock().await;
        let id = store
            .by_order
            .get(&(order.clone(), customer.clone()))
            .ok_or_else(|| PaymentError::TransactionNotFound(order.0.clone()))?;
        store
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| PaymentError::TransactionNotFound(order.0.clone()))
    }

    fn emit_transition(&self, order: &OrderId, transaction: &Transaction, outcome: AuditOutcome) {
        self.audit.emit(
            AuditEvent::new(
                Some(order.clone()),
                "payment.transaction_transition",
                AuditCategory::Payment,
                "payment-orchestrator",
                outcome,
            )
            .with_metadata("transaction_id", transaction.id.0.to_string())
            .with_metadata("status", transaction.status.as_str()),
        );
    }
}
