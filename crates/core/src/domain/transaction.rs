use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::cart::CustomerId;
use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub Uuid);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Initialized,
    Captured,
    Refunded,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "INITIALIZED",
            Self::Captured => "CAPTURED",
            Self::Refunded => "REFUNDED",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "INITIALIZED" => Some(Self::Initialized),
            "CAPTURED" => Some(Self::Captured),
            "REFUNDED" => Some(Self::Refunded),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Record of a single payment attempt. Transitions are one-directional:
/// a REFUNDED transaction is terminal and a FAILED one can only be replaced
/// by creating a new transaction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub status: TransactionStatus,
    pub amount: Decimal,
    pub refunded_amount: Decimal,
    pub currency: String,
    pub module_code: String,
    pub gateway_reference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    pub fn initialize(
        order_id: OrderId,
        customer_id: CustomerId,
        amount: Decimal,
        currency: impl Into<String>,
        module_code: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId(Uuid::new_v4()),
            order_id,
            customer_id,
            status: TransactionStatus::Initialized,
            amount,
            refunded_amount: Decimal::ZERO,
            currency: currency.into(),
            module_code: module_code.into(),
            gateway_reference: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::{Captured, Failed, Initialized, Refunded};

        matches!(
            (self.status, next),
            (Initialized, Captured) | (Initialized, Failed) | (Captured, Refunded) | (Captured, Failed)
        )
    }

    pub fn transition_to(
        &mut self,
        next: TransactionStatus,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if !self.can_transition_to(next) {
            return Err(DomainError::InvalidTransactionTransition { from: self.status, to: next });
        }

        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    pub fn refundable_amount(&self) -> Decimal {
        self.amount - self.refunded_amount
    }

    /// Applies a refund that the gateway already accepted. Partial refunds
    /// accumulate and keep the transaction CAPTURED; the covering refund
    /// transitions it to REFUNDED.
    pub fn apply_refund(&mut self, amount: Decimal, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.status != TransactionStatus::Captured {
            return Err(DomainError::InvalidTransactionTransition {
                from: self.status,
                to: TransactionStatus::Refunded,
            });
        }

        if amount <= Decimal::ZERO || amount > self.refundable_amount() {
            return Err(DomainError::RefundExceedsCapture {
                requested: amount,
                available: self.refundable_amount(),
            });
        }

        self.refunded_amount += amount;
        if self.refunded_amount == self.amount {
            self.transition_to(TransactionStatus::Refunded, now)?;
        } else {
            self.updated_at = now;
        }

        Ok(())
    }
}
