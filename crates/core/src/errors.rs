use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::transaction::TransactionStatus;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid transaction transition from {from:?} to {to:?}")]
    InvalidTransactionTransition { from: TransactionStatus, to: TransactionStatus },
    #[error("cart has no line items")]
    EmptyCart,
    #[error("cart line `{sku}` has zero quantity")]
    ZeroQuantityLine { sku: String },
    #[error("invalid module config value for `{key}`: `{value}`")]
    InvalidModuleConfig { key: String, value: String },
    #[error("rule set not found: `{0}`")]
    RuleSetNotFound(String),
    #[error("rule set document is malformed: {0}")]
    RuleSetDocument(String),
    #[error("discount fraction {0} is outside [0, 1]")]
    DiscountFractionOutOfRange(Decimal),
    #[error("refund of {requested} exceeds refundable amount {available}")]
    RefundExceedsCapture { requested: Decimal, available: Decimal },
    #[error("shipping option `{option_code}` from module `{module_code}` is not in the quote")]
    UnknownShippingOption { module_code: String, option_code: String },
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}
