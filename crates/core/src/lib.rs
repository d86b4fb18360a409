pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod rules;
pub mod totals;

pub use audit::{AuditCategory, AuditEvent, AuditOutcome, AuditSink, DiscardAuditSink, InMemoryAuditSink};
pub use config::{CheckoutConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
pub use domain::cart::{Cart, CartLine, Customer, CustomerId, DeliveryAddress, MerchantId};
pub use domain::module::{IntegrationModule, ModuleConfig, ModuleKind};
pub use domain::shipping::{
    QuoteReturnCode, QuoteWarning, QuoteWarningKind, ShippingOption, ShippingQuote,
};
pub use domain::totals::{grand_total, OrderTotal, TotalKind};
pub use domain::transaction::{OrderId, Transaction, TransactionId, TransactionStatus};
pub use errors::DomainError;
pub use rules::{
    FactLine, PromoRule, RuleCondition, RuleDecision, RuleFact, RuleOutcome, RuleSet, RuleSetStore,
};
pub use totals::{compute_totals, TotalsInput, TotalsOutcome, PROMO_RULE_SET};
