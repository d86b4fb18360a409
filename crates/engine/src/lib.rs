pub mod checkout;
pub mod modules;
pub mod payment;
pub mod registry;
pub mod shipping;
pub mod telemetry;

pub use checkout::{CheckoutEngine, CheckoutError};
pub use modules::{FlatRateShipping, OfflineGateway, TableRateShipping};
pub use payment::{
    validate_card, CardDetails, CardValidationError, GatewayError, GatewayReceipt,
    GatewayTransactionState, PaymentError, PaymentGateway, PaymentInstrument,
    PaymentOrchestrator, PaymentRequest,
};
pub use registry::{ModuleRegistry, RegistryError};
pub use shipping::{ShippingAggregator, ShippingModule, ShippingModuleError};
