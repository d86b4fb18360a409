use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MerchantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub email: String,
    pub billing_country: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cart {
    pub lines: Vec<CartLine>,
    pub promo_code: Option<String>,
    pub currency: String,
}

impl Cart {
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.lines.is_empty() {
            return Err(DomainError::EmptyCart);
        }

        for line in &self.lines {
            if line.quantity == 0 {
                return Err(DomainError::ZeroQuantityLine { sku: line.sku.clone() });
            }
        }

        Ok(())
    }

    pub fn promo_code(&self) -> Option<&str> {
        self.promo_code.as_deref().map(str::trim).filter(|code| !code.is_empty())
    }
}

/// Destination the shipping modules quote against. Postal code stays
/// optional here; modules that require one are skipped by the aggregator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAddress {
    pub line1: String,
    pub city: String,
    pub state_province: Option<String>,
    pub postal_code: Option<String>,
    pub country: String,
}

impl DeliveryAddress {
    pub fn postal_code(&self) -> Option<&str> {
        self.postal_code.as_deref().map(str::trim).filter(|code| !code.is_empty())
    }
}
