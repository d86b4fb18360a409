use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

/// Wire-visible aggregate return codes. External callers match on the
/// string encodings, so they must stay stable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QuoteReturnCode {
    NoShippingToSelectedCountry,
    NoShippingModuleConfigured,
    NoPostalCode,
    Error,
}

impl QuoteReturnCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoShippingToSelectedCountry => "NO_SHIPPING_TO_SELECTED_COUNTRY",
            Self::NoShippingModuleConfigured => "NO_SHIPPING_MODULE_CONFIGURED",
            Self::NoPostalCode => "NO_POSTAL_CODE",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "NO_SHIPPING_TO_SELECTED_COUNTRY" => Some(Self::NoShippingToSelectedCountry),
            "NO_SHIPPING_MODULE_CONFIGURED" => Some(Self::NoShippingModuleConfigured),
            "NO_POSTAL_CODE" => Some(Self::NoPostalCode),
            "ERROR" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteWarningKind {
    MissingPostalCode,
    ModuleFailure,
    Timeout,
}

/// A per-module problem recovered during aggregation. Warnings never fail
/// the overall quote; they exist for caller diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteWarning {
    pub module_code: String,
    pub kind: QuoteWarningKind,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingOption {
    pub module_code: String,
    pub option_code: String,
    pub price: Decimal,
    pub estimated_days: Option<u32>,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShippingQuote {
    pub options: Vec<ShippingOption>,
    pub return_code: Option<QuoteReturnCode>,
    pub free_shipping: bool,
    pub handling_fee: Decimal,
    pub selected: Option<ShippingOption>,
    pub warnings: Vec<QuoteWarning>,
}

impl ShippingQuote {
    pub fn empty_with_code(code: QuoteReturnCode) -> Self {
        Self {
            options: Vec::new(),
            return_code: Some(code),
            free_shipping: false,
            handling_fee: Decimal::ZERO,
            selected: None,
            warnings: Vec::new(),
        }
    }

    /// Marks one option as selected. Selection is explicit and caller-driven;
    /// the aggregator never auto-selects. Free shipping zeroes the price of
    /// the stored selection while the handling fee still applies.
    pub fn select(
        &mut self,
        module_code: &str,
        option_code: &str,
    ) -> Result<&ShippingOption, DomainError> {
        let option = self
            .options
            .iter()
            .find(|option| option.module_code == module_code && option.option_code == option_code)
            .ok_or_else(|| DomainError::UnknownShippingOption {
                module_code: module_code.to_string(),
                option_code: option_code.to_string(),
            })?;

        let mut selected = option.clone();
        if self.free_shipping {
            selected.price = Decimal::ZERO;
        }
        self.selected = Some(selected);

        Ok(self.selected.as_ref().unwrap_or(option))
    }

    /// Value the totals pipeline uses for the shipping stage.
    pub fn shipping_value(&self) -> Option<Decimal> {
        if self.free_shipping {
            return Some(Decimal::ZERO);
        }
        self.selected.as_ref().map(|option| option.price)
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use crate::errors::DomainError;

    use super::{QuoteReturnCode, ShippingOption, ShippingQuote};

    fn quote_with_options() -> ShippingQuote {
        ShippingQuote {
            options: vec![
                ShippingOption {
                    module_code: "flat-rate".to_string(),
                    option_code: "standard".to_string(),
                    price: Decimal::new(799, 2),
                    estimated_days: Some(5),
                    description: "Standard delivery".to_string(),
                },
                ShippingOption {
                    module_code: "table-rate".to_string(),
                    option_code: "express".to_string(),
                    price: Decimal::new(1_999, 2),
                    estimated_days: Some(2),
                    description: "Express delivery".to_string(),
                },
            ],
            return_code: None,
            free_shipping: false,
            handling_fee: Decimal::ZERO,
            selected: None,
            warnings: Vec::new(),
        }
    }

    #[test]
    fn return_codes_keep_stable_wire_strings() {
        let cases = [
            (QuoteReturnCode::NoShippingToSelectedCountry, "NO_SHIPPING_TO_SELECTED_COUNTRY"),
            (QuoteReturnCode::NoShippingModuleConfigured, "NO_SHIPPING_MODULE_CONFIGURED"),
            (QuoteReturnCode::NoPostalCode, "NO_POSTAL_CODE"),
            (QuoteReturnCode::Error, "ERROR"),
        ];

        for (code, wire) in cases {
            assert_eq!(code.as_str(), wire);
            assert_eq!(QuoteReturnCode::parse(wire), Some(code));
        }
    }

    #[test]
    fn selecting_an_option_stores_exactly_one_selection() {
        let mut quote = quote_with_options();

        quote.select("flat-rate", "standard").expect("option exists");
        quote.select("table-rate", "express").expect("reselection replaces");

        let selected = quote.selected.as_ref().expect("selection stored");
        assert_eq!(selected.module_code, "table-rate");
        assert_eq!(quote.shipping_value(), Some(Decimal::new(1_999, 2)));
    }

    #[test]
    fn free_shipping_zeroes_the_selected_price() {
        let mut quote = quote_with_options();
        quote.free_shipping = true;

        quote.select("table-rate", "express").expect("option exists");

        assert_eq!(quote.selected.as_ref().map(|option| option.price), Some(Decimal::ZERO));
        assert_eq!(quote.shipping_value(), Some(Decimal::ZERO));
    }

    #[test]
    fn selecting_an_unknown_option_is_rejected() {
        let mut quote = quote_with_options();

        let error = quote.select("flat-rate", "overnight").expect_err("unknown option");
        assert!(matches!(error, DomainError::UnknownShippingOption { .. }));
        assert_eq!(quote.selected, None);
    }
}
