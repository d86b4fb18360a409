use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TotalKind {
    Subtotal,
    Shipping,
    Handling,
    Discount,
    Tax,
}

impl TotalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Subtotal => "SUBTOTAL",
            Self::Shipping => "SHIPPING",
            Self::Handling => "HANDLING",
            Self::Discount => "DISCOUNT",
            Self::Tax => "TAX",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "SUBTOTAL" => Some(Self::Subtotal),
            "SHIPPING" => Some(Self::Shipping),
            "HANDLING" => Some(Self::Handling),
            "DISCOUNT" => Some(Self::Discount),
            "TAX" => Some(Self::Tax),
            _ => None,
        }
    }
}

/// One signed adjustment contributing to the final order total. Discount
/// entries carry negative values; everything else is non-negative.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderTotal {
    pub kind: TotalKind,
    pub code: String,
    pub value: Decimal,
    pub description: String,
}

impl OrderTotal {
    pub fn new(
        kind: TotalKind,
        code: impl Into<String>,
        value: Decimal,
        description: impl Into<String>,
    ) -> Self {
        Self { kind, code: code.into(), value, description: description.into() }
    }
}

pub fn grand_total(entries: &[OrderTotal]) -> Decimal {
    entries.iter().map(|entry| entry.value).sum()
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{grand_total, OrderTotal, TotalKind};

    #[test]
    fn total_kind_round_trips_from_wire_encoding() {
        let cases = [
            TotalKind::Subtotal,
            TotalKind::Shipping,
            TotalKind::Handling,
            TotalKind::Discount,
            TotalKind::Tax,
        ];

        for kind in cases {
            assert_eq!(TotalKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn grand_total_sums_signed_entries() {
        let entries = vec![
            OrderTotal::new(TotalKind::Subtotal, "subtotal", Decimal::new(10_000, 2), "Subtotal"),
            OrderTotal::new(TotalKind::Discount, "SAVE10", Decimal::new(-1_000, 2), "Promo"),
            OrderTotal::new(TotalKind::Tax, "tax", Decimal::new(720, 2), "Tax"),
        ];

        assert_eq!(grand_total(&entries), Decimal::new(9_720, 2));
    }
}
