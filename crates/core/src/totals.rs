use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::config::PricingConfig;
use crate::domain::cart::{Cart, Customer};
use crate::domain::shipping::ShippingQuote;
use crate::domain::totals::{grand_total, OrderTotal, TotalKind};
use crate::errors::DomainError;
use crate::rules::{RuleFact, RuleSetStore};

/// Rule set consulted by the promotion discount stage.
pub const PROMO_RULE_SET: &str = "PromoCoupon";

#[derive(Clone, Debug)]
pub struct TotalsInput<'a> {
    pub cart: &'a Cart,
    pub quote: &'a ShippingQuote,
    pub customer: &'a Customer,
    pub pricing: &'a PricingConfig,
    pub rules: &'a RuleSetStore,
    pub evaluated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TotalsOutcome {
    pub entries: Vec<OrderTotal>,
    pub total: Decimal,
    pub warnings: Vec<String>,
}

/// Runs the fixed stage order: subtotal, shipping, handling, promotion
/// discount, tax. Later stages read the running values of earlier ones, so
/// the order never changes at runtime. Only cart validation hard-fails;
/// every stage-level problem is recovered into a warning.
pub fn compute_totals(input: &TotalsInput<'_>) -> Result<TotalsOutcome, DomainError> {
    input.cart.validate()?;

    let mut entries = Vec::new();
    let mut warnings = Vec::new();

    let subtotal = round_currency(input.cart.subtotal());
    entries.push(OrderTotal::new(TotalKind::Subtotal, "subtotal", subtotal, "Cart subtotal"));

    let mut shipping_value = Decimal::ZERO;
    match input.quote.shipping_value() {
        Some(value) => {
            shipping_value = round_currency(value);
            let code = input
                .quote
                .selected
                .as_ref()
                .map(|option| option.module_code.clone())
                .unwrap_or_else(|| "shipping".to_string());
            entries.push(OrderTotal::new(TotalKind::Shipping, code, shipping_value, "Shipping"));
        }
        None => {
            warnings.push("no shipping option selected; shipping stage skipped".to_string());
        }
    }

    if input.quote.handling_fee > Decimal::ZERO {
        entries.push(OrderTotal::new(
            TotalKind::Handling,
            "handling",
            round_currency(input.quote.handling_fee),
            "Handling fee",
        ));
    }

    let mut discount_value = Decimal::ZERO;
    if let Some(promo_code) = input.cart.promo_code() {
        match input.rules.get(PROMO_RULE_SET) {
            // Fail-open: an unavailable rule set must never block checkout.
            Err(error) => {
                warnings.push(format!("discount stage skipped: {error}"));
            }
            Ok(set) => {
                let facts = RuleFact::from_cart(input.cart, promo_code, input.evaluated_at);
                let decision = set.evaluate(&facts);

                if let Some(amount) = decision.discount_amount.filter(|_| decision.applicable) {
                    let rounded = round_currency(amount);
                    if rounded > Decimal::ZERO {
                        discount_value = -rounded;
                        let code = decision.rule_code.unwrap_or_else(|| promo_code.to_string());
                        entries.push(OrderTotal::new(
                            TotalKind::Discount,
                            code,
                            discount_value,
                            "Promotion discount",
                        ));
                    }
                }
            }
        }
    }

    if input.pricing.tax_rate_pct > Decimal::ZERO {
        let mut taxable = subtotal + discount_value;
        if input.pricing.tax_on_shipping {
            taxable += shipping_value;
        }

        if taxable > Decimal::ZERO {
            let tax =
                round_currency(taxable * input.pricing.tax_rate_pct / Decimal::new(100, 0));
            entries.push(OrderTotal::new(
                TotalKind::Tax,
                "tax",
                tax,
                format!("Tax at {}%", input.pricing.tax_rate_pct),
            ));
        }
    }

    Ok(TotalsOutcome { total: grand_total(&entries), entries, warnings })
}

/// Single rounding step to currency precision; everything upstream stays
/// at full decimal precision.
fn round_currency(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use crate::config::PricingConfig;
    use crate::domain::cart::{Cart, CartLine, Customer, CustomerId};
    use crate::domain::shipping::{ShippingOption, ShippingQuote};
    use crate::domain::totals::TotalKind;
    use crate::errors::DomainError;
    use crate::rules::{PromoRule, RuleCondition, RuleOutcome, RuleSet, RuleSetStore};

    use super::{compute_totals, TotalsInput, PROMO_RULE_SET};

    fn cart(unit_price: Decimal, quantity: u32, promo_code: Option<&str>) -> Cart {
        Cart {
            lines: vec![CartLine { sku: "SKU-1".to_string(), quantity, unit_price }],
            promo_code: promo_code.map(str::to_string),
            currency: "USD".to_string(),
        }
    }

    fn customer() -> Customer {
        Customer {
            id: CustomerId("CUST-1".to_string()),
            email: "shopper@example.com".to_string(),
            billing_country: "US".to_string(),
        }
    }

    fn quote_with_selected(price: Decimal, free_shipping: bool) -> ShippingQuote {
        let option = ShippingOption {
            module_code: "flat-rate".to_string(),
            option_code: "standard".to_string(),
            price,
            estimated_days: Some(5),
            description: "Standard delivery".to_string(),
        };
        let mut quote = ShippingQuote {
            options: vec![option],
            return_code: None,
            free_shipping,
            handling_fee: Decimal::ZERO,
            selected: None,
            warnings: Vec::new(),
        };
        quote.select("flat-rate", "standard").expect("option exists");
        quote
    }

    fn pricing() -> PricingConfig {
        PricingConfig {
            free_shipping_threshold: None,
            handling_fee: Decimal::ZERO,
            tax_rate_pct: Decimal::ZERO,
            tax_on_shipping: false,
        }
    }

    fn promo_rules() -> RuleSetStore {
        let rule = PromoRule {
            code: "SAVE10".to_string(),
            priority: 100,
            conditions: vec![RuleCondition::PromoCodeEquals("SAVE10".to_string())],
            outcome: RuleOutcome::FractionOff(Decimal::new(10, 2)),
        };
        RuleSetStore::new()
            .with_rule_set(RuleSet::new(PROMO_RULE_SET, vec![rule]).expect("valid rule set"))
    }

    #[test]
    fn subtotal_is_always_the_first_entry() {
        let cart = cart(Decimal::new(5_000, 2), 2, None);
        let quote = quote_with_selected(Decimal::new(799, 2), false);
        let outcome = compute_totals(&TotalsInput {
            cart: &cart,
            quote: &quote,
            customer: &customer(),
            pricing: &pricing(),
            rules: &RuleSetStore::new(),
            evaluated_at: Utc::now(),
        })
        .expect("totals compute");

        assert_eq!(outcome.entries[0].kind, TotalKind::Subtotal);
        assert_eq!(outcome.entries[0].value, Decimal::new(10_000, 2));
        assert_eq!(outcome.total, Decimal::new(10_799, 2));
    }

    #[test]
    fn free_shipping_contributes_a_zero_shipping_entry() {
        let cart = cart(Decimal::new(5_000, 2), 2, None);
        let quote = quote_with_selected(Decimal::new(799, 2), true);
        let outcome = compute_totals(&TotalsInput {
            cart: &cart,
            quote: &quote,
            customer: &customer(),
            pricing: &pricing(),
            rules: &RuleSetStore::new(),
            evaluated_at: Utc::now(),
        })
        .expect("totals compute");

        let shipping = outcome
            .entries
            .iter()
            .find(|entry| entry.kind == TotalKind::Shipping)
            .expect("shipping entry present");
        assert_eq!(shipping.value, Decimal::ZERO);
        assert_eq!(outcome.total, Decimal::new(10_000, 2));
    }

    #[test]
    fn save10_on_two_units_at_fifty_discounts_ten() {
        let cart = cart(Decimal::new(5_000, 2), 2, Some("SAVE10"));
        let quote = quote_with_selected(Decimal::ZERO, true);
        let rules = promo_rules();
        let outcome = compute_totals(&TotalsInput {
            cart: &cart,
            quote: &quote,
            customer: &customer(),
            pricing: &pricing(),
            rules: &rules,
            evaluated_at: Utc::now(),
        })
        .expect("totals compute");

        let discount = outcome
            .entries
            .iter()
            .find(|entry| entry.kind == TotalKind::Discount)
            .expect("discount entry present");
        assert_eq!(discount.value, Decimal::new(-1_000, 2));
        assert_eq!(discount.code, "SAVE10");
        assert_eq!(outcome.total, Decimal::new(9_000, 2));
    }

    #[test]
    fn missing_rule_set_fails_open_with_a_warning() {
        let cart = cart(Decimal::new(5_000, 2), 2, Some("SAVE10"));
        let quote = quote_with_selected(Decimal::new(799, 2), false);
        let outcome = compute_totals(&TotalsInput {
            cart: &cart,
            quote: &quote,
            customer: &customer(),
            pricing: &pricing(),
            rules: &RuleSetStore::new(),
            evaluated_at: Utc::now(),
        })
        .expect("totals compute despite missing rule set");

        assert!(outcome.entries.iter().all(|entry| entry.kind != TotalKind::Discount));
        assert!(outcome.warnings.iter().any(|warning| warning.contains("discount stage skipped")));
        assert_eq!(outcome.total, Decimal::new(10_799, 2));
    }

    #[test]
    fn tax_applies_after_discount_and_optionally_to_shipping() {
        let cart = cart(Decimal::new(5_000, 2), 2, Some("SAVE10"));
        let quote = quote_with_selected(Decimal::new(1_000, 2), false);
        let rules = promo_rules();
        let mut pricing = pricing();
        pricing.tax_rate_pct = Decimal::new(10, 0);

        let without_shipping_tax = compute_totals(&TotalsInput {
            cart: &cart,
            quote: &quote,
            customer: &customer(),
            pricing: &pricing,
            rules: &rules,
            evaluated_at: Utc::now(),
        })
        .expect("totals compute");
        // Taxable base: 100.00 - 10.00 = 90.00.
        let tax = without_shipping_tax
            .entries
            .iter()
            .find(|entry| entry.kind == TotalKind::Tax)
            .expect("tax entry present");
        assert_eq!(tax.value, Decimal::new(900, 2));

        pricing.tax_on_shipping = true;
        let with_shipping_tax = compute_totals(&TotalsInput {
            cart: &cart,
            quote: &quote,
            customer: &customer(),
            pricing: &pricing,
            rules: &rules,
            evaluated_at: Utc::now(),
        })
        .expect("totals compute");
        // Taxable base grows by the 10.00 shipping value.
        let tax = with_shipping_tax
            .entries
            .iter()
            .find(|entry| entry.kind == TotalKind::Tax)
            .expect("tax entry present");
        assert_eq!(tax.value, Decimal::new(1_000, 2));
    }

    #[test]
    fn handling_fee_is_added_verbatim() {
        let cart = cart(Decimal::new(5_000, 2), 1, None);
        let mut quote = quote_with_selected(Decimal::new(500, 2), false);
        quote.handling_fee = Decimal::new(250, 2);

        let outcome = compute_totals(&TotalsInput {
            cart: &cart,
            quote: &quote,
            customer: &customer(),
            pricing: &pricing(),
            rules: &RuleSetStore::new(),
            evaluated_at: Utc::now(),
        })
        .expect("totals compute");

        let handling = outcome
            .entries
            .iter()
            .find(|entry| entry.kind == TotalKind::Handling)
            .expect("handling entry present");
        assert_eq!(handling.value, Decimal::new(250, 2));
        assert_eq!(outcome.total, Decimal::new(5_750, 2));
    }

    #[test]
    fn discount_rounds_once_at_conversion() {
        // 3 x 1.05 at 15% = 0.4725, rounded once to 0.47.
        let mut cart = cart(Decimal::new(105, 2), 3, Some("SAVE15"));
        cart.lines[0].sku = "SKU-ODD".to_string();
        let rule = PromoRule {
            code: "SAVE15".to_string(),
            priority: 100,
            conditions: vec![RuleCondition::PromoCodeEquals("SAVE15".to_string())],
            outcome: RuleOutcome::FractionOff(Decimal::new(15, 2)),
        };
        let rules = RuleSetStore::new()
            .with_rule_set(RuleSet::new(PROMO_RULE_SET, vec![rule]).expect("valid rule set"));
        let quote = quote_with_selected(Decimal::ZERO, true);

        let outcome = compute_totals(&TotalsInput {
            cart: &cart,
            quote: &quote,
            customer: &customer(),
            pricing: &pricing(),
            rules: &rules,
            evaluated_at: Utc::now(),
        })
        .expect("totals compute");

        let discount = outcome
            .entries
            .iter()
            .find(|entry| entry.kind == TotalKind::Discount)
            .expect("discount entry present");
        assert_eq!(discount.value, Decimal::new(-47, 2));
    }

    #[test]
    fn identical_inputs_produce_identical_outcomes() {
        let cart = cart(Decimal::new(5_000, 2), 2, Some("SAVE10"));
        let quote = quote_with_selected(Decimal::new(799, 2), false);
        let rules = promo_rules();
        let evaluated_at = Utc::now();

        let run = || {
            compute_totals(&TotalsInput {
                cart: &cart,
                quote: &quote,
                customer: &customer(),
                pricing: &pricing(),
                rules: &rules,
                evaluated_at,
            })
            .expect("totals compute")
        };

        assert_eq!(run(), run());
    }

    #[test]
    fn invalid_cart_hard_fails_the_pipeline() {
        let cart = Cart { lines: Vec::new(), promo_code: None, currency: "USD".to_string() };
        let quote = quote_with_selected(Decimal::new(799, 2), false);

        let error = compute_totals(&TotalsInput {
            cart: &cart,
            quote: &quote,
            customer: &customer(),
            pricing: &pricing(),
            rules: &RuleSetStore::new(),
            evaluated_at: Utc::now(),
        })
        .expect_err("empty cart must fail");

        assert_eq!(error, DomainError::EmptyCart);
    }
}
