use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::cart::Cart;
use crate::errors::DomainError;

/// Snapshot of one cart line as seen by rule evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FactLine {
    pub sku: String,
    pub quantity: u32,
    pub unit_price: Decimal,
}

/// Input to one rule evaluation. Built fresh per call and discarded after;
/// the evaluator holds no session state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleFact {
    pub promo_code: String,
    pub evaluated_at: DateTime<Utc>,
    pub lines: Vec<FactLine>,
}

impl RuleFact {
    pub fn from_cart(cart: &Cart, promo_code: &str, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            promo_code: promo_code.to_string(),
            evaluated_at,
            lines: cart
                .lines
                .iter()
                .map(|line| FactLine {
                    sku: line.sku.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect(),
        }
    }

    fn subtotal(&self) -> Decimal {
        self.lines.iter().map(|line| line.unit_price * Decimal::from(line.quantity)).sum()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCondition {
    PromoCodeEquals(String),
    ActiveBetween { starts_at: DateTime<Utc>, ends_at: DateTime<Utc> },
    MinSubtotal(Decimal),
    SkuIn(Vec<String>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleOutcome {
    FractionOff(Decimal),
    AmountOff(Decimal),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromoRule {
    pub code: String,
    pub priority: i32,
    pub conditions: Vec<RuleCondition>,
    pub outcome: RuleOutcome,
}

/// Outcome of one evaluation. `discount_amount` is the unrounded sum over
/// matching lines; rounding to currency precision happens once, when the
/// totals pipeline converts the decision into an order total entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleDecision {
    pub applicable: bool,
    pub rule_code: Option<String>,
    pub discount_fraction: Option<Decimal>,
    pub discount_amount: Option<Decimal>,
}

impl RuleDecision {
    pub fn not_applicable() -> Self {
        Self { applicable: false, rule_code: None, discount_fraction: None, discount_amount: None }
    }
}

/// A named, immutable decision table. Rules are ordered by descending
/// priority; the sort is stable so declaration order breaks ties, and the
/// first matching rule wins outright (no stacking).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    name: String,
    rules: Vec<PromoRule>,
}

impl RuleSet {
    pub fn new(name: impl Into<String>, rules: Vec<PromoRule>) -> Result<Self, DomainError> {
        for rule in &rules {
            if let RuleOutcome::FractionOff(fraction) = rule.outcome {
                if fraction < Decimal::ZERO || fraction > Decimal::ONE {
                    return Err(DomainError::DiscountFractionOutOfRange(fraction));
                }
            }
        }

        let mut rules = rules;
        rules.sort_by_key(|rule| -rule.priority);

        Ok(Self { name: name.into(), rules })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, facts: &RuleFact) -> RuleDecision {
        self.rules
            .iter()
            .find(|rule| rule_matches(rule, facts))
            .map(|rule| decide(rule, facts))
            .unwrap_or_else(RuleDecision::not_applicable)
    }
}

fn rule_matches(rule: &PromoRule, facts: &RuleFact) -> bool {
    rule.conditions.iter().all(|condition| match condition {
        RuleCondition::PromoCodeEquals(code) => facts.promo_code.eq_ignore_ascii_case(code),
        // An expired rule simply fails to match; expiry is never an error.
        RuleCondition::ActiveBetween { starts_at, ends_at } => {
            facts.evaluated_at >= *starts_at && facts.evaluated_at <= *ends_at
        }
        RuleCondition::MinSubtotal(minimum) => facts.subtotal() >= *minimum,
        RuleCondition::SkuIn(skus) => facts.lines.iter().any(|line| skus.contains(&line.sku)),
    })
}

fn decide(rule: &PromoRule, facts: &RuleFact) -> RuleDecision {
    let sku_filter = rule.conditions.iter().find_map(|condition| match condition {
        RuleCondition::SkuIn(skus) => Some(skus),
        _ => None,
    });

    let matching_subtotal: Decimal = facts
        .lines
        .iter()
        .filter(|line| sku_filter.map_or(true, |skus| skus.contains(&line.sku)))
        .map(|line| line.unit_price * Decimal::from(line.quantity))
        .sum();

    let (fraction, amount) = match rule.outcome {
        RuleOutcome::FractionOff(fraction) => (Some(fraction), matching_subtotal * fraction),
        RuleOutcome::AmountOff(fixed) => (None, fixed.min(matching_subtotal)),
    };

    RuleDecision {
        applicable: true,
        rule_code: Some(rule.code.clone()),
        discount_fraction: fraction,
        discount_amount: Some(amount),
    }
}

/// Named rule sets, loaded once at startup and immutable afterwards.
#[derive(Clone, Debug, Default)]
pub struct RuleSetStore {
    sets: HashMap<String, RuleSet>,
}

impl RuleSetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rule_set(mut self, set: RuleSet) -> Self {
        self.sets.insert(set.name.clone(), set);
        self
    }

    /// Loads a store from the rule store's JSON document: an object keyed by
    /// set name, each value the ordered rule list for that set.
    pub fn from_json(document: &str) -> Result<Self, DomainError> {
        let sets: BTreeMap<String, Vec<PromoRule>> = serde_json::from_str(document)
            .map_err(|error| DomainError::RuleSetDocument(error.to_string()))?;

        let mut store = Self::default();
        for (name, rules) in sets {
            let set = RuleSet::new(name.clone(), rules)?;
            store.sets.insert(name, set);
        }
        Ok(store)
    }

    pub fn get(&self, name: &str) -> Result<&RuleSet, DomainError> {
        self.sets.get(name).ok_or_else(|| DomainError::RuleSetNotFound(name.to_string()))
    }
}
