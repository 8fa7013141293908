use std::fmt;

use serde::{Deserialize, Serialize};

/// Digits after the decimal point `Money` equality rounds to.
pub const MONEY_PRECISION: i32 = 2;

/// A currency pair split into its quote and base legs.
///
/// Matches the convention of the original bot: for `"ETCUSD"`, `quote ==
/// "ETC"` (the asset being bought/sold) and `base == "USD"` (the currency
/// it's priced in).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairName {
    pub quote: String,
    pub base: String,
}

impl PairName {
    /// Parse a pair string in the bot's common format (first three
    /// characters are the quote currency, the rest is the base currency).
    pub fn parse(pair: &str) -> Self {
        let upper = pair.to_uppercase();
        let split_at = upper.len().min(3);
        let (quote, base) = upper.split_at(split_at);
        PairName {
            quote: quote.to_string(),
            base: base.to_string(),
        }
    }

    pub fn new(quote: impl Into<String>, base: impl Into<String>) -> Self {
        PairName {
            quote: quote.into(),
            base: base.into(),
        }
    }

    /// Render in a venue's own pair-name format, e.g. `"{quote}-{base}"`.
    pub fn to_venue_format(&self, template: &str) -> String {
        template
            .replace("{quote}", &self.quote)
            .replace("{base}", &self.base)
    }
}

impl fmt::Display for PairName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.quote, self.base)
    }
}

/// An amount of a specific currency.
///
/// Equality rounds both sides to `MONEY_PRECISION` digits before comparing,
/// matching the tolerance the strategy uses when deciding two balances are
/// "the same" after a fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Money {
    pub amount: f64,
    pub currency: String,
}

impl Money {
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Money {
            amount,
            currency: currency.into(),
        }
    }

    pub fn zero(currency: impl Into<String>) -> Self {
        Money::new(0.0, currency)
    }

    fn rounded(&self) -> f64 {
        let factor = 10f64.powi(MONEY_PRECISION);
        (self.amount * factor).round() / factor
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        self.currency == other.currency && self.rounded() == other.rounded()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} {}", self.amount, self.currency)
    }
}

/// Floor a value to `precision` decimal digits, matching the bot's
/// `floor_with_precision` helper used to tolerate float noise when
/// comparing balances against zero.
pub fn floor_with_precision(value: f64, precision: i32) -> f64 {
    let factor = 10f64.powi(precision);
    (value * factor).floor() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pair_in_common_format() {
        let pair = PairName::parse("etcusd");
        assert_eq!(pair.quote, "ETC");
        assert_eq!(pair.base, "USD");
    }

    #[test]
    fn venue_format_substitutes_template() {
        let pair = PairName::new("ETC", "USD");
        assert_eq!(pair.to_venue_format("{quote}-{base}"), "ETC-USD");
    }

    #[test]
    fn money_equality_rounds_to_precision() {
        let a = Money::new(10.001, "USD");
        let b = Money::new(10.004, "USD");
        assert_eq!(a, b);
        let c = Money::new(10.01, "USD");
        assert_ne!(a, c);
    }

    #[test]
    fn money_equality_requires_same_currency() {
        let a = Money::new(10.0, "USD");
        let b = Money::new(10.0, "EUR");
        assert_ne!(a, b);
    }

    #[test]
    fn floor_with_precision_rounds_down_at_given_digit() {
        assert_eq!(floor_with_precision(1.23456789, 4), 1.2345);
        assert!(floor_with_precision(-0.01, 8) < 0.0);
    }
}
