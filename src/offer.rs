use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::money::{Money, PairName};

/// Which side of the book an [`Offer`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Ask,
    Bid,
}

impl Side {
    /// Sign used when folding a venue's fee into [`Offer::total_price`]:
    /// buying (ask) pays the fee on top, selling (bid) pays it off the top.
    fn fee_sign(self) -> f64 {
        match self {
            Side::Ask => 1.0,
            Side::Bid => -1.0,
        }
    }

    pub fn reversed(self) -> Side {
        match self {
            Side::Ask => Side::Bid,
            Side::Bid => Side::Ask,
        }
    }

    /// Matching order side for this offer side (`ask -> buy`, `bid -> sell`).
    pub fn order_side(self) -> OrderSide {
        match self {
            Side::Ask => OrderSide::Buy,
            Side::Bid => OrderSide::Sell,
        }
    }
}

/// The buy/sell side of an [`crate::order::Order`], derived from the offer
/// side it was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Balance-precalculation factor: buying debits quote and credits
    /// base, selling does the opposite.
    pub fn balance_factor(self) -> f64 {
        match self {
            OrderSide::Buy => -1.0,
            OrderSide::Sell => 1.0,
        }
    }
}

/// A resting price level seen on a venue: "we can buy/sell `quote.amount`
/// of the quote currency at `price` per unit on `venue`".
///
/// Immutable once constructed; `clone_with` produces variants (used for
/// reversal and refresh) the way the original's `Offer.clone` did, without
/// embedding a live venue handle — callers resolve balances/limits through
/// a [`crate::venues::Venues`] handle explicitly instead.
#[derive(Debug, Clone)]
pub struct Offer {
    pub side: Side,
    pub pair: PairName,
    pub price: f64,
    pub quote: Money,
    pub base: Money,
    pub venue: String,
    pub timestamp: f64,
    pub fee: f64,
}

impl Offer {
    /// `quote_amount` is the amount of the quote currency on offer; `base`
    /// is derived as `round(quote_amount * price, 5)`, matching the
    /// original's invariant exactly.
    pub fn new(
        side: Side,
        pair: PairName,
        price: f64,
        quote_amount: f64,
        venue: impl Into<String>,
        fee: f64,
        timestamp: f64,
    ) -> Option<Self> {
        if price <= 0.0 || quote_amount <= 0.0 {
            return None;
        }
        let base_amount = (quote_amount * price * 100_000.0).round() / 100_000.0;
        let base_currency = pair.base.clone();
        let quote_currency = pair.quote.clone();
        Some(Offer {
            side,
            pair,
            price,
            quote: Money::new(quote_amount, quote_currency),
            base: Money::new(base_amount, base_currency),
            venue: venue.into(),
            timestamp,
            fee,
        })
    }

    /// Price adjusted for this venue's fee, in the direction that makes
    /// ask offers look more expensive and bid offers look cheaper — the
    /// number arbitrage windows actually compare.
    pub fn total_price(&self) -> f64 {
        self.price * (1.0 + self.side.fee_sign() * self.fee)
    }

    pub fn reversed_side(&self) -> Side {
        self.side.reversed()
    }

    /// Same offer, opposite side, same quote amount.
    pub fn reversed(&self) -> Offer {
        let mut clone = self.clone();
        clone.side = self.reversed_side();
        clone
    }

    /// Same offer with price/timestamp swapped in, used when a fresh quote
    /// has just been fetched for it.
    pub fn with_fresh_price(&self, price: f64, timestamp: f64) -> Option<Offer> {
        Offer::new(
            self.side,
            self.pair.clone(),
            price,
            self.quote.amount,
            self.venue.clone(),
            self.fee,
            timestamp,
        )
    }

    pub fn with_quote_amount(&self, quote_amount: f64) -> Option<Offer> {
        Offer::new(
            self.side,
            self.pair.clone(),
            self.price,
            quote_amount,
            self.venue.clone(),
            self.fee,
            self.timestamp,
        )
    }

    pub fn is_similar(&self, other: &Offer) -> bool {
        self.pair == other.pair && self.side == other.side && self.venue == other.venue
    }

    /// Funds checked against `pair_limit`/`balance` when deciding whether
    /// this offer is big enough to act on: base funds (and ask price) for
    /// asks, quote funds for bids.
    pub fn funds_to_check(&self) -> &Money {
        match self.side {
            Side::Ask => &self.base,
            Side::Bid => &self.quote,
        }
    }

    pub fn price_factor(&self) -> f64 {
        match self.side {
            Side::Ask => self.price,
            Side::Bid => 1.0,
        }
    }
}

pub fn now_secs(now: DateTime<Utc>) -> f64 {
    now.timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(side: Side, price: f64, quote: f64, fee: f64) -> Offer {
        Offer::new(side, PairName::new("ETC", "USD"), price, quote, "kraken", fee, 0.0).unwrap()
    }

    #[test]
    fn base_derives_from_quote_and_price_rounded_to_five_digits() {
        let offer = sample(Side::Ask, 3.123456789, 10.0, 0.0);
        assert_eq!(offer.base.amount, 31.23457);
    }

    #[test]
    fn total_price_adds_fee_for_ask_and_subtracts_for_bid() {
        let ask = sample(Side::Ask, 100.0, 1.0, 0.01);
        let bid = sample(Side::Bid, 100.0, 1.0, 0.01);
        assert!((ask.total_price() - 101.0).abs() < 1e-9);
        assert!((bid.total_price() - 99.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_positive_price_or_amount() {
        assert!(Offer::new(Side::Ask, PairName::new("ETC", "USD"), 0.0, 1.0, "k", 0.0, 0.0).is_none());
        assert!(Offer::new(Side::Ask, PairName::new("ETC", "USD"), 1.0, 0.0, "k", 0.0, 0.0).is_none());
    }

    #[test]
    fn reversed_flips_side_and_keeps_quote_amount() {
        let offer = sample(Side::Ask, 100.0, 2.0, 0.0);
        let reversed = offer.reversed();
        assert_eq!(reversed.side, Side::Bid);
        assert_eq!(reversed.quote.amount, offer.quote.amount);
    }
}
