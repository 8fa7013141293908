use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::money::Money;
use crate::offer::{Offer, OrderSide, Side};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    Created,
    Placed,
    Rejected,
    Cancelled,
    Fulfilled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

/// An order to buy/sell a specific [`Offer`] on its venue.
///
/// Distinct from an `Offer` in that it carries identity (`uuid`,
/// `id_on_venue`) and a lifecycle (`status`). See the data model section
/// of the specification for the full state machine.
#[derive(Debug, Clone)]
pub struct Order {
    pub uuid: Option<Uuid>,
    pub id_on_venue: Option<String>,
    pub kind: OrderKind,
    pub offer: Offer,
    pub status: OrderStatus,
    pub strategy: String,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub expired_at: Option<DateTime<Utc>>,
    pub commission: f64,
}

impl Order {
    pub fn new(offer: Offer, kind: OrderKind, strategy: impl Into<String>) -> Self {
        Order {
            uuid: None,
            id_on_venue: None,
            kind,
            offer,
            status: OrderStatus::Created,
            strategy: strategy.into(),
            created_at: Utc::now(),
            executed_at: None,
            expired_at: None,
            commission: 0.0,
        }
    }

    pub fn side(&self) -> OrderSide {
        self.offer.side.order_side()
    }

    pub fn pair_side(&self) -> Side {
        self.offer.side
    }

    pub fn quote(&self) -> &Money {
        &self.offer.quote
    }

    pub fn base(&self) -> &Money {
        &self.offer.base
    }

    pub fn venue(&self) -> &str {
        &self.offer.venue
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.status, OrderStatus::Fulfilled | OrderStatus::Cancelled)
    }

    pub fn is_placed(&self) -> bool {
        matches!(self.status, OrderStatus::Placed | OrderStatus::Fulfilled)
    }

    /// Shrink this order's quote amount, recomputing `base` from the
    /// existing price — used when sizing an order down to the max the
    /// venues can actually support.
    pub fn set_quote_amount(&mut self, quote_amount: f64) -> Option<()> {
        let updated = self.offer.with_quote_amount(quote_amount)?;
        self.offer = updated;
        Some(())
    }

    /// Shrink this order's base amount, deriving the equivalent quote
    /// amount from the current price.
    pub fn set_base_amount(&mut self, base_amount: f64) -> Option<()> {
        let new_quote_amount = (base_amount / self.offer.price * 1e10).round() / 1e10;
        self.set_quote_amount(new_quote_amount)
    }

    /// Build the opposite-side market order used to unwind this order
    /// once its arbitrage window has closed (or expired past the
    /// auto-reverse deadline).
    pub fn reversed(&self, new_price: Option<f64>) -> Option<Order> {
        let price = new_price.unwrap_or(self.offer.price);
        let reversed_offer = Offer::new(
            self.offer.side.reversed(),
            self.offer.pair.clone(),
            price,
            self.offer.quote.amount,
            self.offer.venue.clone(),
            self.offer.fee,
            self.offer.timestamp,
        )?;
        Some(Order::new(reversed_offer, OrderKind::Market, self.strategy.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::PairName;

    fn sample_order() -> Order {
        let offer = Offer::new(Side::Ask, PairName::new("ETC", "USD"), 10.0, 5.0, "kraken", 0.0, 0.0).unwrap();
        Order::new(offer, OrderKind::Limit, "arbitrage")
    }

    #[test]
    fn new_order_starts_created_and_open() {
        let order = sample_order();
        assert_eq!(order.status, OrderStatus::Created);
        assert!(!order.is_closed());
        assert!(!order.is_placed());
    }

    #[test]
    fn set_base_amount_rederives_quote_from_price() {
        let mut order = sample_order();
        order.set_base_amount(20.0).unwrap();
        assert!((order.offer.quote.amount - 2.0).abs() < 1e-9);
    }

    #[test]
    fn reversed_flips_side_and_uses_market_type() {
        let order = sample_order();
        let reversed = order.reversed(Some(11.0)).unwrap();
        assert_eq!(reversed.offer.side, Side::Bid);
        assert_eq!(reversed.kind, OrderKind::Market);
        assert_eq!(reversed.status, OrderStatus::Created);
        assert_eq!(reversed.offer.price, 11.0);
    }

    #[test]
    fn is_closed_covers_fulfilled_and_cancelled() {
        let mut order = sample_order();
        order.status = OrderStatus::Fulfilled;
        assert!(order.is_closed());
        order.status = OrderStatus::Cancelled;
        assert!(order.is_closed());
        order.status = OrderStatus::Placed;
        assert!(!order.is_closed());
    }
}
