use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::order::{Order, OrderStatus};

use super::{
    CancelResult, FetchBalancesResult, FetchPairResult, FetchStatusResult, PlaceResult,
    VenueSession,
};

/// A price level a [`MockSession`] will quote for a pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockQuote {
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
}

/// An in-memory venue session, used by the operator CLI's dry-run mode and
/// by the end-to-end strategy tests.
///
/// Grounded on the teacher's `SimExchange` (in-memory balance/position
/// bookkeeping with no network I/O).
pub struct MockSession {
    name: String,
    state: Mutex<MockState>,
}

struct MockState {
    balances: HashMap<String, f64>,
    quotes: HashMap<String, MockQuote>,
    next_order_id: u64,
    placed_orders: HashMap<String, OrderStatus>,
}

impl MockSession {
    pub fn new(name: impl Into<String>) -> Self {
        MockSession {
            name: name.into(),
            state: Mutex::new(MockState {
                balances: HashMap::new(),
                quotes: HashMap::new(),
                next_order_id: 1,
                placed_orders: HashMap::new(),
            }),
        }
    }

    pub async fn set_balance(&self, currency: impl Into<String>, amount: f64) {
        self.state.lock().await.balances.insert(currency.into(), amount);
    }

    pub async fn set_quote(&self, pair: impl Into<String>, quote: MockQuote) {
        self.state.lock().await.quotes.insert(pair.into(), quote);
    }

    /// Force the status a subsequent `fetch_status` call will report for
    /// an order id, used by tests to simulate fills/cancellations.
    pub async fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        self.state
            .lock()
            .await
            .placed_orders
            .insert(order_id.to_string(), status);
    }
}

#[async_trait]
impl VenueSession for MockSession {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_balances(&self) -> FetchBalancesResult {
        let state = self.state.lock().await;
        FetchBalancesResult {
            success: true,
            balances: state.balances.clone(),
            response: String::new(),
        }
    }

    async fn fetch_pair(&self, pair: &str, _pair_limit: f64) -> FetchPairResult {
        let state = self.state.lock().await;
        match state.quotes.get(pair) {
            Some(quote) => FetchPairResult {
                success: true,
                bid: quote.bid,
                ask: quote.ask,
                bid_size: quote.bid_size,
                ask_size: quote.ask_size,
                response: String::new(),
            },
            None => FetchPairResult {
                success: false,
                response: format!("no quote configured for {pair}"),
                ..Default::default()
            },
        }
    }

    async fn place(&self, order: &Order) -> PlaceResult {
        let mut state = self.state.lock().await;
        let id = format!("mock-{}", state.next_order_id);
        state.next_order_id += 1;
        state.placed_orders.insert(id.clone(), OrderStatus::Fulfilled);
        let _ = order;
        PlaceResult {
            success: true,
            order_id: id,
            order_status: OrderStatus::Placed,
            response: String::new(),
        }
    }

    async fn cancel(&self, order: &Order) -> CancelResult {
        let mut state = self.state.lock().await;
        let Some(id) = order.id_on_venue.as_deref() else {
            return CancelResult {
                success: false,
                response: "order has no venue id".into(),
            };
        };
        state
            .placed_orders
            .insert(id.to_string(), OrderStatus::Cancelled);
        CancelResult {
            success: true,
            response: String::new(),
        }
    }

    async fn fetch_status(&self, order: &Order) -> FetchStatusResult {
        let state = self.state.lock().await;
        let Some(id) = order.id_on_venue.as_deref() else {
            return FetchStatusResult {
                success: false,
                status: None,
                response: "order has no venue id".into(),
            };
        };
        match state.placed_orders.get(id) {
            Some(status) => FetchStatusResult {
                success: true,
                status: Some(*status),
                response: String::new(),
            },
            None => FetchStatusResult {
                success: false,
                status: None,
                response: format!("unknown order id {id}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_pair_fails_without_a_configured_quote() {
        let session = MockSession::new("kraken");
        let result = session.fetch_pair("ETCUSD", 0.0).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn fetch_pair_returns_the_configured_quote() {
        let session = MockSession::new("kraken");
        session
            .set_quote(
                "ETCUSD",
                MockQuote {
                    bid: 10.0,
                    ask: 10.5,
                    bid_size: 100.0,
                    ask_size: 100.0,
                },
            )
            .await;
        let result = session.fetch_pair("ETCUSD", 0.0).await;
        assert!(result.success);
        assert_eq!(result.bid, 10.0);
        assert_eq!(result.ask, 10.5);
    }
}
