use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::order::Order;

/// The durable FIFO of placed-orders-pairs still awaiting reversal.
///
/// Grounded on `cryptotrader.models.queue.Queue`/`PostgresQueue`: `pop`
/// removes and returns the oldest pair atomically (see
/// [`crate::store::PgReversalQueue`] for the Postgres realization of the
/// original's delete-returning CTE); `push` re-enqueues a pair (used both
/// for newly placed pairs and for pairs that couldn't be reversed yet).
#[async_trait]
pub trait ReversalQueue: Send + Sync {
    async fn push(&self, pair: (Order, Order)) -> Result<()>;
    async fn pop(&self) -> Result<(Order, Order)>;
    async fn length(&self) -> Result<usize>;
}

/// In-memory FIFO double, used by the strategy's end-to-end tests so they
/// don't require a live Postgres instance.
pub struct InMemoryReversalQueue {
    items: Mutex<VecDeque<(Order, Order)>>,
}

impl InMemoryReversalQueue {
    pub fn new() -> Self {
        InMemoryReversalQueue {
            items: Mutex::new(VecDeque::new()),
        }
    }
}

impl Default for InMemoryReversalQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReversalQueue for InMemoryReversalQueue {
    async fn push(&self, pair: (Order, Order)) -> Result<()> {
        self.items.lock().await.push_back(pair);
        Ok(())
    }

    async fn pop(&self) -> Result<(Order, Order)> {
        self.items.lock().await.pop_front().ok_or(Error::QueueEmpty)
    }

    async fn length(&self) -> Result<usize> {
        Ok(self.items.lock().await.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::money::PairName;
    use crate::offer::{Offer, Side};
    use crate::order::OrderKind;

    fn sample_order(side: Side) -> Order {
        let offer = Offer::new(side, PairName::new("ETC", "USD"), 10.0, 1.0, "kraken", 0.0, 0.0).unwrap();
        Order::new(offer, OrderKind::Limit, "arbitrage")
    }

    #[tokio::test]
    async fn pop_on_empty_queue_errors() {
        let queue = InMemoryReversalQueue::new();
        assert!(matches!(queue.pop().await, Err(Error::QueueEmpty)));
    }

    #[tokio::test]
    async fn push_then_pop_is_fifo() {
        let queue = InMemoryReversalQueue::new();
        let first = (sample_order(Side::Ask), sample_order(Side::Bid));
        let second = (sample_order(Side::Ask), sample_order(Side::Bid));
        queue.push(first).await.unwrap();
        queue.push(second).await.unwrap();
        assert_eq!(queue.length().await.unwrap(), 2);
        queue.pop().await.unwrap();
        assert_eq!(queue.length().await.unwrap(), 1);
    }
}
