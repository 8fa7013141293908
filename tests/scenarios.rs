use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arb_core::money::PairName;
use arb_core::order::OrderKind;
use arb_core::reversal_queue::{InMemoryReversalQueue, ReversalQueue};
use arb_core::session::mock::{MockQuote, MockSession};
use arb_core::strategy::arbitrage::{ArbitrageStrategy, TradeTimings};
use arb_core::venue::Venue;
use arb_core::venues::Venues;

fn pair() -> PairName {
    PairName::new("ETC", "USD")
}

fn fast_timings() -> TradeTimings {
    TradeTimings {
        fetch_order_interval: Duration::from_millis(5),
        sleep_after_placed: Duration::from_millis(1),
        timeout: Duration::from_millis(200),
    }
}

async fn make_venue(name: &str, bid: f64, ask: f64, base_balance: f64, quote_balance: f64) -> Venue {
    let session = MockSession::new(name);
    session
        .set_quote(
            "ETCUSD",
            MockQuote {
                bid,
                ask,
                bid_size: 1000.0,
                ask_size: 1000.0,
            },
        )
        .await;
    session.set_balance("USD", base_balance).await;
    session.set_balance("ETC", quote_balance).await;
    let mut venue = Venue::new(
        Box::new(session),
        name,
        vec![pair()],
        0.0,
        0.0,
        HashMap::from([("DEFAULT".to_string(), 0.01)]),
    );
    venue.update_tickers_interval = Duration::from_secs(60);
    venue
}

fn strategy(venues: Arc<Venues>, queue: Arc<InMemoryReversalQueue>) -> ArbitrageStrategy {
    ArbitrageStrategy {
        venues,
        store: None,
        reversal_queue: Box::new(SharedQueue(queue)),
        pairs: vec![pair()],
        window_direct_width: 1.0,
        window_reversed_width: 1.0,
        max_spend_part: 1.0,
        interval: Duration::from_secs(60),
        order_placement_interval: Duration::from_millis(1),
        autoreverse_order_delta: chrono::Duration::seconds(3600),
        order_type: OrderKind::Market,
        trade_timings: fast_timings(),
    }
}

/// Lets two `ArbitrageStrategy` instances (simulating a process restart)
/// share one logical reversal queue.
struct SharedQueue(Arc<InMemoryReversalQueue>);

#[async_trait::async_trait]
impl ReversalQueue for SharedQueue {
    async fn push(&self, pair: (arb_core::order::Order, arb_core::order::Order)) -> arb_core::error::Result<()> {
        self.0.push(pair).await
    }
    async fn pop(&self) -> arb_core::error::Result<(arb_core::order::Order, arb_core::order::Order)> {
        self.0.pop().await
    }
    async fn length(&self) -> arb_core::error::Result<usize> {
        self.0.length().await
    }
}

#[tokio::test]
async fn open_window_places_both_legs_and_queues_for_reversal() {
    let venue_a = make_venue("a", 10.0, 10.1, 1_000.0, 1_000.0).await;
    let venue_b = make_venue("b", 11.0, 11.1, 1_000.0, 1_000.0).await;
    let venues = Arc::new(Venues::new(vec![venue_a, venue_b]));
    venues.fetch_balances().await;
    let queue = Arc::new(InMemoryReversalQueue::new());
    let strategy = strategy(venues.clone(), queue.clone());

    strategy.step().await.unwrap();

    assert_eq!(queue.length().await.unwrap(), 1);
}

#[tokio::test]
async fn no_window_when_prices_do_not_cross_venues() {
    // b's whole spread sits inside a's wider spread: no ask anywhere
    // undercuts any bid anywhere, so there's nothing to arbitrage.
    let venue_a = make_venue("a", 10.0, 10.2, 1_000.0, 1_000.0).await;
    let venue_b = make_venue("b", 10.05, 10.15, 1_000.0, 1_000.0).await;
    let venues = Arc::new(Venues::new(vec![venue_a, venue_b]));
    venues.fetch_balances().await;
    let queue = Arc::new(InMemoryReversalQueue::new());
    let strategy = strategy(venues.clone(), queue.clone());

    strategy.step().await.unwrap();

    assert_eq!(queue.length().await.unwrap(), 0);
}

#[tokio::test]
async fn reversal_unwinds_once_the_window_closes() {
    let venue_a = make_venue("a", 10.0, 10.1, 1_000.0, 1_000.0).await;
    let venue_b = make_venue("b", 11.0, 11.1, 1_000.0, 1_000.0).await;
    let venues = Arc::new(Venues::new(vec![venue_a, venue_b]));
    venues.fetch_balances().await;
    let queue = Arc::new(InMemoryReversalQueue::new());
    let strategy = strategy(venues.clone(), queue.clone());

    strategy.step().await.unwrap();
    assert_eq!(queue.length().await.unwrap(), 1);

    // Prices converge: the window that justified the trade is now closed.
    venues.get("a").unwrap().set_pair(
        "ETCUSD",
        &arb_core::session::FetchPairResult {
            success: true,
            bid: 10.5,
            ask: 10.6,
            bid_size: 1000.0,
            ask_size: 1000.0,
            response: String::new(),
        },
    ).await;
    venues.get("b").unwrap().set_pair(
        "ETCUSD",
        &arb_core::session::FetchPairResult {
            success: true,
            bid: 10.55,
            ask: 10.65,
            bid_size: 1000.0,
            ask_size: 1000.0,
            response: String::new(),
        },
    ).await;

    strategy.step().await.unwrap();
    assert_eq!(queue.length().await.unwrap(), 0);
}

#[tokio::test]
async fn forced_reversal_fires_after_the_autoreverse_deadline_even_if_window_stays_open() {
    let venue_a = make_venue("a", 10.0, 10.1, 1_000.0, 1_000.0).await;
    let venue_b = make_venue("b", 11.0, 11.1, 1_000.0, 1_000.0).await;
    let venues = Arc::new(Venues::new(vec![venue_a, venue_b]));
    venues.fetch_balances().await;
    let queue = Arc::new(InMemoryReversalQueue::new());
    let mut strategy = strategy(venues.clone(), queue.clone());
    strategy.autoreverse_order_delta = chrono::Duration::milliseconds(-1);

    strategy.step().await.unwrap();
    assert_eq!(queue.length().await.unwrap(), 1);

    // Window is still wide open, but every order's executed_at is already
    // older than "now - (-1ms)", so the deadline forces a reversal anyway.
    strategy.step().await.unwrap();
    assert_eq!(queue.length().await.unwrap(), 0);
}

#[tokio::test]
async fn restart_resumes_reversal_of_a_pair_left_in_the_queue() {
    let venue_a = make_venue("a", 10.0, 10.1, 1_000.0, 1_000.0).await;
    let venue_b = make_venue("b", 11.0, 11.1, 1_000.0, 1_000.0).await;
    let venues = Arc::new(Venues::new(vec![venue_a, venue_b]));
    venues.fetch_balances().await;
    let queue = Arc::new(InMemoryReversalQueue::new());

    {
        let strategy = strategy(venues.clone(), queue.clone());
        strategy.step().await.unwrap();
        assert_eq!(queue.length().await.unwrap(), 1);
        // strategy dropped here, simulating a process restart; the queue
        // (Postgres-backed in production) is what survives.
    }

    venues.get("a").unwrap().set_pair(
        "ETCUSD",
        &arb_core::session::FetchPairResult {
            success: true,
            bid: 10.5,
            ask: 10.6,
            bid_size: 1000.0,
            ask_size: 1000.0,
            response: String::new(),
        },
    ).await;
    venues.get("b").unwrap().set_pair(
        "ETCUSD",
        &arb_core::session::FetchPairResult {
            success: true,
            bid: 10.55,
            ask: 10.65,
            bid_size: 1000.0,
            ask_size: 1000.0,
            response: String::new(),
        },
    ).await;

    let resumed = strategy(venues.clone(), queue.clone());
    resumed.step().await.unwrap();
    assert_eq!(queue.length().await.unwrap(), 0);
}
