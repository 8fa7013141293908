use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

use crate::money::{floor_with_precision, PairName};
use crate::offer::Side;
use crate::order::{Order, OrderStatus};
use crate::primitives::Debouncer;
use crate::session::VenueSession;
use crate::store::Store;

/// Last-known ticker for a pair, plus the time it was observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PairTop {
    pub bid: f64,
    pub ask: f64,
    pub bid_size: f64,
    pub ask_size: f64,
    pub fetched_at_secs: f64,
}

fn now_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs_f64()
}

/// One exchange account: a wire session, cached balances/tickers, and the
/// per-pair limits that gate order sizing.
///
/// Grounded on `cryptotrader.exchange.base.exchange.Exchange`: balance and
/// pair caches are plain maps guarded by a lock (the original relies on a
/// single-threaded event loop for the same safety Rust needs a lock for),
/// `fetch_balances` is debounced identically, and `validate` keeps the
/// original's structure while fixing the copy-paste bug in its insufficient
/// -funds logging (see the base-leg branch below).
pub struct Venue {
    pub name: String,
    pub session: Box<dyn VenueSession>,
    pub default_pairs: Vec<PairName>,
    pub fee: f64,
    pub limit: f64,
    pub pair_limits: HashMap<String, f64>,
    pub pair_name_template: String,
    pub update_tickers_interval: Duration,
    pub update_tickers_timeout: Duration,
    pub subscribe_on_pairs_delay: Duration,
    pub ticker_freshness_interval: Duration,
    balances: RwLock<HashMap<String, f64>>,
    balances_prev: RwLock<HashMap<String, f64>>,
    pairs: RwLock<HashMap<String, PairTop>>,
    fetch_balances_debouncer: Debouncer,
    store: Option<Store>,
    is_running: Arc<AtomicBool>,
    tasks: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Venue {
    pub fn new(
        session: Box<dyn VenueSession>,
        name: impl Into<String>,
        default_pairs: Vec<PairName>,
        fee: f64,
        limit: f64,
        pair_limits: HashMap<String, f64>,
    ) -> Self {
        Venue {
            name: name.into(),
            session,
            default_pairs,
            fee,
            limit,
            pair_limits,
            pair_name_template: "{quote}{base}".to_string(),
            update_tickers_interval: Duration::from_secs(10),
            update_tickers_timeout: Duration::from_secs(5),
            subscribe_on_pairs_delay: Duration::from_millis(500),
            ticker_freshness_interval: Duration::from_secs(10),
            balances: RwLock::new(HashMap::new()),
            balances_prev: RwLock::new(HashMap::new()),
            pairs: RwLock::new(HashMap::new()),
            fetch_balances_debouncer: Debouncer::new(Duration::from_secs(1)),
            store: None,
            is_running: Arc::new(AtomicBool::new(false)),
            tasks: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    /// Attach the persistence store used to append `trade_history` rows
    /// from the subscription loop. Must be called before [`Venue::start`]
    /// shares this venue across spawned tasks.
    pub fn set_store(&mut self, store: Store) {
        self.store = Some(store);
    }

    /// Override the debounce window `fetch_balances` is serialized behind
    /// (the per-venue `fetch_balances_interval` config).
    pub fn set_fetch_balances_interval(&mut self, interval: Duration) {
        self.fetch_balances_debouncer = Debouncer::new(interval);
    }

    pub async fn schedule(&self) {
        self.session.schedule().await;
        if let Err(err) = self.fetch_balances().await {
            warn!("{}: schedule balance fetch failed: {err}", self.name);
        }
    }

    /// Start this venue's background work: one cooperative task per
    /// tracked pair calling `fetch_pair` every `update_tickers_interval`
    /// (staggered by `subscribe_on_pairs_delay` to respect venue rate
    /// limits), plus a loop keeping the session warm and balances fresh.
    ///
    /// Grounded on `Exchange.subscribe_on_pairs`/`Exchange.schedule`: the
    /// original's asyncio tasks become `tokio::spawn`ed loops gated by
    /// `is_running`, tracked so [`Venue::stop`] can cancel them.
    pub fn start(venue: Arc<Venue>) {
        venue.is_running.store(true, Ordering::SeqCst);
        let mut handles = Vec::new();

        for (index, pair) in venue.default_pairs.iter().cloned().enumerate() {
            let venue = Arc::clone(&venue);
            let stagger = venue.subscribe_on_pairs_delay * index as u32;
            handles.push(tokio::spawn(async move {
                tokio::time::sleep(stagger).await;
                venue.subscribe_on_pair(pair).await;
            }));
        }

        let schedule_venue = Arc::clone(&venue);
        handles.push(tokio::spawn(async move {
            schedule_venue.schedule_loop().await;
        }));

        if let Ok(mut tasks) = venue.tasks.try_lock() {
            tasks.extend(handles);
        } else {
            for handle in handles {
                handle.abort();
            }
            warn!("{}: could not record subscription tasks, aborting them", venue.name);
        }
    }

    /// One pair's subscription loop: poll `fetch_pair` on a timer, merge
    /// successes into the ticker cache, and append a `trade_history` row.
    /// Errors are logged and swallowed so one bad pair doesn't stop the
    /// others, matching the original's per-pair `try/except` loop body.
    async fn subscribe_on_pair(self: Arc<Self>, pair: PairName) {
        let pair_str = pair.to_string();
        let wire_pair = self.wire_pair(&pair);
        let min_size = self.get_pair_limit(&pair_str);
        while self.is_running.load(Ordering::SeqCst) {
            let result = self.session.fetch_pair(&wire_pair, min_size).await;
            if result.success {
                self.set_pair(&pair_str, &result).await;
                if let Some(store) = &self.store {
                    if let Err(err) = store
                        .record_ticker(&self.name, &pair_str, result.bid, result.ask, result.bid_size, result.ask_size)
                        .await
                    {
                        warn!("{}: failed to record trade history for {pair_str}: {err}", self.name);
                    }
                }
            } else {
                warn!("{}: fetch_pair failed for {pair_str}: {}", self.name, result.response);
            }
            tokio::time::sleep(self.update_tickers_interval).await;
        }
    }

    async fn schedule_loop(self: Arc<Self>) {
        while self.is_running.load(Ordering::SeqCst) {
            self.schedule().await;
            tokio::time::sleep(self.update_tickers_interval).await;
        }
    }

    pub async fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        let mut tasks = self.tasks.lock().await;
        for handle in tasks.drain(..) {
            handle.abort();
        }
        self.session.stop().await;
    }

    pub async fn balances_str(&self) -> String {
        let balances = self.balances.read().await;
        let parts: Vec<String> = balances
            .iter()
            .filter(|(_, amount)| **amount > 0.0)
            .map(|(currency, amount)| format!("{currency} {amount}"))
            .collect();
        let body = if parts.is_empty() {
            "no funds".to_string()
        } else {
            parts.join(", ")
        };
        format!("{}: {}", self.name, body)
    }

    pub async fn get_balance(&self, currency: &str) -> f64 {
        *self.balances.read().await.get(&currency.to_uppercase()).unwrap_or(&0.0)
    }

    pub fn get_pair_limit(&self, pair: &str) -> f64 {
        self.pair_limits
            .get(pair)
            .copied()
            .or_else(|| self.pair_limits.get("DEFAULT").copied())
            .unwrap_or_else(|| {
                warn!("{}: default limit value is not defined for {pair}", self.name);
                0.0
            })
    }

    pub fn get_limit(&self) -> f64 {
        self.limit
    }

    pub async fn get_pair_data(&self, pair: &str) -> Option<PairTop> {
        self.pairs.read().await.get(pair).copied()
    }

    pub async fn is_pair_expired(&self, pair: &str, interval: Duration) -> bool {
        match self.get_pair_data(pair).await {
            Some(top) => now_secs() > top.fetched_at_secs + interval.as_secs_f64(),
            None => true,
        }
    }

    /// Render a pair in this venue's own wire format (`pair_name_template`),
    /// the way [`PairName::to_venue_format`] is meant to be used — every
    /// cache lookup elsewhere keys off the pair's common-format string, so
    /// this translation happens only at the boundary where a pair name
    /// actually goes out over the wire to [`VenueSession`].
    fn wire_pair(&self, pair: &PairName) -> String {
        pair.to_venue_format(&self.pair_name_template)
    }

    /// Guaranteed-fresh ticker for `pair` (in common format), refetching
    /// from the venue if the cached value has expired.
    pub async fn get_fresh_pair(&self, pair: &str, interval: Duration) -> crate::error::Result<PairTop> {
        if self.is_pair_expired(pair, interval).await {
            let wire_pair = self.wire_pair(&PairName::parse(pair));
            let result = self.session.fetch_pair(&wire_pair, 0.0).await;
            if !result.success {
                return Err(crate::error::Error::FetchPair {
                    pair: pair.to_string(),
                    response: result.response,
                });
            }
            self.set_pair(pair, &result).await;
        }
        Ok(self.get_pair_data(pair).await.expect("just set"))
    }

    /// Wait for the background subscription loop to produce a fresh
    /// ticker for `pair`, short-sleeping (250ms) between checks rather
    /// than forcing a synchronous fetch like [`Venue::get_fresh_pair`].
    /// Bounded by `update_tickers_timeout`; returns the last known top
    /// (possibly stale, or the zeroed default if never fetched) if the
    /// deadline elapses first.
    pub async fn update_tickers(&self, pair: &str, interval: Duration) -> PairTop {
        let wait = async {
            loop {
                if !self.is_pair_expired(pair, interval).await {
                    return self.get_pair_data(pair).await.expect("just checked fresh");
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        };
        match tokio::time::timeout(self.update_tickers_timeout, wait).await {
            Ok(top) => top,
            Err(_) => self.get_pair_data(pair).await.unwrap_or_default(),
        }
    }

    pub async fn set_pair(&self, pair: &str, result: &crate::session::FetchPairResult) {
        let top = PairTop {
            bid: result.bid,
            ask: result.ask,
            bid_size: result.bid_size,
            ask_size: result.ask_size,
            fetched_at_secs: now_secs(),
        };
        self.pairs.write().await.insert(pair.to_string(), top);
    }

    /// Debounced balance refresh.
    pub async fn fetch_balances(&self) -> crate::error::Result<()> {
        let _debounce = self.fetch_balances_debouncer.enter().await;
        let result = self.session.fetch_balances().await;
        if !result.success {
            warn!("{}: fetch balances failed: {}", self.name, result.response);
            return Ok(());
        }
        *self.balances.write().await = result.balances;
        Ok(())
    }

    /// Balances that changed since the previous call, `(old, new)` per
    /// currency.
    pub async fn calculate_balances_difference(&self) -> HashMap<String, (f64, f64)> {
        let current = self.balances.read().await.clone();
        let mut previous = self.balances_prev.write().await;
        let mut difference = HashMap::new();
        if !previous.is_empty() {
            for (currency, amount) in &current {
                let cached = previous.get(currency).copied().unwrap_or(*amount);
                if floor_with_precision(cached - amount, 4) != 0.0 {
                    difference.insert(currency.clone(), (cached, *amount));
                }
            }
        }
        *previous = current;
        difference
    }

    /// Minimum viable amount per currency, derived from `pair_limits`
    /// (quote side directly, base side scaled by the pair's ask price).
    pub async fn get_currency_limits(&self) -> HashMap<String, f64> {
        let mut limits: HashMap<String, f64> = HashMap::new();
        for (pair, limit) in &self.pair_limits {
            let pair_name = PairName::parse(pair);
            let entry = limits.entry(pair_name.quote.clone()).or_insert(0.0);
            *entry = entry.max(*limit);

            let ask = self.get_pair_data(pair).await.map(|top| top.ask).unwrap_or(0.0);
            let entry = limits.entry(pair_name.base.clone()).or_insert(0.0);
            *entry = entry.max(limit * ask);
        }
        limits
    }

    pub async fn report_balances(&self) {
        let difference = self.calculate_balances_difference().await;
        if difference.is_empty() {
            return;
        }
        let limits = self.get_currency_limits().await;
        let balances = self.balances.read().await;
        let mut not_enough = String::new();
        for currency in difference.keys() {
            let balance = balances.get(currency).copied().unwrap_or(0.0);
            if balance < limits.get(currency).copied().unwrap_or(0.0) {
                not_enough.push_str(&format!(
                    "{currency} balance became not enough for order creation.\n"
                ));
            }
        }
        let message: Vec<String> = difference
            .iter()
            .map(|(currency, (old, new))| format!("{new:.4} {currency} ({:.4})", new - old))
            .collect();
        info!(
            "{}: balances changed: {}\n{}",
            self.name,
            message.join(", "),
            not_enough
        );
        info!(target: "operator", "{} balances changed: {}", self.name, message.join(", "));
    }

    /// Order sell/buy amount should not exceed this venue's balances nor
    /// undershoot the configured pair limit.
    ///
    /// The original bot logs `order.quote` for both the quote- and
    /// base-insufficient-funds warnings (a copy-paste bug); this port logs
    /// the base money for the base-leg check.
    pub async fn validate(&self, order: &Order) -> bool {
        let pair_limit = self.get_pair_limit(&order.offer.pair.to_string());
        if order.quote().amount < pair_limit {
            info!(
                "{}: order quantity {:.4} is too small for pair limit {pair_limit:.4}",
                self.name,
                order.quote().amount
            );
            return false;
        }

        let quote_balance = self.get_balance(&order.quote().currency).await;
        let base_balance = self.get_balance(&order.base().currency).await;
        let factor = order.side().balance_factor();

        let final_quote_balance = quote_balance - factor * order.quote().amount;
        let final_base_balance = base_balance + factor * order.base().amount;

        info!(
            "{}: validate order {:?}. quote_balance={quote_balance:.4} base_balance={base_balance:.4} \
             final_quote_balance={final_quote_balance:.4} final_base_balance={final_base_balance:.4}",
            self.name, order.uuid,
        );

        let is_quote_enough = floor_with_precision(final_quote_balance, 8) >= 0.0;
        let is_base_enough = floor_with_precision(final_base_balance, 8) >= 0.0;

        if !is_quote_enough {
            warn!(
                "{}: not enough {} balance. required {:.4}, available {quote_balance:.4}, diff {final_quote_balance:.4}",
                self.name, order.quote().currency, order.quote().amount,
            );
        }
        if !is_base_enough {
            warn!(
                "{}: not enough {} balance. required {:.4}, available {base_balance:.4}, diff {final_base_balance:.4}",
                self.name, order.base().currency, order.base().amount,
            );
        }

        is_quote_enough && is_base_enough
    }

    pub async fn place(&self, order: &mut Order) -> (bool, String) {
        if !self.validate(order).await {
            return (false, "failed validation".to_string());
        }
        if order.status == OrderStatus::Placed {
            warn!("{}: order already placed, skipping", self.name);
            return (true, String::new());
        }
        let result = self.session.place(order).await;
        let is_placed = matches!(result.order_status, OrderStatus::Placed | OrderStatus::Fulfilled);
        let success = result.success && is_placed;
        order.status = result.order_status;
        if success {
            order.id_on_venue = Some(result.order_id.clone());
        }
        info!(
            "{}: place order result success={success} response={}",
            self.name, result.response
        );
        (success, result.response)
    }

    pub async fn cancel(&self, order: &mut Order) -> (bool, String) {
        if order.is_closed() {
            let message = "can not cancel a closed order".to_string();
            warn!("{}: {message}", self.name);
            return (false, message);
        }
        let result = self.session.cancel(order).await;
        if result.success {
            order.status = OrderStatus::Cancelled;
            info!("{}: order cancelled", self.name);
        } else {
            info!("{}: could not cancel order: {}", self.name, result.response);
        }
        (result.success, result.response)
    }

    pub async fn fetch_status(&self, order: &Order) -> crate::session::FetchStatusResult {
        self.session.fetch_status(order).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::Offer;
    use crate::order::{Order, OrderKind};
    use crate::session::mock::MockSession;

    fn make_venue() -> Venue {
        Venue::new(
            Box::new(MockSession::new("kraken")),
            "kraken",
            vec![PairName::new("ETC", "USD")],
            0.001,
            0.0,
            HashMap::from([("ETCUSD".to_string(), 1.0)]),
        )
    }

    #[tokio::test]
    async fn validate_rejects_order_smaller_than_pair_limit() {
        let venue = make_venue();
        let offer = Offer::new(Side::Ask, PairName::new("ETC", "USD"), 10.0, 0.5, "kraken", 0.0, 0.0).unwrap();
        let order = Order::new(offer, OrderKind::Limit, "arbitrage");
        assert!(!venue.validate(&order).await);
    }

    #[tokio::test]
    async fn validate_rejects_order_exceeding_balance() {
        let venue = make_venue();
        venue.session.fetch_balances().await;
        let offer = Offer::new(Side::Bid, PairName::new("ETC", "USD"), 10.0, 100.0, "kraken", 0.0, 0.0).unwrap();
        let order = Order::new(offer, OrderKind::Limit, "arbitrage");
        assert!(!venue.validate(&order).await);
    }

    #[tokio::test]
    async fn validate_accepts_order_within_balance_and_limit() {
        let venue = make_venue();
        let offer = Offer::new(Side::Bid, PairName::new("ETC", "USD"), 10.0, 5.0, "kraken", 0.0, 0.0).unwrap();
        let order = Order::new(offer, OrderKind::Limit, "arbitrage");
        venue.balances.write().await.insert("ETC".to_string(), 100.0);
        assert!(venue.validate(&order).await);
    }

    #[tokio::test]
    async fn start_populates_the_ticker_cache_from_the_subscription_loop() {
        use crate::session::mock::MockQuote;
        use std::time::Duration as StdDuration;

        let session = MockSession::new("kraken");
        session
            .set_quote(
                "ETCUSD",
                MockQuote {
                    bid: 10.0,
                    ask: 10.5,
                    bid_size: 1.0,
                    ask_size: 1.0,
                },
            )
            .await;
        let mut venue = Venue::new(
            Box::new(session),
            "kraken",
            vec![PairName::new("ETC", "USD")],
            0.0,
            0.0,
            HashMap::new(),
        );
        venue.update_tickers_interval = StdDuration::from_millis(10);
        venue.subscribe_on_pairs_delay = StdDuration::from_millis(0);

        let venue = Arc::new(venue);
        Venue::start(Arc::clone(&venue));

        // Give the spawned subscription task a few ticks to run.
        tokio::time::sleep(StdDuration::from_millis(50)).await;

        let top = venue.get_pair_data("ETCUSD").await.expect("ticker cache populated");
        assert_eq!(top.ask, 10.5);
        assert_eq!(top.bid, 10.0);

        venue.stop().await;
    }
}
