use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};

use crate::error::Result;
use crate::money::{Money, PairName};
use crate::offer::{Offer, Side};
use crate::order::{Order, OrderKind, OrderStatus};
use crate::reversal_queue::ReversalQueue;
use crate::store::Store;
use crate::venue::Venue;
use crate::venues::Venues;

/// Timings the order-placement/polling protocol uses, grounded on
/// `Arbitrage.trade_timings` (`fetch_order_interval`, `sleep_after_placed`,
/// `timeout`).
#[derive(Debug, Clone, Copy)]
pub struct TradeTimings {
    pub fetch_order_interval: Duration,
    pub sleep_after_placed: Duration,
    pub timeout: Duration,
}

impl Default for TradeTimings {
    fn default() -> Self {
        TradeTimings {
            fetch_order_interval: Duration::from_secs(5),
            sleep_after_placed: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Place `order` on its venue, then poll until it closes (or the timeout
/// elapses), mirroring `Order.trade`'s place -> sleep -> poll -> finalize
/// sequence.
async fn trade_order(order: &mut Order, venue: &Venue, timings: TradeTimings) -> (bool, String) {
    let (is_placed, place_response) = venue.place(order).await;
    if !is_placed {
        return (false, place_response);
    }

    tokio::time::sleep(timings.sleep_after_placed).await;

    let poll = async {
        loop {
            let result = venue.fetch_status(order).await;
            if let Some(status) = result.status {
                order.status = status;
            }
            if order.is_closed() {
                return result.response;
            }
            tokio::time::sleep(timings.fetch_order_interval).await;
        }
    };

    match tokio::time::timeout(timings.timeout, poll).await {
        Ok(response) => {
            order.executed_at = Some(Utc::now());
            if order.status == OrderStatus::Cancelled {
                (false, response)
            } else {
                tokio::time::sleep(Duration::from_millis(500)).await;
                let _ = venue.fetch_balances().await;
                (true, response)
            }
        }
        Err(_) => {
            let (_, cancel_response) = venue.cancel(order).await;
            (false, cancel_response)
        }
    }
}

/// Build the market order that unwinds `order`, using a freshly fetched
/// price where possible and falling back to the stale offer price (the
/// reversed order is always market-typed, so a stale price doesn't
/// distort execution) when the venue can't be reached.
async fn get_reversed_order(order: &Order, venue: &Venue, pair_interval: Duration) -> Option<Order> {
    let reversed_side = order.offer.side.reversed();
    let pair_str = order.offer.pair.to_string();
    let price = match venue.get_fresh_pair(&pair_str, pair_interval).await {
        Ok(top) => match reversed_side {
            Side::Ask => top.ask,
            Side::Bid => top.bid,
        },
        Err(err) => {
            warn!("{err}. using stale offer to build reversed order.");
            order.offer.price
        }
    };
    order.reversed(Some(price))
}

/// Special prices state of a ticker pair: an arbitrage window is open when
/// buying on the ask venue and selling on the bid venue is immediately
/// profitable, and closed when that's no longer (or barely) true.
#[derive(Debug, Clone)]
pub struct ArbitrageWindow {
    pub ask_offer: Offer,
    pub bid_offer: Offer,
    pub direct_width: f64,
    pub reversed_width: f64,
}

impl ArbitrageWindow {
    pub fn new(ask_offer: Offer, bid_offer: Offer, direct_width: f64, reversed_width: f64) -> Self {
        ArbitrageWindow {
            ask_offer,
            bid_offer,
            direct_width,
            reversed_width,
        }
    }

    /// A window only makes sense across two distinct venues.
    pub fn exists(&self) -> bool {
        self.ask_offer.venue != self.bid_offer.venue
    }

    /// Buying on the ask venue and selling on the bid venue is profitable
    /// by at least `direct_width`.
    pub fn is_open(&self) -> bool {
        self.ask_offer.total_price() * self.direct_width < self.bid_offer.total_price()
    }

    /// The spread has narrowed enough (by `reversed_width`) that open
    /// orders should be unwound.
    pub fn is_closed(&self) -> bool {
        self.ask_offer.price * self.reversed_width >= self.bid_offer.price
    }
}

/// Calculate the max quote/base amounts worth spending on the given
/// offers, bounded by venue balances and the configured per-pair/venue
/// limits.
///
/// Ported from the module-level `get_max_spend` function: despite the
/// name, it computes the *minimum* viable sum across offers, because that
/// minimum is the most either leg can actually trade.
pub async fn get_max_spend(offers: &[&Offer], venues: &Venues, max_spend_part: f64) -> Option<(Money, Money)> {
    const MAX_SUM: f64 = 1e32;

    async fn get_max_offer_and_balance<'a>(
        offers: &'a [&'a Offer],
        side: Side,
        venues: &Venues,
    ) -> Option<(f64, f64, &'a Offer)> {
        let mut min_amount = MAX_SUM;
        let mut min_price = 0.0;
        let mut min_offer = None;
        for offer in offers {
            if offer.side != side {
                continue;
            }
            let offer_money = match side {
                Side::Ask => &offer.base,
                Side::Bid => &offer.quote,
            };
            let venue = venues.get(&offer.venue).ok()?;
            let balance = venue.get_balance(&offer_money.currency).await;
            let amount = balance.min(offer_money.amount);
            if amount < min_amount {
                min_amount = amount;
                min_price = offer.price;
                min_offer = Some(*offer);
            }
        }
        min_offer.map(|offer| (min_amount, min_price, offer))
    }

    if offers.is_empty() {
        return None;
    }
    let base_currency = offers[0].base.currency.clone();
    let quote_currency = offers[0].quote.currency.clone();
    for offer in offers {
        if offer.base.currency != base_currency || offer.quote.currency != quote_currency {
            return None;
        }
    }

    let mut exchange_limit = MAX_SUM;
    for offer in offers {
        if let Ok(venue) = venues.get(&offer.venue) {
            let limit = venue.get_limit();
            let limit = if limit == 0.0 { MAX_SUM } else { limit };
            exchange_limit = exchange_limit.min(limit);
        }
    }

    let (max_base_sum, max_base_price, ask_offer) = get_max_offer_and_balance(offers, Side::Ask, venues).await?;
    let (max_quote_sum, _max_quote_price, bid_offer) = get_max_offer_and_balance(offers, Side::Bid, venues).await?;

    let max_quote_sum = max_quote_sum.min(max_base_sum / max_base_price);
    let max_base_sum = max_base_sum.min(max_quote_sum * max_base_price);

    let max_base_sum = max_base_sum * (1.0 - 2.0 * ask_offer.fee);
    let max_quote_sum = max_quote_sum * (1.0 - 2.0 * bid_offer.fee);

    let max_base_sum = max_base_sum * max_spend_part;
    let max_quote_sum = max_quote_sum * max_spend_part;

    let max_quote_sum_or_limit = max_quote_sum.min(exchange_limit);

    Some((
        Money::new(max_base_sum, base_currency),
        Money::new(max_quote_sum_or_limit, quote_currency),
    ))
}

/// The buy/sell order pair created from an [`ArbitrageWindow`], sized by
/// [`get_max_spend`].
pub struct ArbitrageOrdersPair {
    pub buy_order: Order,
    pub sell_order: Order,
}

impl ArbitrageOrdersPair {
    pub async fn new(window: &ArbitrageWindow, max_spend_part: f64, order_type: OrderKind, venues: &Venues) -> Option<Self> {
        let (max_base, max_quote) = get_max_spend(&[&window.ask_offer, &window.bid_offer], venues, max_spend_part).await?;
        if max_base.amount <= 0.0 || max_quote.amount <= 0.0 {
            debug!(
                "not enough funds to proceed window: ask venue {}, bid venue {}",
                window.ask_offer.venue, window.bid_offer.venue
            );
            return None;
        }
        let mut buy_order = Order::new(window.ask_offer.clone(), order_type, "arbitrage");
        let mut sell_order = Order::new(window.bid_offer.clone(), order_type, "arbitrage");
        buy_order.set_base_amount(max_base.amount)?;
        sell_order.set_quote_amount(max_quote.amount)?;
        Some(ArbitrageOrdersPair { buy_order, sell_order })
    }

    pub async fn is_valid(&self, venues: &Venues) -> bool {
        let buy_valid = match venues.get(&self.buy_order.offer.venue) {
            Ok(venue) => venue.validate(&self.buy_order).await,
            Err(_) => false,
        };
        let sell_valid = match venues.get(&self.sell_order.offer.venue) {
            Ok(venue) => venue.validate(&self.sell_order).await,
            Err(_) => false,
        };
        if !buy_valid {
            debug!("bot declined order, placing cancelled: {:?}", self.buy_order.uuid);
        }
        if !sell_valid {
            debug!("bot declined order, placing cancelled: {:?}", self.sell_order.uuid);
        }
        buy_valid && sell_valid
    }

    pub async fn save(&mut self, store: &Store) -> Result<()> {
        store.save_order(&mut self.buy_order).await?;
        store.save_order(&mut self.sell_order).await?;
        Ok(())
    }
}

/// Scan all venues for a profitable window; place orders into it; wait for
/// the window to close (or an order pair's auto-reverse deadline to pass),
/// then unwind.
///
/// Grounded on `cryptotrader.strategy.arbitrage.Arbitrage`: `step` (the
/// original's `schedule`) runs `exit` then `enter` every tick, matching
/// the concurrency contract in the design notes (reversal always
/// completes before a new window is entered).
pub struct ArbitrageStrategy {
    pub venues: Arc<Venues>,
    pub store: Option<Store>,
    pub reversal_queue: Box<dyn ReversalQueue>,
    pub pairs: Vec<PairName>,
    pub window_direct_width: f64,
    pub window_reversed_width: f64,
    pub max_spend_part: f64,
    pub interval: Duration,
    pub order_placement_interval: Duration,
    pub autoreverse_order_delta: chrono::Duration,
    pub order_type: OrderKind,
    pub trade_timings: TradeTimings,
}

impl ArbitrageStrategy {
    pub async fn step(&self) -> Result<()> {
        self.exit().await?;
        self.enter().await?;
        Ok(())
    }

    async fn enter(&self) -> Result<()> {
        if let Some(window) = self.locate_window().await {
            info!(
                "arbitrage window detected: ask {} @ {}, bid {} @ {}",
                window.ask_offer.venue, window.ask_offer.price, window.bid_offer.venue, window.bid_offer.price
            );
            info!(target: "operator", "arbitrage window detected for {}", window.ask_offer.pair);
            self.process_window(&window).await?;
            tokio::time::sleep(self.order_placement_interval).await;
        }
        Ok(())
    }

    async fn exit(&self) -> Result<()> {
        self.reverse_orders().await
    }

    /// Every currently-fresh, big-enough offer per pair, across all
    /// venues.
    async fn pair_offer_map(&self) -> std::collections::HashMap<String, Vec<Offer>> {
        let map = self.venues.get_pair_offer_map(Some(&self.pairs)).await;
        let expired_at = crate::offer::now_secs(Utc::now()) - self.interval.as_secs_f64();
        let mut filtered = std::collections::HashMap::new();
        for (pair, offers) in map {
            let mut kept = Vec::new();
            for offer in offers {
                if offer.timestamp < expired_at {
                    continue;
                }
                if offer_in_pair_limit(&offer, &self.venues, self.max_spend_part).await {
                    kept.push(offer);
                }
            }
            filtered.insert(pair, kept);
        }
        filtered
    }

    /// Find the single most profitable window across every tracked pair:
    /// the lowest ask paired with the highest bid.
    async fn locate_window(&self) -> Option<ArbitrageWindow> {
        let pair_offer_map = self.pair_offer_map().await;
        for offers in pair_offer_map.values() {
            let mut max_bid: Option<&Offer> = None;
            let mut min_ask: Option<&Offer> = None;
            for offer in offers {
                match offer.side {
                    Side::Bid => {
                        if max_bid.map(|b| b.price < offer.price).unwrap_or(true) {
                            max_bid = Some(offer);
                        }
                    }
                    Side::Ask => {
                        if min_ask.map(|a| a.price > offer.price).unwrap_or(true) {
                            min_ask = Some(offer);
                        }
                    }
                }
            }
            if let (Some(ask), Some(bid)) = (min_ask, max_bid) {
                let window = ArbitrageWindow::new(
                    ask.clone(),
                    bid.clone(),
                    self.window_direct_width,
                    self.window_reversed_width,
                );
                if window.exists() && window.is_open() {
                    return Some(window);
                }
            }
        }
        None
    }

    async fn process_window(&self, window: &ArbitrageWindow) -> Result<()> {
        let Some(mut orders_pair) =
            ArbitrageOrdersPair::new(window, self.max_spend_part, self.order_type, &self.venues).await
        else {
            return Ok(());
        };

        if orders_pair.is_valid(&self.venues).await && window.is_open() {
            let success = self.place(&mut orders_pair).await?;
            if success {
                self.reversal_queue
                    .push((orders_pair.buy_order, orders_pair.sell_order))
                    .await?;
            }
        }
        Ok(())
    }

    async fn place(&self, orders_pair: &mut ArbitrageOrdersPair) -> Result<bool> {
        debug!("submitting orders: {:?} {:?}", orders_pair.buy_order.uuid, orders_pair.sell_order.uuid);

        let buy_venue = self.venues.get(&orders_pair.buy_order.offer.venue)?;
        let sell_venue = self.venues.get(&orders_pair.sell_order.offer.venue)?;
        let timings = self.trade_timings;
        let (buy_result, sell_result) = tokio::join!(
            trade_order(&mut orders_pair.buy_order, buy_venue, timings),
            trade_order(&mut orders_pair.sell_order, sell_venue, timings),
        );
        let (buy_success, buy_response) = buy_result;
        let (sell_success, sell_response) = sell_result;

        if !buy_success {
            warn!("arbitrage order submit failed: {buy_response}");
            if sell_success {
                self.reverse_order(&mut orders_pair.sell_order).await?;
            }
        }
        if !sell_success {
            warn!("arbitrage order submit failed: {sell_response}");
            if buy_success {
                self.reverse_order(&mut orders_pair.buy_order).await?;
            }
        }

        if let Some(store) = &self.store {
            orders_pair.save(store).await?;
        }

        let success = buy_success && sell_success;
        if success {
            debug!("arbitrage orders submitted successfully");
            info!(target: "operator", "orders placed successfully for {}", orders_pair.buy_order.offer.pair);
        } else {
            info!(target: "operator", "orders place error for {}", orders_pair.buy_order.offer.pair);
        }
        Ok(success)
    }

    async fn reverse_order(&self, order: &mut Order) -> Result<()> {
        let venue = self.venues.get(&order.offer.venue)?;
        if let Some(mut reversed) = get_reversed_order(order, venue, venue.ticker_freshness_interval).await {
            if venue.validate(&reversed).await {
                let _ = trade_order(&mut reversed, venue, self.trade_timings).await;
            }
        }
        Ok(())
    }

    fn are_orders_expired(&self, orders: &[&Order]) -> bool {
        let expired_after = Utc::now() - self.autoreverse_order_delta;
        orders.iter().all(|order| order.executed_at.map(|t| t < expired_after).unwrap_or(false))
    }

    /// Drain the reversal queue: refresh each pending pair's prices, and
    /// reverse (unwind) it once its window has closed or it has aged past
    /// the auto-reverse deadline.
    async fn reverse_orders(&self) -> Result<()> {
        let length = self.reversal_queue.length().await?;
        for _ in 0..length {
            let (mut buy_order, mut sell_order) = match self.reversal_queue.pop().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            debug!("non-reversed orders from storage: {:?} {:?}", buy_order.uuid, sell_order.uuid);

            let buy_venue = match self.venues.get(&buy_order.offer.venue) {
                Ok(v) => v,
                Err(_) => {
                    self.reversal_queue.push((buy_order, sell_order)).await?;
                    continue;
                }
            };
            let sell_venue = match self.venues.get(&sell_order.offer.venue) {
                Ok(v) => v,
                Err(_) => {
                    self.reversal_queue.push((buy_order, sell_order)).await?;
                    continue;
                }
            };

            let fresh_ask = match buy_venue
                .get_fresh_pair(&buy_order.offer.pair.to_string(), buy_venue.ticker_freshness_interval)
                .await
            {
                Ok(top) => buy_order.offer.with_fresh_price(top.ask, top.fetched_at_secs),
                Err(err) => {
                    warn!("{err}. bot will try to reverse this pair later.");
                    self.reversal_queue.push((buy_order, sell_order)).await?;
                    continue;
                }
            };
            let fresh_bid = match sell_venue
                .get_fresh_pair(&sell_order.offer.pair.to_string(), sell_venue.ticker_freshness_interval)
                .await
            {
                Ok(top) => sell_order.offer.with_fresh_price(top.bid, top.fetched_at_secs),
                Err(err) => {
                    warn!("{err}. bot will try to reverse this pair later.");
                    self.reversal_queue.push((buy_order, sell_order)).await?;
                    continue;
                }
            };

            let (Some(ask_offer), Some(bid_offer)) = (fresh_ask, fresh_bid) else {
                self.reversal_queue.push((buy_order, sell_order)).await?;
                continue;
            };

            let fresh_window = ArbitrageWindow::new(ask_offer, bid_offer, self.window_direct_width, self.window_reversed_width);
            let expired = self.are_orders_expired(&[&buy_order, &sell_order]);

            if !(fresh_window.is_closed() || expired) {
                self.reversal_queue.push((buy_order, sell_order)).await?;
                continue;
            }

            if expired {
                info!(target: "operator", "pair of orders auto-reversed after {:?}", self.autoreverse_order_delta);
            }

            let Some(mut reversed_buy) = get_reversed_order(&buy_order, buy_venue, buy_venue.ticker_freshness_interval).await else {
                self.reversal_queue.push((buy_order, sell_order)).await?;
                continue;
            };
            let Some(mut reversed_sell) = get_reversed_order(&sell_order, sell_venue, sell_venue.ticker_freshness_interval).await else {
                self.reversal_queue.push((buy_order, sell_order)).await?;
                continue;
            };

            if !(buy_venue.validate(&reversed_buy).await && sell_venue.validate(&reversed_sell).await) {
                self.reversal_queue.push((buy_order, sell_order)).await?;
                continue;
            }

            let timings = self.trade_timings;
            let (buy_reverse_result, sell_reverse_result) = tokio::join!(
                trade_order(&mut reversed_buy, buy_venue, timings),
                trade_order(&mut reversed_sell, sell_venue, timings),
            );

            if let Some(store) = &self.store {
                let _ = store.save_order(&mut reversed_buy).await;
                let _ = store.save_order(&mut reversed_sell).await;
            }

            if !buy_reverse_result.0 {
                warn!("reversed order submit failed: {}", buy_reverse_result.1);
            }
            if !sell_reverse_result.0 {
                warn!("reversed order submit failed: {}", sell_reverse_result.1);
            }

            if buy_reverse_result.0 && sell_reverse_result.0 {
                info!(target: "operator", "reversed orders placed successfully for {}", reversed_buy.offer.pair);
            } else {
                info!(target: "operator", "reverse orders place error for {}", reversed_buy.offer.pair);
            }
        }
        Ok(())
    }
}

/// `Offer` funds/limit check used when deciding which offers are big
/// enough to act on, grounded on `Offer.in_pair_limit`.
pub async fn offer_in_pair_limit(offer: &Offer, venues: &Venues, max_spend_part: f64) -> bool {
    let Ok(venue) = venues.get(&offer.venue) else {
        return false;
    };
    let funds = offer.funds_to_check();
    let balance = venue.get_balance(&funds.currency).await;
    let pair_limit = venue.get_pair_limit(&offer.pair.to_string());
    let price_factor = offer.price_factor();
    balance * max_spend_part >= pair_limit * price_factor && offer.quote.amount * max_spend_part >= pair_limit
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::MockSession;
    use std::collections::HashMap as Map;

    fn offer(side: Side, venue: &str, price: f64, quote: f64, fee: f64) -> Offer {
        Offer::new(side, PairName::new("ETC", "USD"), price, quote, venue, fee, 0.0).unwrap()
    }

    async fn venues_with_empty_balances() -> Venues {
        let venue_a = Venue::new(
            Box::new(MockSession::new("a")),
            "a",
            vec![PairName::new("ETC", "USD")],
            0.0,
            0.0,
            Map::new(),
        );
        let venue_b = Venue::new(
            Box::new(MockSession::new("b")),
            "b",
            vec![PairName::new("ETC", "USD")],
            0.0,
            0.0,
            Map::new(),
        );
        let venues = Venues::new(vec![venue_a, venue_b]);
        venues.get("a").unwrap().fetch_balances().await.unwrap();
        venues.get("b").unwrap().fetch_balances().await.unwrap();
        venues
    }

    #[test]
    fn window_is_open_when_ask_cheaper_than_bid() {
        let ask = offer(Side::Ask, "a", 10.0, 1.0, 0.0);
        let bid = offer(Side::Bid, "b", 11.0, 1.0, 0.0);
        let window = ArbitrageWindow::new(ask, bid, 1.0, 1.0);
        assert!(window.exists());
        assert!(window.is_open());
    }

    #[test]
    fn window_does_not_exist_on_a_single_venue() {
        let ask = offer(Side::Ask, "a", 10.0, 1.0, 0.0);
        let bid = offer(Side::Bid, "a", 11.0, 1.0, 0.0);
        let window = ArbitrageWindow::new(ask, bid, 1.0, 1.0);
        assert!(!window.exists());
    }

    #[test]
    fn window_is_closed_when_spread_narrows() {
        let ask = offer(Side::Ask, "a", 10.0, 1.0, 0.0);
        let bid = offer(Side::Bid, "b", 10.0, 1.0, 0.0);
        let window = ArbitrageWindow::new(ask, bid, 1.0, 1.0);
        assert!(window.is_closed());
    }

    #[tokio::test]
    async fn get_max_spend_bounds_by_the_smaller_balance() {
        let venues = venues_with_empty_balances().await;
        // balances start at zero so max spend should be zero on both legs
        let ask = offer(Side::Ask, "a", 10.0, 5.0, 0.0);
        let bid = offer(Side::Bid, "b", 10.0, 5.0, 0.0);
        let result = get_max_spend(&[&ask, &bid], &venues, 1.0).await;
        let (base, quote) = result.unwrap();
        assert_eq!(base.amount, 0.0);
        assert_eq!(quote.amount, 0.0);
    }
}
