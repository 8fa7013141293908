use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use log::warn;

use crate::error::{Error, Result};
use crate::money::PairName;
use crate::offer::{Offer, Side};
use crate::store::Store;
use crate::venue::Venue;

/// The full set of venues an [`crate::strategy::arbitrage::ArbitrageStrategy`]
/// trades across.
///
/// Grounded on `cryptotrader.exchange.base.exchanges.Exchanges`: a named
/// collection that fans operations out with `futures::future::join_all`
/// (the Rust analogue of `asyncio.gather`) and flattens every venue's
/// current ticker into an ask+bid offer list per pair.
pub struct Venues {
    venues: HashMap<String, Arc<Venue>>,
}

impl Venues {
    pub fn new(venues: Vec<Venue>) -> Self {
        Venues {
            venues: venues.into_iter().map(|v| (v.name.clone(), Arc::new(v))).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Result<&Venue> {
        self.venues
            .get(name)
            .map(|venue| venue.as_ref())
            .ok_or_else(|| Error::UnknownVenue(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Venue> {
        self.venues.values().map(|venue| venue.as_ref())
    }

    /// Attach the persistence store to every venue so their subscription
    /// loops can append `trade_history` rows. Must run before [`Venues::start`]
    /// shares these venues across spawned tasks (each `Arc<Venue>` must
    /// still be uniquely owned here).
    pub fn attach_store(&mut self, store: Store) {
        for venue in self.venues.values_mut() {
            match Arc::get_mut(venue) {
                Some(venue) => venue.set_store(store.clone()),
                None => warn!("could not attach store to a venue already shared elsewhere"),
            }
        }
    }

    /// Start every venue's background subscription/balance-refresh loops.
    pub fn start(&self) {
        for venue in self.venues.values() {
            Venue::start(Arc::clone(venue));
        }
    }

    /// Fan every venue's own `schedule` out, then refresh every tracked
    /// pair's cross-venue ticker and report each venue's aggregated
    /// balance delta — the Rust analogue of `exchanges.py`'s
    /// `await asyncio.gather(self.update_tickers(), self.report_balances())`
    /// run immediately after the per-venue schedule fan-out.
    pub async fn schedule(&self) {
        join_all(self.venues.values().map(|venue| venue.schedule())).await;
        tokio::join!(self.update_tickers(), self.report_balances());
    }

    /// Refresh every venue's tracked pairs, bounded by that venue's own
    /// `update_tickers_timeout`.
    pub async fn update_tickers(&self) {
        join_all(self.venues.values().map(|venue| async move {
            let pairs: Vec<String> = venue.default_pairs.iter().map(|pair| pair.to_string()).collect();
            join_all(pairs.iter().map(|pair| venue.update_tickers(pair, venue.ticker_freshness_interval))).await;
        }))
        .await;
    }

    pub async fn stop(&self) {
        join_all(self.venues.values().map(|venue| venue.stop())).await;
    }

    pub async fn fetch_balances(&self) {
        join_all(self.venues.values().map(|venue| venue.fetch_balances())).await;
    }

    pub async fn balances_str(&self) -> String {
        let mut parts = Vec::new();
        for venue in self.venues.values() {
            parts.push(venue.balances_str().await);
        }
        parts.join("\n")
    }

    pub async fn report_balances(&self) {
        join_all(self.venues.values().map(|venue| venue.report_balances())).await;
    }

    /// Every currently-cached ask/bid [`Offer`] across every venue, for
    /// the given pairs (or every pair this collection tracks, if `None`).
    pub async fn get_pair_offer_map(&self, pairs: Option<&[PairName]>) -> HashMap<String, Vec<Offer>> {
        let mut offers: HashMap<String, Vec<Offer>> = HashMap::new();
        for venue in self.venues.values() {
            let pairs_to_check: Vec<PairName> = match pairs {
                Some(pairs) => pairs.to_vec(),
                None => venue.default_pairs.clone(),
            };
            for pair in pairs_to_check {
                let pair_str = pair.to_string();
                if let Some(top) = venue.get_pair_data(&pair_str).await {
                    if let Some(ask) = Offer::new(
                        Side::Ask,
                        pair.clone(),
                        top.ask,
                        top.ask_size,
                        venue.name.clone(),
                        venue.fee,
                        top.fetched_at_secs,
                    ) {
                        offers.entry(pair_str.clone()).or_default().push(ask);
                    }
                    if let Some(bid) = Offer::new(
                        Side::Bid,
                        pair.clone(),
                        top.bid,
                        top.bid_size,
                        venue.name.clone(),
                        venue.fee,
                        top.fetched_at_secs,
                    ) {
                        offers.entry(pair_str.clone()).or_default().push(bid);
                    }
                }
            }
        }
        if offers.is_empty() {
            warn!("offers list is empty");
        }
        offers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::mock::{MockQuote, MockSession};
    use std::time::Duration;

    #[tokio::test]
    async fn get_pair_offer_map_builds_ask_and_bid_per_venue() {
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
        venue.update_tickers_interval = Duration::from_secs(10);
        let result = venue.session.fetch_pair("ETCUSD", 0.0).await;
        venue.set_pair("ETCUSD", &result).await;

        let venues = Venues::new(vec![venue]);
        let offers = venues.get_pair_offer_map(None).await;
        assert_eq!(offers.get("ETCUSD").map(|o| o.len()), Some(2));
    }

    #[test]
    fn get_unknown_venue_is_an_error() {
        let venues = Venues::new(vec![]);
        assert!(venues.get("nope").is_err());
    }
}
