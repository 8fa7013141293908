use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::order::OrderStatus;
use crate::store::Store;
use crate::strategy::arbitrage::ArbitrageStrategy;
use crate::venues::Venues;

/// Extra time budget a scheduled tick gets beyond its own interval before
/// it's considered hung and logged as timed out.
///
/// Ported from `App.DELAY_AFTER_INTERVAL`.
const DELAY_AFTER_INTERVAL: Duration = Duration::from_secs(5);

/// The whole running process: venues, the strategy, and the periodic
/// schedule driving them.
///
/// Grounded on `cryptotrader.commands.execute.App`: `warm_up` cancels any
/// orders left `placed` from a previous run before the first tick (same
/// ordering as `App._warm_up` = `_cancel_placed_orders` then `_schedule`),
/// and `run`'s loop is the Rust realization of `common.make_schedule` —
/// a bounded-timeout, non-overlapping tick gated by an `is_running` flag.
pub struct Application {
    pub store: Store,
    pub venues: Arc<Venues>,
    pub strategy: ArbitrageStrategy,
    pub interval: Duration,
    is_running: Arc<AtomicBool>,
}

impl Application {
    pub fn new(store: Store, venues: Arc<Venues>, strategy: ArbitrageStrategy, interval: Duration) -> Self {
        Application {
            store,
            venues,
            strategy,
            interval,
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel any orders left `placed` by a previous, uncleanly stopped
    /// run, then bring every venue's caches up to date — matching
    /// `App._warm_up`.
    pub async fn warm_up(&self) -> Result<()> {
        info!("found placed orders in db and will try to cancel them on their venues");
        let placed = self.store.placed_orders(&self.venues).await?;
        for mut order in placed {
            match self.venues.get(order.venue()) {
                Ok(venue) => {
                    let (success, response) = venue.cancel(&mut order).await;
                    if success {
                        order.status = OrderStatus::Cancelled;
                        self.store.save_order(&mut order).await?;
                    } else {
                        warn!("order {:?} was not cancelled: {response}", order.uuid);
                    }
                }
                Err(Error::UnknownVenue(name)) => {
                    warn!(
                        "skip cancelling an order on {name}, because the venue is no longer configured. order uuid: {:?}",
                        order.uuid
                    );
                }
                Err(err) => return Err(err),
            }
        }
        self.venues.schedule().await;
        Ok(())
    }

    /// Run the periodic tick loop until [`Application::stop`] is called.
    ///
    /// Each tick runs `venues.schedule()` before `strategy.step()` — the
    /// ordering `App._schedule` relies on so the strategy always sees
    /// freshly refreshed venue tickers/balances — and both are bounded
    /// together by `interval + DELAY_AFTER_INTERVAL`; a tick that
    /// overruns is logged and abandoned rather than left to overlap with
    /// the next one.
    pub async fn run(&self) -> Result<()> {
        self.warm_up().await?;
        self.venues.start();
        self.is_running.store(true, Ordering::SeqCst);

        let timeout = self.interval + DELAY_AFTER_INTERVAL;
        while self.is_running.load(Ordering::SeqCst) {
            let step = async {
                self.venues.schedule().await;
                self.strategy.step().await
            };
            match tokio::time::timeout(timeout, step).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => error!("error in strategy step: {err}"),
                Err(_) => error!("strategy step timed out after {timeout:?}"),
            }
            tokio::time::sleep(self.interval).await;
        }
        Ok(())
    }

    pub async fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        self.venues.stop().await;
    }
}

/// Build an [`Application`] from a loaded [`Config`], wiring venues,
/// store and strategy together. Grounded on
/// `App._get_exchanges`/`_get_strategies`.
pub async fn build_application(config: &Config, mut venues: Venues, store: Store) -> Result<Application> {
    let strategy_config = &config.strategies.arbitrage;
    let pairs: Vec<crate::money::PairName> = strategy_config.pairs.iter().map(|p| crate::money::PairName::parse(p)).collect();

    venues.attach_store(store.clone());
    let venues = Arc::new(venues);
    let reversal_queue = store.reversal_queue(venues.clone());

    let strategy = ArbitrageStrategy {
        venues: venues.clone(),
        store: Some(store.clone()),
        reversal_queue: Box::new(reversal_queue),
        pairs,
        window_direct_width: strategy_config.window_direct_width,
        window_reversed_width: strategy_config.window_reversed_width,
        max_spend_part: strategy_config.max_spend_part,
        interval: config.app.interval(),
        order_placement_interval: Duration::from_secs(strategy_config.fetch_order_interval_secs),
        autoreverse_order_delta: chrono::Duration::seconds(strategy_config.autoreverse_order_delta_secs),
        order_type: strategy_config.order_kind()?,
        trade_timings: crate::strategy::arbitrage::TradeTimings {
            fetch_order_interval: Duration::from_secs(strategy_config.fetch_order_interval_secs),
            sleep_after_placed: Duration::from_secs(1),
            timeout: Duration::from_secs(strategy_config.order_timeout_secs),
        },
    };

    Ok(Application::new(store, venues, strategy, config.app.interval()))
}
