use std::collections::HashMap;

use clap::{Parser, Subcommand};
use log::{error, info};

use crate::config::{Config, VenueConfig};
use crate::error::{Error, Result};
use crate::money::PairName;
use crate::offer::{Offer, Side};
use crate::order::{Order, OrderKind};
use crate::session::binance::BinanceSession;
use crate::session::VenueSession;
use crate::store::Store;
use crate::venue::Venue;
use crate::venues::Venues;

/// Balance margin (in USD) above which `prepare-arbitrage` sells off
/// redundant crypto, and below which it tops a currency back up.
///
/// Ported from `cryptotrader.cli`'s `BALANCE_TOP_MARGIN`/`BALANCE_BOTTOM_MARGIN`.
const BALANCE_TOP_MARGIN: f64 = 30.0;
const BALANCE_BOTTOM_MARGIN: f64 = 20.0;

#[derive(Parser)]
#[command(name = "arbd", about = "cross-exchange arbitrage trading engine")]
pub struct Cli {
    #[arg(long, default_value = "config.yaml")]
    pub config: String,

    #[arg(long)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the strategy loop forever.
    Execute,
    /// Print every non-zero balance on every venue.
    Balances,
    /// Immediately place a market order on one venue.
    Place {
        #[arg(short, long)]
        venue: String,
        #[arg(short, long)]
        side: String,
        #[arg(short, long)]
        amount: f64,
        #[arg(short, long)]
        pair: String,
        #[arg(long, default_value_t = 0.0)]
        price: f64,
    },
    /// Even out balances across venues ahead of running arbitrage.
    PrepareArbitrage {
        #[arg(long)]
        min: Option<f64>,
        #[arg(long)]
        max: Option<f64>,
    },
}

fn build_session(name: &str, venue_config: &VenueConfig) -> Result<Box<dyn VenueSession>> {
    let api_key = venue_config
        .transport
        .api_key_env
        .as_ref()
        .map(|env| std::env::var(env))
        .transpose()
        .map_err(|_| Error::Config("venue api key env var is not set".into()))?
        .unwrap_or_default();
    let api_secret = Config::resolve_secret(&venue_config.transport.api_secret_env)?;
    Ok(Box::new(BinanceSession::new(
        name,
        venue_config.transport.base_url.clone(),
        api_key,
        api_secret,
        venue_config.transport.rate_limit.limit,
        std::time::Duration::from_secs(venue_config.transport.rate_limit.period_secs),
    )))
}

/// Build the [`Venues`] collection from config, merging each venue's
/// overrides onto `default_exchange` the way `App._get_exchanges` merges
/// `{**default_exchange_config, **exchanges_config[name]}`.
pub fn venues_from_config(config: &Config) -> Result<Venues> {
    let mut built = Vec::new();
    for (name, venue_config) in &config.exchanges {
        let session = build_session(name, venue_config)?;
        let fee = venue_config.fee.unwrap_or(config.default_exchange.fee);
        let limit = venue_config.limit.unwrap_or(config.default_exchange.limit);
        let pair_limits: HashMap<String, f64> = venue_config
            .pair_limits
            .clone()
            .unwrap_or_else(|| config.default_exchange.pair_limits.clone());
        let default_pairs: Vec<PairName> = if venue_config.default_pairs.is_empty() {
            config.strategies.arbitrage.pairs.iter().map(|p| PairName::parse(p)).collect()
        } else {
            venue_config.default_pairs.iter().map(|p| PairName::parse(p)).collect()
        };
        let mut venue = Venue::new(session, name.clone(), default_pairs, fee, limit, pair_limits);
        venue.pair_name_template = venue_config
            .pair_name_template
            .clone()
            .unwrap_or_else(|| config.default_exchange.pair_name_template.clone());
        venue.update_tickers_interval = std::time::Duration::from_secs(
            venue_config
                .update_tickers_interval_secs
                .unwrap_or(config.default_exchange.update_tickers_interval_secs),
        );
        venue.subscribe_on_pairs_delay = std::time::Duration::from_millis(
            venue_config
                .subscribe_on_pairs_delay_ms
                .unwrap_or(config.default_exchange.subscribe_on_pairs_delay_ms),
        );
        venue.set_fetch_balances_interval(std::time::Duration::from_secs(
            venue_config
                .fetch_balances_interval_secs
                .unwrap_or(config.default_exchange.fetch_balances_interval_secs),
        ));
        venue.update_tickers_timeout = std::time::Duration::from_secs(
            venue_config
                .update_tickers_timeout_secs
                .unwrap_or(config.default_exchange.update_tickers_timeout_secs),
        );
        venue.ticker_freshness_interval = std::time::Duration::from_secs(
            venue_config.interval_secs.unwrap_or(config.default_exchange.interval_secs),
        );
        built.push(venue);
    }
    Ok(Venues::new(built))
}

/// Place a single market order and wait for it to close, mirroring
/// `cryptotrader.cli.place_order`.
pub async fn place_order(venues: &Venues, venue_name: &str, side: &str, amount: f64, pair: &str, price: f64) -> Result<bool> {
    let venue = venues.get(venue_name)?;
    venue.fetch_balances().await?;
    info!("balances before:\n  {}", venue.balances_str().await);

    let side = match side.to_lowercase().as_str() {
        "buy" => Side::Ask,
        "sell" => Side::Bid,
        other => return Err(Error::Config(format!("unknown order side '{other}'"))),
    };
    // A market order's exact price doesn't matter to the venue, but a
    // deliberately extreme one guarantees immediate fill either way.
    const MIN_SUM: f64 = 1e-8;
    const MAX_SUM: f64 = 1e18;
    let safe_price = if price > 0.0 {
        price
    } else {
        match side {
            Side::Ask => MIN_SUM,
            Side::Bid => MAX_SUM,
        }
    };

    let Some(offer) = Offer::new(side, PairName::parse(pair), safe_price, amount, venue_name, venue.fee, 0.0) else {
        return Err(Error::Config("invalid order offer".into()));
    };
    let mut order = Order::new(offer, OrderKind::Market, "cli");
    let (success, response) = venue.place(&mut order).await;
    if success {
        venue.fetch_balances().await?;
        info!("success. balances after:\n  {}", venue.balances_str().await);
    } else {
        error!("error. venue response:\n  {response}");
    }
    Ok(success)
}

/// Even out balances ahead of an arbitrage run, mirroring
/// `cryptotrader.cli._prepare_arbitrage`.
pub async fn prepare_arbitrage(venues: &Venues, pairs: &[PairName], min_margin: f64, max_margin: f64) -> Result<()> {
    info!("balances before:\n  {}", venues.balances_str().await);

    for venue in venues.iter() {
        venue.fetch_balances().await?;
        let currencies: Vec<String> = venue.default_pairs.iter().map(|p| p.quote.clone()).collect();
        for currency in currencies {
            let pair = format!("{currency}USD");
            let top = venue.update_tickers(&pair, venue.ticker_freshness_interval).await;
            if top.ask <= 0.0 || top.bid <= 0.0 {
                continue;
            }
            let balance = venue.get_balance(&currency).await;
            if balance * top.ask > max_margin {
                let quote_to_sell = balance - max_margin / top.bid;
                let quote_limit = venue.get_pair_limit(&pair);
                if quote_to_sell > quote_limit {
                    let _ = place_order(venues, &venue.name, "sell", quote_to_sell, &pair, top.bid).await;
                }
            }
        }

        for pair in pairs {
            if pair.base != "USD" {
                continue;
            }
            let pair_str = pair.to_string();
            if !venue.default_pairs.contains(pair) {
                continue;
            }
            let top = venue.update_tickers(&pair_str, venue.ticker_freshness_interval).await;
            if top.ask <= 0.0 {
                continue;
            }
            let balance = venue.get_balance(&pair.quote).await;
            if balance * top.ask < min_margin {
                let quote_diff = min_margin / top.ask - balance;
                let quote_limit = venue.get_pair_limit(&pair_str);
                let quote_to_buy = quote_diff.max(quote_limit);
                let _ = place_order(venues, &venue.name, "buy", quote_to_buy, &pair_str, top.ask).await;
            }
        }
    }

    info!("balances after:\n  {}", venues.balances_str().await);
    Ok(())
}

pub fn prepare_arbitrage_margins(min: Option<f64>, max: Option<f64>) -> (f64, f64) {
    (min.unwrap_or(BALANCE_BOTTOM_MARGIN), max.unwrap_or(BALANCE_TOP_MARGIN))
}
