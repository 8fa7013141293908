use clap::Parser;
use log::error;

use arb_core::app::build_application;
use arb_core::cli::{Cli, Command};
use arb_core::config::Config;
use arb_core::store::Store;
use arb_core::{money, venues};

/// Exit codes returned to the shell, matching the design notes: `0` for a
/// clean stop or a successful one-shot command, `1` for a one-shot command
/// that completed but reported failure (a rejected/uncancellable order),
/// `2` for a startup/config error that never got the engine running.
const EXIT_OK: i32 = 0;
const EXIT_COMMAND_FAILED: i32 = 1;
const EXIT_STARTUP_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    arb_core::logging::init(cli.debug);

    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            error!("failed to load config from {}: {err}", cli.config);
            std::process::exit(EXIT_STARTUP_ERROR);
        }
    };

    let venues = match arb_core::cli::venues_from_config(&config) {
        Ok(venues) => venues,
        Err(err) => {
            error!("failed to build venues from config: {err}");
            std::process::exit(EXIT_STARTUP_ERROR);
        }
    };

    let exit_code = match cli.command {
        Command::Balances => run_balances(venues).await,
        Command::Place { venue, side, amount, pair, price } => run_place(venues, &venue, &side, amount, &pair, price).await,
        Command::PrepareArbitrage { min, max } => run_prepare_arbitrage(&config, venues, min, max).await,
        Command::Execute => run_execute(config, venues).await,
    };
    std::process::exit(exit_code);
}

async fn run_balances(venues: venues::Venues) -> i32 {
    venues.fetch_balances().await;
    println!("{}", venues.balances_str().await);
    EXIT_OK
}

async fn run_place(venues: venues::Venues, venue: &str, side: &str, amount: f64, pair: &str, price: f64) -> i32 {
    match arb_core::cli::place_order(&venues, venue, side, amount, pair, price).await {
        Ok(true) => EXIT_OK,
        Ok(false) => EXIT_COMMAND_FAILED,
        Err(err) => {
            error!("place command failed: {err}");
            EXIT_COMMAND_FAILED
        }
    }
}

async fn run_prepare_arbitrage(config: &Config, venues: venues::Venues, min: Option<f64>, max: Option<f64>) -> i32 {
    let (min_margin, max_margin) = arb_core::cli::prepare_arbitrage_margins(min, max);
    let pairs: Vec<money::PairName> = config.strategies.arbitrage.pairs.iter().map(|p| money::PairName::parse(p)).collect();
    match arb_core::cli::prepare_arbitrage(&venues, &pairs, min_margin, max_margin).await {
        Ok(()) => EXIT_OK,
        Err(err) => {
            error!("prepare-arbitrage command failed: {err}");
            EXIT_COMMAND_FAILED
        }
    }
}

async fn run_execute(config: Config, venues: venues::Venues) -> i32 {
    let store = match Store::connect(&config.dsn).await {
        Ok(store) => store,
        Err(err) => {
            error!("failed to connect to the database: {err}");
            return EXIT_STARTUP_ERROR;
        }
    };

    let application = match build_application(&config, venues, store).await {
        Ok(application) => application,
        Err(err) => {
            error!("failed to build application: {err}");
            return EXIT_STARTUP_ERROR;
        }
    };

    let stop_signal = tokio::signal::ctrl_c();
    tokio::select! {
        result = application.run() => {
            if let Err(err) = result {
                error!("application exited with an error: {err}");
                return EXIT_COMMAND_FAILED;
            }
        }
        _ = stop_signal => {
            log::info!("received shutdown signal, stopping gracefully");
            application.stop().await;
        }
    }
    EXIT_OK
}
