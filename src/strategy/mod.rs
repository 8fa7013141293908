pub mod arbitrage;
