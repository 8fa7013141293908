use thiserror::Error;

/// Errors surfaced by the trading core. Every operation that can fail
/// across a venue boundary, the persisted store, or configuration loading
/// returns one of these variants.
#[derive(Debug, Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("no such venue: {0}")]
    UnknownVenue(String),

    #[error("could not fetch pair {pair}: {response}")]
    FetchPair { pair: String, response: String },

    #[error("websocket auth failed: {0}")]
    WebsocketAuth(String),

    #[error("reversal queue is empty")]
    QueueEmpty,

    #[error("inconsistent persisted state: {0}")]
    InconsistentState(String),

    #[error("venue refused operation: {0}")]
    VenueRefusal(String),

    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("http transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
