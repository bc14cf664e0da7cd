use crate::domain::types::ChainId;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("transient network error on chain {chain}: {message}")]
    TransientNetwork { chain: ChainId, message: String },
    #[error("price unavailable for {price_key} at {at_secs}")]
    PriceUnavailable { price_key: String, at_secs: u64 },
    #[error("malformed event on chain {chain}: {reason}")]
    MalformedEvent { chain: ChainId, reason: String },
    #[error("aggregate corruption: {0}")]
    AggregateCorruption(String),
    #[error("config invalid: {0}")]
    ConfigInvalid(String),
    #[error("invalid window transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("window is {0} and not accepting updates")]
    WindowNotAccepting(&'static str),
    #[error("backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientNetwork { .. })
    }
}

pub type Result<T> = core::result::Result<T, Error>;
