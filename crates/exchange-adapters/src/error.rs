use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// An error the exchange itself returned, with its native code/message.
    /// `retriable` is set for rate-limit and transient-internal-error codes.
    #[error("exchange error {code}: {msg}")]
    Exchange {
        code: String,
        msg: String,
        retriable: bool,
    },

    #[error("failed to deserialize response: {0}")]
    Deserialization(String),

    #[error("invalid quantity for {symbol}: {reason}")]
    InvalidQuantity { symbol: String, reason: String },

    #[error("symbol precision unknown for {0}; call get_symbol_precision first")]
    UnknownPrecision(String),

    #[error("{0} does not support this operation")]
    Unsupported(&'static str),

    #[error("exhausted {0} retries against {1}")]
    RetriesExhausted(u32, String),
}

impl AdapterError {
    pub fn retriable(&self) -> bool {
        matches!(self, AdapterError::Exchange { retriable: true, .. })
    }
}
