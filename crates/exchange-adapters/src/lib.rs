//! Unified exchange access: one [`futures::FuturesExchange`] (and, where
//! implemented, [`spot::SpotExchange`]) trait covering Binance, Bybit, OKX,
//! Bitget, Huobi, and Kraken futures, plus the HMAC signing, quantity
//! rounding, and retry helpers their adapters share. [`factory::build_futures_exchange`]
//! is the entry point callers use instead of naming a concrete adapter.

pub mod auth;
pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod error;
pub mod factory;
pub mod futures;
pub mod huobi;
pub mod kraken;
pub mod okx;
pub mod precision;
pub mod retry;
pub mod spot;

pub use error::AdapterError;
pub use factory::build_futures_exchange;
pub use futures::{FuturesExchange, ManagedOrders};
pub use spot::SpotExchange;
