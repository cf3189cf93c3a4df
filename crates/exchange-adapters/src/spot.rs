use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{AccountInfo, Kline, OrderInfo, OrderSide, SymbolPrecision};
use rust_decimal::Decimal;

use crate::error::AdapterError;

/// The unified spot capability set. Same shape as [`crate::futures::FuturesExchange`]
/// minus leverage/position/reduce_only, plus an OCO order — a single atomic
/// TP+SL pair where the exchange supports it natively.
#[async_trait]
pub trait SpotExchange: Send + Sync {
    fn exchange_name(&self) -> &'static str;

    async fn test_connectivity(&self) -> Result<(), AdapterError>;

    async fn get_account_info(&self) -> Result<AccountInfo, AdapterError>;

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, AdapterError>;

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError>;

    async fn round_quantity(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<Decimal, AdapterError>;

    async fn create_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> Result<OrderInfo, AdapterError>;

    /// Atomic take-profit/stop-loss pair where the exchange supports a
    /// native OCO order type. Exchanges without one (Bybit, Kraken) fall
    /// back to a plain take-profit limit order and log a warning — the
    /// stop-loss leg is the caller's responsibility in that case.
    async fn create_oco_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        take_profit: Decimal,
        stop_loss: Decimal,
    ) -> Result<OrderInfo, AdapterError>;

    async fn get_open_orders(&self, symbol: &str) -> Result<Vec<OrderInfo>, AdapterError>;

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<(), AdapterError>;

    async fn cancel_all_orders(&self, symbol: &str) -> Result<(), AdapterError>;

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Kline>, AdapterError>;

    fn normalize_symbol(&self, symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }
}
