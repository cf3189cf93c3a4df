use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{AccountInfo, Kline, OrderInfo, OrderSide, Position, SymbolPrecision};
use rust_decimal::Decimal;

use crate::error::AdapterError;
use crate::precision::floor_to_step;

/// Two or three protective legs produced by [`FuturesExchange::create_managed_orders`].
#[derive(Debug, Clone)]
pub struct ManagedOrders {
    pub stop_loss: OrderInfo,
    pub take_profits: Vec<OrderInfo>,
}

/// The unified futures capability set every adapter implements. Default
/// methods (`create_managed_orders`, `normalize_symbol`) are shared across
/// exchanges; adapters override `normalize_symbol` where their wire format
/// diverges from plain concatenation.
#[async_trait]
pub trait FuturesExchange: Send + Sync {
    fn exchange_name(&self) -> &'static str;

    async fn test_connectivity(&self) -> Result<(), AdapterError>;

    async fn get_account_info(&self) -> Result<AccountInfo, AdapterError>;

    async fn get_positions(&self, symbol: Option<&str>) -> Result<Vec<Position>, AdapterError>;

    async fn get_ticker(&self, symbol: &str) -> Result<Decimal, AdapterError>;

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), AdapterError>;

    async fn get_symbol_precision(&self, symbol: &str) -> Result<SymbolPrecision, AdapterError>;

    /// Rounds `qty` to this exchange's native unit (base-asset for most
    /// exchanges, contracts for OKX/Huobi) and returns it as an exchange-ready
    /// decimal string.
    async fn round_quantity(&self, symbol: &str, qty: Decimal, price: Decimal) -> Result<Decimal, AdapterError>;

    async fn create_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
    ) -> Result<OrderInfo, AdapterError>;

    async fn create_stop_loss_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        stop_price: Decimal,
        reduce_only: bool,
    ) -> Result<OrderInfo, AdapterError>;

    async fn create_take_profit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        stop_price: Decimal,
        reduce_only: bool,
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

    /// Maps a canonical `"BTC/USDT"` or `"BTCUSDT"` pair to this exchange's
    /// own symbol format. Must be idempotent. Default impl strips `/` and
    /// upper-cases, which is correct for Binance/Bybit/Bitget; OKX, Huobi,
    /// and Kraken override it.
    fn normalize_symbol(&self, symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }

    /// Cancels existing protective orders, then places a stop-loss for the
    /// full quantity plus one or two take-profit legs, splitting into two
    /// TPs when each resulting leg still clears `min_qty`/`min_notional`
    /// with a 10% buffer. Rolls back every order it placed if a later step
    /// fails.
    async fn create_managed_orders(
        &self,
        symbol: &str,
        side: OrderSide,
        qty: Decimal,
        stop_price: Decimal,
        tp_price: Decimal,
        reduce_only: bool,
    ) -> Result<ManagedOrders, AdapterError> {
        // Best-effort cleanup of whatever protective orders already exist.
        let _ = self.cancel_all_orders(symbol).await;

        let precision = self.get_symbol_precision(symbol).await?;
        let close_side = side.opposite();

        let half = qty / Decimal::from(2);
        let half_rounded = floor_to_step(half, precision.step_size);
        let buffered_min = precision.min_qty * Decimal::new(11, 1); // 1.1x
        let can_split = half_rounded >= buffered_min
            && (half_rounded * tp_price) >= precision.min_notional
            && ((qty - half_rounded) * tp_price) >= precision.min_notional;

        let mut placed: Vec<OrderInfo> = Vec::new();

        let result = async {
            let sl = self
                .create_stop_loss_order(symbol, close_side, qty, stop_price, reduce_only)
                .await?;
            placed.push(sl.clone());

            let mut tps = Vec::new();
            if can_split {
                let remainder = qty - half_rounded;
                let tp2_price = if side == OrderSide::Buy {
                    tp_price * Decimal::new(102, 2)
                } else {
                    tp_price * Decimal::new(98, 2)
                };

                let tp1 = self
                    .create_take_profit_order(symbol, close_side, half_rounded, tp_price, reduce_only)
                    .await?;
                placed.push(tp1.clone());
                tps.push(tp1);

                let tp2 = self
                    .create_take_profit_order(symbol, close_side, remainder, tp2_price, reduce_only)
                    .await?;
                placed.push(tp2.clone());
                tps.push(tp2);
            } else {
                let tp = self
                    .create_take_profit_order(symbol, close_side, qty, tp_price, reduce_only)
                    .await?;
                placed.push(tp.clone());
                tps.push(tp);
            }

            Ok(ManagedOrders {
                stop_loss: sl,
                take_profits: tps,
            })
        }
        .await;

        if let Err(e) = &result {
            tracing::warn!(symbol, error = %e, "managed-order leg failed, rolling back already-placed orders");
            for order in &placed {
                let _ = self.cancel_order(symbol, &order.order_id).await;
            }
        }

        result
    }
}
