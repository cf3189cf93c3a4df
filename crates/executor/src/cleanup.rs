//! Order cleanup after a trade closes (§4.H): best-effort cancellation of
//! the protective orders persisted against a `Trade`, falling through to a
//! symbol-wide cancel-all when a specific id is missing or rejected.

use core_types::Trade;
use exchange_adapters::FuturesExchange;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupResult {
    pub cancelled_count: u32,
    pub success: bool,
}

/// Cancels the stop-loss and take-profit orders recorded on `trade`. If any
/// of the known ids are missing on the exchange or rejected by it — or none
/// were ever recorded — falls through to `cancel_all_orders` for the
/// symbol so a crash mid-cycle never leaves a stray protective order
/// resting on the book.
pub async fn cleanup_protective_orders(
    exchange: &dyn FuturesExchange,
    trade: &Trade,
) -> CleanupResult {
    let mut order_ids: Vec<&str> = Vec::new();
    if let Some(id) = trade.stop_loss_order_id.as_deref() {
        order_ids.push(id);
    }
    order_ids.extend(trade.take_profit_order_ids.iter().map(String::as_str));

    let mut cancelled_count = 0u32;
    let mut needs_fallback = order_ids.is_empty();

    for order_id in &order_ids {
        match exchange.cancel_order(&trade.symbol, order_id).await {
            Ok(()) => cancelled_count += 1,
            Err(e) => {
                tracing::warn!(
                    symbol = %trade.symbol,
                    order_id,
                    error = %e,
                    "protective order missing or rejected, falling back to cancel-all"
                );
                needs_fallback = true;
            }
        }
    }

    if !needs_fallback {
        return CleanupResult { cancelled_count, success: true };
    }

    match exchange.cancel_all_orders(&trade.symbol).await {
        Ok(()) => CleanupResult { cancelled_count, success: true },
        Err(e) => {
            tracing::error!(symbol = %trade.symbol, error = %e, "cancel-all fallback failed");
            CleanupResult { cancelled_count, success: false }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use core_types::{
        AccountInfo, ExitReason, Kline, OrderInfo, OrderSide, Position, PositionSide,
        SymbolPrecision, TradeStatus,
    };
    use exchange_adapters::AdapterError;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    /// Records which order ids were asked to be cancelled, and whether
    /// `cancel_all_orders` was invoked, without talking to a real exchange.
    struct FakeExchange {
        rejects: Vec<&'static str>,
        cancelled: Mutex<Vec<String>>,
        cancel_all_called: Mutex<bool>,
    }

    #[async_trait]
    impl FuturesExchange for FakeExchange {
        fn exchange_name(&self) -> &'static str {
            "fake"
        }

        async fn test_connectivity(&self) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn get_account_info(&self) -> Result<AccountInfo, AdapterError> {
            unimplemented!()
        }

        async fn get_positions(&self, _symbol: Option<&str>) -> Result<Vec<Position>, AdapterError> {
            unimplemented!()
        }

        async fn get_ticker(&self, _symbol: &str) -> Result<Decimal, AdapterError> {
            unimplemented!()
        }

        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> Result<(), AdapterError> {
            unimplemented!()
        }

        async fn get_symbol_precision(&self, _symbol: &str) -> Result<SymbolPrecision, AdapterError> {
            unimplemented!()
        }

        async fn round_quantity(
            &self,
            _symbol: &str,
            qty: Decimal,
            _price: Decimal,
        ) -> Result<Decimal, AdapterError> {
            Ok(qty)
        }

        async fn create_market_order(
            &self,
            _symbol: &str,
            _side: OrderSide,
            _qty: Decimal,
        ) -> Result<OrderInfo, AdapterError> {
            unimplemented!()
        }

        async fn create_stop_loss_order(
            &self,
            _symbol: &str,
            _side: OrderSide,
            _qty: Decimal,
            _stop_price: Decimal,
            _reduce_only: bool,
        ) -> Result<OrderInfo, AdapterError> {
            unimplemented!()
        }

        async fn create_take_profit_order(
            &self,
            _symbol: &str,
            _side: OrderSide,
            _qty: Decimal,
            _stop_price: Decimal,
            _reduce_only: bool,
        ) -> Result<OrderInfo, AdapterError> {
            unimplemented!()
        }

        async fn get_open_orders(&self, _symbol: &str) -> Result<Vec<OrderInfo>, AdapterError> {
            unimplemented!()
        }

        async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<(), AdapterError> {
            if self.rejects.contains(&order_id) {
                return Err(AdapterError::Exchange {
                    code: "ORDER_REJECTED".to_string(),
                    msg: format!("order {order_id} not found"),
                    retriable: false,
                });
            }
            self.cancelled.lock().unwrap().push(order_id.to_string());
            Ok(())
        }

        async fn cancel_all_orders(&self, _symbol: &str) -> Result<(), AdapterError> {
            *self.cancel_all_called.lock().unwrap() = true;
            Ok(())
        }

        async fn get_klines(
            &self,
            _symbol: &str,
            _interval: &str,
            _limit: u32,
            _start: Option<DateTime<Utc>>,
            _end: Option<DateTime<Utc>>,
        ) -> Result<Vec<Kline>, AdapterError> {
            unimplemented!()
        }
    }

    fn sample_trade(stop_loss_order_id: Option<&str>, take_profit_order_ids: Vec<&str>) -> Trade {
        Trade {
            id: 1,
            subscription_id: 1,
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            status: TradeStatus::Closed,
            quantity: dec!(1),
            entry_price: dec!(100),
            entry_time: Utc::now(),
            leverage: 1,
            stop_loss: None,
            take_profit: None,
            order_id: None,
            stop_loss_order_id: stop_loss_order_id.map(str::to_string),
            take_profit_order_ids: take_profit_order_ids.into_iter().map(str::to_string).collect(),
            exit_price: Some(dec!(101)),
            exit_time: Some(Utc::now()),
            exit_reason: Some(ExitReason::TpHit),
            realized_pnl: Some(dec!(1)),
            unrealized_pnl: None,
            last_updated_price: None,
            pnl_percentage: None,
            fees_paid: None,
            trade_duration_minutes: None,
            is_winning: Some(true),
        }
    }

    #[tokio::test]
    async fn cancels_every_known_order_id() {
        let exchange = FakeExchange { rejects: vec![], cancelled: Mutex::new(vec![]), cancel_all_called: Mutex::new(false) };
        let trade = sample_trade(Some("sl-1"), vec!["tp-1", "tp-2"]);

        let result = cleanup_protective_orders(&exchange, &trade).await;

        assert_eq!(result.cancelled_count, 3);
        assert!(result.success);
        assert!(!*exchange.cancel_all_called.lock().unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_cancel_all_when_an_id_is_rejected() {
        let exchange = FakeExchange {
            rejects: vec!["tp-1"],
            cancelled: Mutex::new(vec![]),
            cancel_all_called: Mutex::new(false),
        };
        let trade = sample_trade(Some("sl-1"), vec!["tp-1"]);

        let result = cleanup_protective_orders(&exchange, &trade).await;

        assert_eq!(result.cancelled_count, 1); // only sl-1 succeeded directly
        assert!(result.success);
        assert!(*exchange.cancel_all_called.lock().unwrap());
    }

    #[tokio::test]
    async fn falls_back_to_cancel_all_when_no_ids_were_ever_recorded() {
        let exchange = FakeExchange { rejects: vec![], cancelled: Mutex::new(vec![]), cancel_all_called: Mutex::new(false) };
        let trade = sample_trade(None, vec![]);

        let result = cleanup_protective_orders(&exchange, &trade).await;

        assert_eq!(result.cancelled_count, 0);
        assert!(result.success);
        assert!(*exchange.cancel_all_called.lock().unwrap());
    }
}
