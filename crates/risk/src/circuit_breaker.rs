//! Portfolio-level circuit breaker (§10.H): a safety net distinct from
//! per-trade sizing (`capital-management`), halting a symbol after repeated
//! losses or the whole account after a daily drawdown breach.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use configuration::RiskConfig;
use core_types::Trade;
use events::{LogLevel, LogMessage, WsMessage};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Mutex};

/// Per-account state the breaker tracks. Consecutive losses are scoped to a
/// symbol; the drawdown halt is scoped to the whole account, since one
/// account's equity is the unit a daily-drawdown breach threatens.
#[derive(Debug, Default)]
struct AccountState {
    consecutive_losses: HashMap<String, u32>,
    halted_symbols: HashMap<String, bool>,
    peak_equity: Decimal,
    peak_equity_date: Option<NaiveDate>,
    account_halted: bool,
}

pub struct GlobalRiskManager {
    config: RiskConfig,
    event_tx: broadcast::Sender<WsMessage>,
    accounts: Mutex<HashMap<i64, AccountState>>,
}

impl GlobalRiskManager {
    pub fn new(config: RiskConfig, event_tx: broadcast::Sender<WsMessage>) -> Self {
        Self { config, event_tx, accounts: Mutex::new(HashMap::new()) }
    }

    /// Called by the orchestrator immediately before order placement (§4.E
    /// step 9). `true` means the action must be downgraded to `HOLD`.
    pub async fn is_halted(&self, owner_id: i64, symbol: &str) -> bool {
        let accounts = self.accounts.lock().await;
        match accounts.get(&owner_id) {
            Some(state) => state.account_halted || state.halted_symbols.get(symbol).copied().unwrap_or(false),
            None => false,
        }
    }

    /// Updates consecutive-loss and drawdown state after a trade closes.
    /// `current_equity` is the account's mark-to-market equity right now
    /// (the caller — the engine, which has the account snapshot — supplies
    /// it; this crate has no exchange or database access of its own).
    pub async fn on_trade_closed(self: &Arc<Self>, owner_id: i64, trade: &Trade, current_equity: Decimal) {
        let pnl = trade.realized_pnl.unwrap_or(Decimal::ZERO);
        let today = Utc::now().date_naive();

        let should_halt_symbol = {
            let mut accounts = self.accounts.lock().await;
            let state = accounts.entry(owner_id).or_default();

            let streak = state.consecutive_losses.entry(trade.symbol.clone()).or_insert(0);
            if pnl.is_sign_negative() {
                *streak += 1;
            } else {
                *streak = 0;
            }
            let streak = *streak;

            if state.peak_equity_date != Some(today) {
                // New UTC day: the drawdown window resets, matching §10.H's
                // "until the next UTC day boundary".
                state.peak_equity = current_equity;
                state.peak_equity_date = Some(today);
                state.account_halted = false;
            } else if current_equity > state.peak_equity {
                state.peak_equity = current_equity;
            }

            streak >= self.config.max_consecutive_losses
        };

        if should_halt_symbol {
            self.halt_symbol(owner_id, &trade.symbol).await;
        }

        self.check_daily_drawdown(owner_id, current_equity).await;
    }

    async fn check_daily_drawdown(&self, owner_id: i64, current_equity: Decimal) {
        let breached = {
            let accounts = self.accounts.lock().await;
            match accounts.get(&owner_id) {
                Some(state) if state.peak_equity > Decimal::ZERO => {
                    let drawdown = (state.peak_equity - current_equity) / state.peak_equity;
                    drawdown >= self.config.max_daily_drawdown_pct
                }
                _ => false,
            }
        };

        if breached {
            let mut accounts = self.accounts.lock().await;
            let state = accounts.entry(owner_id).or_default();
            if !state.account_halted {
                state.account_halted = true;
                self.log(
                    LogLevel::Error,
                    format!(
                        "CRITICAL: account {owner_id} breached the max daily drawdown limit of {:.2}%. Halting all new entries until the next UTC day.",
                        self.config.max_daily_drawdown_pct * Decimal::from(100)
                    ),
                );
            }
        }
    }

    async fn halt_symbol(self: &Arc<Self>, owner_id: i64, symbol: &str) {
        {
            let mut accounts = self.accounts.lock().await;
            accounts.entry(owner_id).or_default().halted_symbols.insert(symbol.to_string(), true);
        }

        self.log(
            LogLevel::Error,
            format!(
                "SYMBOL HALTED: {symbol} on account {owner_id} hit the max consecutive loss limit of {}.",
                self.config.max_consecutive_losses
            ),
        );

        let this = Arc::clone(self);
        let symbol = symbol.to_string();
        let cooldown = Duration::from_secs(self.config.bot_cooldown_hours * 3600);
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let mut accounts = this.accounts.lock().await;
            accounts.entry(owner_id).or_default().halted_symbols.insert(symbol.clone(), false);
            drop(accounts);
            this.log(LogLevel::Info, format!("SYMBOL RE-ENABLED: {symbol} on account {owner_id} is out of cooldown."));
        });
    }

    fn log(&self, level: LogLevel, message: String) {
        let _ = self.event_tx.send(WsMessage::Log(LogMessage { timestamp: Utc::now(), level, message }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use core_types::{ExitReason, OrderSide, PositionSide, TradeStatus};
    use rust_decimal_macros::dec;

    fn sample_trade(symbol: &str, pnl: Decimal) -> Trade {
        Trade {
            id: 1,
            subscription_id: 1,
            symbol: symbol.to_string(),
            side: OrderSide::Buy,
            position_side: PositionSide::Long,
            status: TradeStatus::Closed,
            quantity: dec!(1),
            entry_price: dec!(100),
            entry_time: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            leverage: 1,
            stop_loss: None,
            take_profit: None,
            order_id: None,
            stop_loss_order_id: None,
            take_profit_order_ids: vec![],
            exit_price: Some(dec!(100) + pnl),
            exit_time: Some(Utc::now()),
            exit_reason: Some(ExitReason::SlHit),
            realized_pnl: Some(pnl),
            unrealized_pnl: None,
            last_updated_price: None,
            pnl_percentage: None,
            fees_paid: None,
            trade_duration_minutes: None,
            is_winning: Some(pnl.is_sign_positive()),
        }
    }

    fn config() -> RiskConfig {
        RiskConfig { max_consecutive_losses: 3, bot_cooldown_hours: 4, max_daily_drawdown_pct: dec!(0.15) }
    }

    #[tokio::test]
    async fn halts_symbol_after_max_consecutive_losses() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = Arc::new(GlobalRiskManager::new(config(), tx));

        for _ in 0..2 {
            manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(-10)), dec!(1000)).await;
        }
        assert!(!manager.is_halted(1, "BTCUSDT").await);

        manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(-10)), dec!(1000)).await;
        assert!(manager.is_halted(1, "BTCUSDT").await);
    }

    #[tokio::test]
    async fn a_winning_trade_resets_the_streak() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = Arc::new(GlobalRiskManager::new(config(), tx));

        manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(-10)), dec!(1000)).await;
        manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(-10)), dec!(1000)).await;
        manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(50)), dec!(1050)).await;
        manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(-10)), dec!(1040)).await;
        manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(-10)), dec!(1030)).await;

        assert!(!manager.is_halted(1, "BTCUSDT").await);
    }

    #[tokio::test]
    async fn breaching_daily_drawdown_halts_the_whole_account() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = Arc::new(GlobalRiskManager::new(config(), tx));

        manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(0)), dec!(1000)).await;
        manager.on_trade_closed(1, &sample_trade("ETHUSDT", dec!(-200)), dec!(800)).await;

        assert!(manager.is_halted(1, "SOLUSDT").await);
    }

    #[tokio::test]
    async fn accounts_are_isolated_from_each_other() {
        let (tx, _rx) = broadcast::channel(16);
        let manager = Arc::new(GlobalRiskManager::new(config(), tx));

        manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(0)), dec!(1000)).await;
        manager.on_trade_closed(1, &sample_trade("BTCUSDT", dec!(-200)), dec!(800)).await;

        assert!(manager.is_halted(1, "BTCUSDT").await);
        assert!(!manager.is_halted(2, "BTCUSDT").await);
    }
}
