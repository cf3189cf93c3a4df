use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::enums::{
    ActionKind, BotStatus, ExchangeKind, ExitReason, NetworkType, OrderSide, OrderStatus,
    OrderType, PositionSide, RiskLevel, SubscriptionStatus, TradeStatus, TradingType,
};

/// One OHLCV candle for a symbol/interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: DateTime<Utc>,
}

/// A live position as reported by an exchange, normalized across adapters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: PositionSide,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub pnl: Decimal,
    pub percentage: Decimal,
    pub leverage: Option<u32>,
}

/// Normalized order acknowledgement shape, returned by every exchange adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    pub order_id: String,
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub executed_qty: Decimal,
}

/// Per-symbol quantity/price precision, as queried from an exchange and cached in-process.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SymbolPrecision {
    pub quantity_precision: u32,
    pub price_precision: u32,
    pub step_size: Decimal,
    pub tick_size: Decimal,
    pub min_qty: Decimal,
    pub min_notional: Decimal,
    /// OKX/Huobi contract-unit exchanges: crypto amount represented by one contract.
    pub contract_value: Option<Decimal>,
}

/// Normalized futures/spot account snapshot.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccountInfo {
    pub total_wallet_balance: Decimal,
    pub available_balance: Decimal,
    pub used_margin: Decimal,
    pub unrealized_pnl: Decimal,
}

/// The output of a strategy's `execute_full_cycle`: a BUY/SELL/HOLD decision with confidence
/// and an optional structured recommendation (entry/SL/TP) the strategy itself computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Confidence in [0, 1].
    pub value: Decimal,
    pub reason: String,
    pub recommendation: Option<StrategyRecommendation>,
}

impl Action {
    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            kind: ActionKind::Hold,
            value: Decimal::ZERO,
            reason: reason.into(),
            recommendation: None,
        }
    }
}

/// Structured price targets a strategy (or the LLM advisory layer) recommends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyRecommendation {
    pub entry_price: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub strategy: Option<String>,
    pub risk_reward: Option<Decimal>,
    pub reasoning: Option<String>,
}

/// Risk snapshot consumed by the capital-management module.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskMetrics {
    pub account_balance: Decimal,
    pub available_balance: Decimal,
    pub current_drawdown: Decimal,
    pub max_drawdown: Decimal,
    pub portfolio_exposure: Decimal,
    pub volatility: Decimal,
    pub var_95: Decimal,
    pub sharpe_ratio: Decimal,
    pub win_rate: Decimal,
    pub avg_win_loss_ratio: Decimal,
}

/// Output of the capital-management module: a recommended fraction of account balance to risk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizeRecommendation {
    pub recommended_size_pct: Decimal,
    pub max_size_pct: Decimal,
    pub risk_level: RiskLevel,
    pub sizing_method: String,
    pub confidence_adjustment: Decimal,
    pub volatility_adjustment: Decimal,
    pub drawdown_adjustment: Decimal,
    pub reasoning: String,
}

/// A platform account; owns subscriptions, credentials, and (if a developer) bots.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub is_active: bool,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A developer's strategy definition. Only `Approved` bots may back an active subscription.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Bot {
    pub id: i64,
    pub name: String,
    pub developer_id: i64,
    pub status: BotStatus,
    pub object_store_key: String,
    pub version: String,
    pub trading_type: TradingType,
    pub exchange_type: ExchangeKind,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A versioned artifact record pointing at an object-store key; the hash must match the
/// fetched bytes on load.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BotFile {
    pub id: i64,
    pub bot_id: i64,
    pub version: String,
    pub file_type: String,
    pub object_key: String,
    pub sha256: String,
    pub size_bytes: i64,
    pub uploaded_at: DateTime<Utc>,
}

/// Exchange API credentials for a user, scoped by (user, exchange, network). Decrypted on
/// demand; the engine never logs the key/secret.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExchangeCredentials {
    pub id: i64,
    pub owner_id: i64,
    pub exchange: ExchangeKind,
    pub network: NetworkType,
    pub api_key: String,
    pub api_secret: String,
    pub api_passphrase: Option<String>,
    pub is_active: bool,
}

/// One running instance of a bot for a user.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub instance_name: String,
    pub user_id: i64,
    pub bot_id: i64,
    pub status: SubscriptionStatus,
    pub exchange_type: ExchangeKind,
    pub network_type: NetworkType,
    pub trading_pair: String,
    /// Ordered list of timeframes, primary first (e.g. `["1h", "4h"]`).
    pub timeframes: Vec<String>,
    /// Pins the bot-file `version` this subscription loads, bypassing the
    /// developer's latest upload. `None` tracks latest.
    pub pinned_bot_version: Option<String>,
    pub strategy_config: serde_json::Value,
    pub execution_config: serde_json::Value,
    pub risk_config: serde_json::Value,
    pub is_trial: bool,
    pub trial_expires_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub total_trades: i32,
    pub winning_trades: i32,
    pub total_pnl: Decimal,
}

impl Subscription {
    /// The primary (first-listed) timeframe, used for scheduling cadence.
    pub fn primary_timeframe(&self) -> Option<&str> {
        self.timeframes.first().map(String::as_str)
    }
}

/// A persisted record of one opened position, from entry to closure.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trade {
    pub id: i64,
    pub subscription_id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub position_side: PositionSide,
    pub status: TradeStatus,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub leverage: i32,
    pub stop_loss: Option<Decimal>,
    pub take_profit: Option<Decimal>,
    pub order_id: Option<String>,
    pub stop_loss_order_id: Option<String>,
    pub take_profit_order_ids: Vec<String>,
    pub exit_price: Option<Decimal>,
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_reason: Option<ExitReason>,
    pub realized_pnl: Option<Decimal>,
    pub unrealized_pnl: Option<Decimal>,
    pub last_updated_price: Option<Decimal>,
    pub pnl_percentage: Option<Decimal>,
    pub fees_paid: Option<Decimal>,
    pub trade_duration_minutes: Option<i64>,
    pub is_winning: Option<bool>,
}

impl Trade {
    pub fn is_open(&self) -> bool {
        matches!(self.status, TradeStatus::Open)
    }
}

/// Append-only execution audit row.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ActionLog {
    pub id: i64,
    pub subscription_id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: ActionKind,
    pub description: String,
}
