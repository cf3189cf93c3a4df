//! # Zenith Core Types
//!
//! Shared enums and entity/wire structs used across every other crate in the
//! workspace: the trading vocabulary (`OrderSide`, `PositionSide`, ...), the
//! persisted entities (`Subscription`, `Trade`, `ActionLog`, `Bot`, ...), and
//! the normalized shapes exchange adapters and the strategy boundary exchange
//! (`Kline`, `Position`, `OrderInfo`, `Action`, `RiskMetrics`,
//! `SizeRecommendation`).
//!
//! As a Layer 0 crate, this has no internal dependencies; every other crate
//! depends on it.

pub mod enums;
pub mod error;
pub mod structs;

pub use enums::{
    ActionKind, BotStatus, ExchangeKind, ExitReason, NetworkType, OrderSide, OrderStatus,
    OrderType, PositionSide, RiskLevel, SubscriptionStatus, TradeStatus, TradingType,
};
pub use error::CoreError;
pub use structs::{
    AccountInfo, Action, ActionLog, Bot, BotFile, ExchangeCredentials, Kline, OrderInfo,
    Position, RiskMetrics, SizeRecommendation, StrategyRecommendation, Subscription,
    SymbolPrecision, Trade, User,
};
