use chrono::{DateTime, Utc};
use core_types::Trade;
use serde::{Deserialize, Serialize};

/// Enum representing the severity of a log message for structured logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// A structured log message, broadcast alongside `tracing` output for the alerter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// A subscription's execution cycle failed after exhausting its retry budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionError {
    pub subscription_id: i64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// A trial subscription reached `trial_expires_at` and was paused by the maintenance sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialExpired {
    pub subscription_id: i64,
    pub timestamp: DateTime<Utc>,
}

/// The internal broadcast event enum consumed by the alerter and any other
/// observer of the engine's activity. Every execution cycle, reconciler pass,
/// and maintenance sweep publishes on this bus; nothing downstream of it can
/// feed back into the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WsMessage {
    /// A structured log line worth surfacing outside the log file (warn/error).
    Log(LogMessage),
    /// A trade was opened or closed.
    TradeExecuted(Trade),
    /// An execution cycle failed after exhausting its retry budget.
    ActionError(ActionError),
    /// A trial subscription expired and was paused.
    TrialExpired(TrialExpired),
}
