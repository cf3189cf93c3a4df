use core_types::ActionKind;
use core_types::StrategyRecommendation;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One candle, already trimmed to the lookback window a given timeframe
/// gets in the prompt (see [`crate::prompt::timeframe_lookback`]).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OhlcvPoint {
    pub open_time_ms: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Multi-timeframe OHLCV data keyed by timeframe string (`"5m"`, `"1h"`, ...).
pub type TimeframeData = std::collections::BTreeMap<String, Vec<OhlcvPoint>>;

/// A parsed market-analysis result. `action`/`confidence` mirror
/// [`core_types::Action`]'s `kind`/`value` fields so a caller can fold this
/// straight into an `Action` without re-deriving anything.
#[derive(Debug, Clone)]
pub struct MarketAnalysis {
    pub action: ActionKind,
    pub confidence: Decimal,
    pub reasoning: String,
    pub recommendation: StrategyRecommendation,
    /// `true` if this result came from Redis rather than a fresh call.
    pub from_cache: bool,
}

/// The outcome of [`crate::LlmAdvisor::analyze_market`]. A result is only
/// ever `Unavailable` when the per-symbol lock is held by another worker
/// and no cached result showed up within the wait window, or the call
/// itself failed/timed out — in both cases the caller should fall back to
/// its non-LLM signal path rather than treat this as a hard error.
#[derive(Debug, Clone)]
pub enum AdvisoryOutcome {
    Analysis(MarketAnalysis),
    Unavailable { reason: String },
}
