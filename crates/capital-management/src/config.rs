use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Thresholds and weights for [`crate::CapitalManager::recommend_size`].
/// Field defaults mirror the donor bot's own defaults so an operator who
/// omits a field gets the same behavior they had before.
#[derive(Debug, Clone)]
pub struct CapitalManagementConfig {
    pub base_position_size_pct: Decimal,
    pub max_position_size_pct: Decimal,
    pub max_portfolio_exposure: Decimal,

    pub max_drawdown_threshold: Decimal,
    pub volatility_threshold_low: Decimal,
    pub volatility_threshold_high: Decimal,

    pub kelly_multiplier: Decimal,
    pub min_win_rate: Decimal,

    /// Weight given to the LLM's recommended size inside the `llm_hybrid`
    /// method's blend with the confidence-based method.
    pub llm_weight: Decimal,
}

impl Default for CapitalManagementConfig {
    fn default() -> Self {
        Self {
            base_position_size_pct: dec!(0.02),
            max_position_size_pct: dec!(0.10),
            max_portfolio_exposure: dec!(0.30),
            max_drawdown_threshold: dec!(0.15),
            volatility_threshold_low: dec!(0.02),
            volatility_threshold_high: dec!(0.08),
            kelly_multiplier: dec!(0.25),
            min_win_rate: dec!(0.35),
            llm_weight: dec!(0.40),
        }
    }
}
