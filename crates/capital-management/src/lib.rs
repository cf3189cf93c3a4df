//! Position-sizing recommendations blended from several independent
//! heuristics (§4.B): fixed-fractional, Kelly, volatility-adjusted,
//! ATR-based, confidence-scaled, and an LLM-hybrid blend. Each method
//! returns a raw `%` of account balance; [`CapitalManager::recommend_size`]
//! weights and combines them, then applies portfolio-level safety
//! constraints.

pub mod config;
pub mod error;

use std::collections::BTreeMap;

use core_types::{RiskLevel, RiskMetrics, SizeRecommendation};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;

pub use config::CapitalManagementConfig;
pub use error::CapitalError;

/// Recent-candle context the ATR-based method needs; callers derive this
/// from the strategy's market-data crawl.
#[derive(Debug, Clone, Copy)]
pub struct MarketSnapshot {
    pub atr: Decimal,
    pub current_price: Decimal,
}

pub struct CapitalManager {
    config: CapitalManagementConfig,
}

impl CapitalManager {
    pub fn new(config: CapitalManagementConfig) -> Result<Self, CapitalError> {
        if config.base_position_size_pct <= Decimal::ZERO || config.max_position_size_pct <= Decimal::ZERO {
            return Err(CapitalError::InvalidConfig("position size percentages must be positive".to_string()));
        }
        if config.max_position_size_pct < config.base_position_size_pct {
            return Err(CapitalError::InvalidConfig("max_position_size_pct must be >= base_position_size_pct".to_string()));
        }
        Ok(Self { config })
    }

    /// `llm_recommended_pct` is `Some` when an LLM capital-advice call
    /// succeeded for this cycle (already expressed as a fraction, not a
    /// percentage); `None` runs every method except `llm_hybrid`.
    pub fn recommend_size(&self, confidence: Decimal, risk: &RiskMetrics, market: &MarketSnapshot, llm_recommended_pct: Option<Decimal>) -> SizeRecommendation {
        let mut results: BTreeMap<&'static str, Decimal> = BTreeMap::new();

        results.insert("fixed", self.fixed_percentage_sizing(confidence));
        results.insert("kelly", self.kelly_criterion_sizing(confidence, risk));
        results.insert("volatility", self.volatility_based_sizing(confidence, risk));
        results.insert("atr", self.atr_based_sizing(confidence, risk, market));
        results.insert("confidence", self.confidence_based_sizing(confidence, risk));
        if let Some(llm_pct) = llm_recommended_pct {
            results.insert("llm_hybrid", self.llm_hybrid_sizing(confidence, risk, llm_pct));
        }

        let combined = self.combine_sizing_recommendations(&results, confidence, risk);
        self.apply_safety_constraints(combined, risk)
    }

    fn fixed_percentage_sizing(&self, confidence: Decimal) -> Decimal {
        let confidence_multiplier = dec!(0.5) + (confidence * dec!(1.5));
        self.config.base_position_size_pct * confidence_multiplier
    }

    fn kelly_criterion_sizing(&self, confidence: Decimal, risk: &RiskMetrics) -> Decimal {
        let win_rate = risk.win_rate.max(self.config.min_win_rate);
        let avg_win_loss = risk.avg_win_loss_ratio.max(Decimal::ONE);
        let loss_rate = Decimal::ONE - win_rate;

        let kelly_fraction = (avg_win_loss * win_rate - loss_rate) / avg_win_loss;
        let kelly_size = (kelly_fraction * self.config.kelly_multiplier * confidence).max(Decimal::ZERO);

        kelly_size.min(self.config.max_position_size_pct)
    }

    fn volatility_based_sizing(&self, confidence: Decimal, risk: &RiskMetrics) -> Decimal {
        let vol_multiplier = if risk.volatility <= self.config.volatility_threshold_low {
            dec!(1.5)
        } else if risk.volatility >= self.config.volatility_threshold_high {
            dec!(0.5)
        } else {
            let vol_range = self.config.volatility_threshold_high - self.config.volatility_threshold_low;
            let vol_position = (risk.volatility - self.config.volatility_threshold_low) / vol_range;
            dec!(1.5) - vol_position
        };

        let base_size = self.config.base_position_size_pct * vol_multiplier * confidence;
        base_size.min(self.config.max_position_size_pct)
    }

    fn atr_based_sizing(&self, confidence: Decimal, risk: &RiskMetrics, market: &MarketSnapshot) -> Decimal {
        if market.atr <= Decimal::ZERO || market.current_price <= Decimal::ZERO || risk.available_balance <= Decimal::ZERO {
            return self.config.base_position_size_pct;
        }

        let risk_amount = risk.available_balance * dec!(0.01);
        let atr_percentage = market.atr / market.current_price;
        if atr_percentage <= Decimal::ZERO {
            return self.config.base_position_size_pct;
        }

        let position_value = risk_amount / atr_percentage;
        let position_size_pct = position_value / risk.available_balance;
        let adjusted_size = position_size_pct * confidence;

        adjusted_size.min(self.config.max_position_size_pct)
    }

    fn confidence_based_sizing(&self, confidence: Decimal, risk: &RiskMetrics) -> Decimal {
        // Dampens extreme confidence the same way the donor's `confidence ** 0.8`
        // does; Decimal has no fractional-exponent op, and this is a pure
        // heuristic curve rather than money, so a float round-trip is fine.
        let dampened = confidence.to_f64().unwrap_or(0.0).powf(0.8);
        let confidence_size = self.config.base_position_size_pct * Decimal::try_from(dampened).unwrap_or(confidence);

        let drawdown_multiplier = (Decimal::ONE - risk.current_drawdown * Decimal::from(2)).max(dec!(0.3));
        let sharpe_multiplier = (dec!(0.5) + risk.sharpe_ratio * dec!(0.3)).clamp(dec!(0.5), dec!(1.5));

        let final_size = confidence_size * drawdown_multiplier * sharpe_multiplier;
        final_size.min(self.config.max_position_size_pct)
    }

    fn llm_hybrid_sizing(&self, confidence: Decimal, risk: &RiskMetrics, llm_recommended_pct: Decimal) -> Decimal {
        let traditional_size = self.confidence_based_sizing(confidence, risk);
        let combined = llm_recommended_pct * self.config.llm_weight + traditional_size * (Decimal::ONE - self.config.llm_weight);
        combined.min(self.config.max_position_size_pct)
    }

    fn combine_sizing_recommendations(&self, results: &BTreeMap<&'static str, Decimal>, confidence: Decimal, risk: &RiskMetrics) -> SizeRecommendation {
        if results.is_empty() {
            return SizeRecommendation {
                recommended_size_pct: self.config.base_position_size_pct,
                max_size_pct: self.config.max_position_size_pct,
                risk_level: RiskLevel::Medium,
                sizing_method: "default".to_string(),
                confidence_adjustment: Decimal::ZERO,
                volatility_adjustment: Decimal::ZERO,
                drawdown_adjustment: Decimal::ZERO,
                reasoning: "No sizing methods available".to_string(),
            };
        }

        let mut weights: BTreeMap<&'static str, Decimal> = BTreeMap::from([
            ("fixed", dec!(0.10)),
            ("kelly", dec!(0.20)),
            ("volatility", dec!(0.15)),
            ("atr", dec!(0.15)),
            ("confidence", dec!(0.20)),
            ("llm_hybrid", dec!(0.20)),
        ]);

        if risk.volatility > self.config.volatility_threshold_high {
            *weights.get_mut("volatility").unwrap() += dec!(0.10);
            *weights.get_mut("atr").unwrap() += dec!(0.10);
            *weights.get_mut("confidence").unwrap() -= dec!(0.10);
            *weights.get_mut("fixed").unwrap() -= dec!(0.10);
        }

        if risk.current_drawdown > dec!(0.05) {
            *weights.get_mut("fixed").unwrap() += dec!(0.15);
            *weights.get_mut("kelly").unwrap() -= dec!(0.10);
            *weights.get_mut("confidence").unwrap() -= dec!(0.05);
        }

        let mut weighted_sum = Decimal::ZERO;
        let mut total_weight = Decimal::ZERO;
        let mut used_methods = Vec::new();

        for (method, size) in results {
            if let Some(weight) = weights.get(method) {
                weighted_sum += *size * *weight;
                total_weight += *weight;
                used_methods.push(*method);
            }
        }

        let recommended_size = if total_weight > Decimal::ZERO {
            weighted_sum / total_weight
        } else {
            self.config.base_position_size_pct
        };

        let risk_level = if recommended_size <= self.config.base_position_size_pct * dec!(0.7) {
            RiskLevel::Low
        } else if recommended_size >= self.config.base_position_size_pct * dec!(1.5) {
            RiskLevel::High
        } else {
            RiskLevel::Medium
        };

        let confidence_adjustment = (confidence - dec!(0.5)) * Decimal::from(2);
        let volatility_adjustment = -(risk.volatility - dec!(0.05)) * Decimal::from(10);
        let drawdown_adjustment = -risk.current_drawdown * Decimal::from(5);

        SizeRecommendation {
            recommended_size_pct: recommended_size,
            max_size_pct: self.config.max_position_size_pct,
            risk_level,
            sizing_method: format!("weighted_combination_{}", used_methods.join("+")),
            confidence_adjustment,
            volatility_adjustment,
            drawdown_adjustment,
            reasoning: format!("Combined {} methods with market-adaptive weights", used_methods.len()),
        }
    }

    fn apply_safety_constraints(&self, mut recommendation: SizeRecommendation, risk: &RiskMetrics) -> SizeRecommendation {
        let original_size = recommendation.recommended_size_pct;
        let mut constrained_size = original_size;

        if constrained_size > self.config.max_position_size_pct {
            constrained_size = self.config.max_position_size_pct;
            recommendation.reasoning.push_str(&format!(" | Capped at max size {}%", self.config.max_position_size_pct * Decimal::from(100)));
        }

        if risk.portfolio_exposure + constrained_size > self.config.max_portfolio_exposure {
            let max_allowed = self.config.max_portfolio_exposure - risk.portfolio_exposure;
            constrained_size = max_allowed.max(Decimal::ZERO);
            recommendation.reasoning.push_str(" | Portfolio exposure limit applied");
        }

        if risk.current_drawdown > dec!(0.10) {
            let drawdown_multiplier = (Decimal::ONE - risk.current_drawdown * Decimal::from(2)).max(dec!(0.2));
            constrained_size *= drawdown_multiplier;
            recommendation.reasoning.push_str(&format!(" | Drawdown protection applied ({drawdown_multiplier}x)"));
        }

        let min_size = dec!(0.001);
        if constrained_size < min_size {
            constrained_size = Decimal::ZERO;
            recommendation.reasoning.push_str(" | Below minimum threshold - no position");
        }

        recommendation.recommended_size_pct = constrained_size;

        if constrained_size < original_size * dec!(0.5) {
            recommendation.risk_level = RiskLevel::Low;
        }

        recommendation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> CapitalManager {
        CapitalManager::new(CapitalManagementConfig::default()).unwrap()
    }

    fn healthy_risk() -> RiskMetrics {
        RiskMetrics {
            account_balance: dec!(10000),
            available_balance: dec!(10000),
            current_drawdown: Decimal::ZERO,
            max_drawdown: Decimal::ZERO,
            portfolio_exposure: Decimal::ZERO,
            volatility: dec!(0.05),
            var_95: dec!(0.02),
            sharpe_ratio: Decimal::ZERO,
            win_rate: dec!(0.5),
            avg_win_loss_ratio: Decimal::ONE,
        }
    }

    #[test]
    fn recommend_size_respects_max_position_cap() {
        let m = manager();
        let risk = healthy_risk();
        let market = MarketSnapshot { atr: dec!(500), current_price: dec!(60000) };
        let rec = m.recommend_size(dec!(1.0), &risk, &market, None);
        assert!(rec.recommended_size_pct <= rec.max_size_pct);
    }

    #[test]
    fn zero_confidence_yields_small_or_zero_size() {
        let m = manager();
        let risk = healthy_risk();
        let market = MarketSnapshot { atr: dec!(500), current_price: dec!(60000) };
        let rec = m.recommend_size(Decimal::ZERO, &risk, &market, None);
        assert!(rec.recommended_size_pct < dec!(0.02));
    }

    #[test]
    fn heavy_drawdown_reduces_size_and_marks_low_risk() {
        let m = manager();
        let mut risk = healthy_risk();
        risk.current_drawdown = dec!(0.20);
        let market = MarketSnapshot { atr: dec!(500), current_price: dec!(60000) };
        let without_drawdown = m.recommend_size(dec!(0.8), &healthy_risk(), &market, None);
        let with_drawdown = m.recommend_size(dec!(0.8), &risk, &market, None);
        assert!(with_drawdown.recommended_size_pct < without_drawdown.recommended_size_pct);
    }

    #[test]
    fn portfolio_exposure_limit_caps_additional_size() {
        let m = manager();
        let mut risk = healthy_risk();
        risk.portfolio_exposure = dec!(0.29);
        let market = MarketSnapshot { atr: dec!(500), current_price: dec!(60000) };
        let rec = m.recommend_size(dec!(1.0), &risk, &market, None);
        assert!(rec.recommended_size_pct <= dec!(0.01) + dec!(0.0001));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = CapitalManagementConfig::default();
        config.max_position_size_pct = dec!(0.01);
        config.base_position_size_pct = dec!(0.02);
        assert!(CapitalManager::new(config).is_err());
    }
}
