//! Tolerant parsing of a chat model's free-form reply into a
//! [`MarketAnalysis`]. Models are asked to answer with a JSON object but
//! routinely wrap it in prose or a markdown fence, so this extracts the
//! first balanced `{...}` span rather than requiring the whole reply to be
//! valid JSON on its own.

use core_types::{ActionKind, StrategyRecommendation};
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::types::MarketAnalysis;

/// Finds the first top-level JSON object in `raw` by brace counting. Returns
/// `None` if braces never balance (truncated or non-JSON reply).
fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in raw[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Accepts `62`, `62.0`, `"62%"`, `"0.62"` and normalizes all of them to a
/// `[0, 1]` fraction, matching the donor bot's "percent or fraction, who
/// knows" tolerance for whatever a model emits.
fn parse_confidence(value: Option<&Value>) -> Decimal {
    let Some(value) = value else { return Decimal::ZERO };
    let raw: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim().trim_end_matches('%');
            trimmed.parse::<f64>().ok()
        }
        _ => None,
    };
    let Some(raw) = raw else { return Decimal::ZERO };
    // Anything above 1 is assumed to be a percentage, not a fraction.
    let fraction = if raw > 1.0 { raw / 100.0 } else { raw };
    Decimal::try_from(fraction.clamp(0.0, 1.0)).unwrap_or(Decimal::ZERO)
}

/// Extracts a decimal price-like field, tolerating values like
/// `"Market"`, `"N/A"`, or a bare number as either a JSON number or string.
fn parse_optional_decimal(value: Option<&Value>) -> Option<Decimal> {
    let value = value?;
    match value {
        Value::Number(n) => n.as_f64().and_then(|f| Decimal::try_from(f).ok()),
        Value::String(s) => {
            let numeric = Regex::new(r"-?\d+(\.\d+)?").ok()?.find(s)?;
            numeric.as_str().parse::<Decimal>().ok()
        }
        _ => None,
    }
}

fn parse_optional_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() && !s.eq_ignore_ascii_case("n/a") => Some(s.clone()),
        _ => None,
    }
}

/// Parses a raw model reply into a [`MarketAnalysis`]. Any failure to find
/// or parse the expected `recommendation` object produces `HOLD` at
/// confidence 0 rather than an error — an LLM hiccup should degrade the
/// signal, not crash the cycle.
pub fn parse_market_analysis(raw: &str) -> MarketAnalysis {
    let fallback = || MarketAnalysis {
        action: ActionKind::Hold,
        confidence: Decimal::ZERO,
        reasoning: "Unparseable LLM response".to_string(),
        recommendation: StrategyRecommendation {
            entry_price: None,
            take_profit: None,
            stop_loss: None,
            strategy: None,
            risk_reward: None,
            reasoning: None,
        },
        from_cache: false,
    };

    let Some(json_span) = extract_json_object(raw) else {
        return fallback();
    };
    let Ok(parsed) = serde_json::from_str::<Value>(json_span) else {
        return fallback();
    };
    let Some(recommendation) = parsed.get("recommendation").or(Some(&parsed)) else {
        return fallback();
    };

    let action_str = recommendation
        .get("action")
        .and_then(Value::as_str)
        .unwrap_or("HOLD")
        .trim()
        .to_uppercase();
    // The donor bot treats CLOSE as an alias for SELL since neither the
    // exchange adapters nor `ActionKind` model a distinct close action.
    let normalized = if action_str == "CLOSE" { "SELL" } else { action_str.as_str() };
    let action = match normalized {
        "BUY" => ActionKind::Buy,
        "SELL" => ActionKind::Sell,
        _ => ActionKind::Hold,
    };

    let confidence = parse_confidence(recommendation.get("confidence"));
    let (action, confidence) = if action == ActionKind::Hold && normalized != "HOLD" {
        // An action string the model invented outright (neither BUY, SELL,
        // CLOSE nor HOLD) is treated as a parse failure for the action but
        // not the whole response.
        (ActionKind::Hold, Decimal::ZERO)
    } else {
        (action, confidence)
    };

    let reasoning = recommendation
        .get("reasoning")
        .and_then(Value::as_str)
        .unwrap_or("LLM analysis")
        .to_string();

    MarketAnalysis {
        action,
        confidence,
        reasoning: reasoning.clone(),
        recommendation: StrategyRecommendation {
            entry_price: parse_optional_decimal(recommendation.get("entry_price")),
            take_profit: parse_optional_decimal(recommendation.get("take_profit")),
            stop_loss: parse_optional_decimal(recommendation.get("stop_loss")),
            strategy: parse_optional_string(recommendation.get("strategy")),
            risk_reward: parse_optional_decimal(recommendation.get("risk_reward")),
            reasoning: Some(reasoning),
        },
        from_cache: false,
    }
}

/// Extracts `recommended_size_pct` from a capital-advice reply as a `[0, 1]`
/// fraction (the model is asked for a percentage, e.g. `"4.5"` meaning 4.5%).
pub fn parse_capital_advice(raw: &str) -> Option<Decimal> {
    let json_span = extract_json_object(raw)?;
    let parsed = serde_json::from_str::<Value>(json_span).ok()?;
    let pct = parse_optional_decimal(parsed.get("recommended_size_pct"))?;
    Some((pct / Decimal::from(100)).clamp(Decimal::ZERO, Decimal::ONE))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_json_with_prose_around_it() {
        let raw = r#"Sure, here is my analysis:
        ```json
        {"recommendation": {"action": "buy", "confidence": "72%", "entry_price": "Market", "take_profit": "43210.5", "stop_loss": "41000", "strategy": "breakout", "risk_reward": "2.1", "reasoning": "Momentum confirmed on 1h and 4h."}}
        ```
        Let me know if you need more detail."#;
        let result = parse_market_analysis(raw);
        assert_eq!(result.action, ActionKind::Buy);
        assert_eq!(result.confidence, Decimal::try_from(0.72).unwrap());
        assert_eq!(result.recommendation.take_profit, Some("43210.5".parse().unwrap()));
        assert!(result.recommendation.entry_price.is_none());
    }

    #[test]
    fn normalizes_close_to_sell() {
        let raw = r#"{"recommendation": {"action": "CLOSE", "confidence": 0.5, "reasoning": "take profit"}}"#;
        let result = parse_market_analysis(raw);
        assert_eq!(result.action, ActionKind::Sell);
    }

    #[test]
    fn unparseable_reply_yields_hold_at_zero_confidence() {
        let result = parse_market_analysis("I refuse to answer in JSON today.");
        assert_eq!(result.action, ActionKind::Hold);
        assert_eq!(result.confidence, Decimal::ZERO);
    }

    #[test]
    fn invalid_action_string_falls_back_to_hold() {
        let raw = r#"{"recommendation": {"action": "SHORT", "confidence": 0.9}}"#;
        let result = parse_market_analysis(raw);
        assert_eq!(result.action, ActionKind::Hold);
        assert_eq!(result.confidence, Decimal::ZERO);
    }

    #[test]
    fn capital_advice_converts_percent_to_fraction() {
        let raw = r#"{"recommended_size_pct": 4.5, "reasoning": "moderate confidence"}"#;
        let pct = parse_capital_advice(raw).unwrap();
        assert_eq!(pct, Decimal::try_from(0.045).unwrap());
    }
}
