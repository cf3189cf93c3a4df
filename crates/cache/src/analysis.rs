use chrono::Utc;

/// The LLM-analysis dedup key: `md5(symbol + sorted_timeframes + minute_bucket)`.
/// Two workers analyzing the same symbol/timeframe set within the same
/// minute hash to the same key and share the cached result.
pub fn llm_analysis_key(symbol: &str, timeframes: &[&str]) -> String {
    let mut sorted = timeframes.to_vec();
    sorted.sort_unstable();
    let minute_bucket = Utc::now().timestamp() / 60;
    let raw = format!("{symbol}{}{minute_bucket}", sorted.join(""));
    format!("{:x}", md5::compute(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_order_independent_for_timeframes() {
        let a = llm_analysis_key("BTCUSDT", &["5m", "1h"]);
        let b = llm_analysis_key("BTCUSDT", &["1h", "5m"]);
        assert_eq!(a, b);
    }

    #[test]
    fn key_differs_by_symbol() {
        let a = llm_analysis_key("BTCUSDT", &["5m"]);
        let b = llm_analysis_key("ETHUSDT", &["5m"]);
        assert_ne!(a, b);
    }
}
