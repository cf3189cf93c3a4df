use crate::types::TimeframeData;

/// Per-timeframe candle lookback, matching how much history a prompt
/// actually needs to judge trend/momentum at that resolution without
/// blowing the token budget on minute-level noise.
pub fn timeframe_lookback(timeframe: &str) -> usize {
    match timeframe {
        "1m" | "3m" | "5m" => 60,
        "15m" | "30m" => 48,
        "1h" | "2h" => 24,
        "4h" | "6h" | "8h" | "12h" => 12,
        "1d" | "3d" => 7,
        "1w" | "1M" => 4,
        _ => 24,
    }
}

pub const SYSTEM_PROMPT: &str = "You are a disciplined crypto futures trading analyst. \
Given multi-timeframe OHLCV data for one symbol, respond with ONLY a JSON object of the \
shape {\"recommendation\": {\"action\": \"BUY|SELL|HOLD|CLOSE\", \"confidence\": \"0-100\", \
\"entry_price\": string, \"take_profit\": string, \"stop_loss\": string, \"strategy\": string, \
\"risk_reward\": string, \"reasoning\": string}}. Do not include any text outside the JSON object.";

pub fn market_analysis_prompt(symbol: &str, timeframes: &TimeframeData) -> String {
    let mut sections = Vec::with_capacity(timeframes.len());
    for (timeframe, candles) in timeframes {
        let lookback = timeframe_lookback(timeframe);
        let trimmed = &candles[candles.len().saturating_sub(lookback)..];
        let rows: Vec<String> = trimmed
            .iter()
            .map(|c| format!("{},{},{},{},{},{}", c.open_time_ms, c.open, c.high, c.low, c.close, c.volume))
            .collect();
        sections.push(format!("## {timeframe}\ntime,open,high,low,close,volume\n{}", rows.join("\n")));
    }
    format!(
        "Symbol: {symbol}\n\n{}\n\nAnalyze the trend, momentum and key levels across these timeframes and \
         produce one trading recommendation.",
        sections.join("\n\n")
    )
}

pub const CAPITAL_ADVICE_SYSTEM_PROMPT: &str = "You are a risk manager for a crypto futures fund. \
Given the current account risk profile and a proposed trade's confidence, respond with ONLY a JSON \
object of the shape {\"recommended_size_pct\": \"0-100\", \"reasoning\": string} giving the position \
size as a percentage of account equity. Do not include any text outside the JSON object.";

pub fn capital_advice_prompt(context: &str, base_pct: rust_decimal::Decimal, max_pct: rust_decimal::Decimal) -> String {
    format!(
        "Context: {context}\n\nBaseline position size: {base_pct}% of equity. Hard cap: {max_pct}% of equity. \
         Recommend a position size between 0% and the cap, justified by the context above."
    )
}
