//! The LLM advisory layer: multi-timeframe market analysis and capital-sizing
//! advice from a chat-completion model, with a per-symbol Redis lock and
//! short-TTL cache so a fleet of workers sharing one symbol only pays for one
//! LLM call at a time.
//!
//! Ordering: check cache, try the lock, call the provider under a hard 60s
//! timeout, cache the result, release the lock. Any failure along that path
//! (lock contention, timeout, provider error, unparseable reply) degrades to
//! [`AdvisoryOutcome::Unavailable`] or a `HOLD`-confidence-0 analysis rather
//! than propagating — an advisory call failing should never stall a cycle.

pub mod error;
pub mod parse;
pub mod prompt;
pub mod providers;
pub mod types;

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use cache::RedisCache;
use configuration::LlmConfig;
use core_types::{ActionKind, StrategyRecommendation};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub use error::LlmError;
pub use providers::LlmProvider;
pub use types::{AdvisoryOutcome, MarketAnalysis, OhlcvPoint, TimeframeData};

const LOCK_TTL: Duration = Duration::from_secs(300);
const RESULT_CACHE_TTL: Duration = Duration::from_secs(60);
const CALL_TIMEOUT: Duration = Duration::from_secs(60);
const LOCK_WAIT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedAnalysis {
    action: ActionKind,
    confidence: Decimal,
    reasoning: String,
    recommendation: StrategyRecommendation,
}

impl From<&MarketAnalysis> for CachedAnalysis {
    fn from(analysis: &MarketAnalysis) -> Self {
        Self {
            action: analysis.action,
            confidence: analysis.confidence,
            reasoning: analysis.reasoning.clone(),
            recommendation: analysis.recommendation.clone(),
        }
    }
}

impl CachedAnalysis {
    fn into_analysis(self, from_cache: bool) -> MarketAnalysis {
        MarketAnalysis {
            action: self.action,
            confidence: self.confidence,
            reasoning: self.reasoning,
            recommendation: self.recommendation,
            from_cache,
        }
    }
}

pub struct LlmAdvisor {
    client: reqwest::Client,
    config: LlmConfig,
    cache: RedisCache,
    worker_token: String,
}

impl LlmAdvisor {
    pub fn new(config: LlmConfig, cache: RedisCache) -> Self {
        let startup_ts = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0);
        let worker_token = cache::lock::worker_token(std::process::id(), startup_ts);
        Self { client: reqwest::Client::new(), config, cache, worker_token }
    }

    /// Runs (or reuses a cached) multi-timeframe analysis for `symbol`.
    /// `model_hint` picks the provider (see [`LlmProvider::from_model_hint`])
    /// and, if recognized, is passed through as the model name.
    pub async fn analyze_market(
        &self,
        symbol: &str,
        timeframes: &TimeframeData,
        model_hint: Option<&str>,
    ) -> AdvisoryOutcome {
        let tf_keys: Vec<&str> = timeframes.keys().map(String::as_str).collect();
        let cache_key = cache::analysis::llm_analysis_key(symbol, &tf_keys);

        if let Some(cached) = self.read_cached_analysis(&cache_key).await {
            return AdvisoryOutcome::Analysis(cached);
        }

        let lock_key = cache::lock::llm_lock_key(symbol);
        let acquired = match self.cache.try_acquire_lock(&lock_key, &self.worker_token, LOCK_TTL).await {
            Ok(acquired) => acquired,
            Err(err) => {
                tracing::warn!(error = %err, symbol, "failed to reach the LLM lock; proceeding without a lock");
                true
            }
        };

        if !acquired {
            tracing::info!(symbol, "LLM lock held by another worker, waiting for its cached result");
            tokio::time::sleep(LOCK_WAIT).await;
            return match self.read_cached_analysis(&cache_key).await {
                Some(cached) => AdvisoryOutcome::Analysis(cached),
                None => AdvisoryOutcome::Unavailable {
                    reason: "LLM lock held by another worker and no cached result appeared".to_string(),
                },
            };
        }

        let provider = LlmProvider::from_model_hint(model_hint);
        let prompt = prompt::market_analysis_prompt(symbol, timeframes);
        let call = provider.complete(&self.client, &self.config, model_hint, prompt::SYSTEM_PROMPT, &prompt);

        let outcome = match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(Ok(raw)) => {
                let analysis = parse::parse_market_analysis(&raw);
                if let Err(err) = self
                    .cache
                    .set_json(&cache_key, &CachedAnalysis::from(&analysis), RESULT_CACHE_TTL)
                    .await
                {
                    tracing::warn!(error = %err, symbol, "failed to cache LLM analysis result");
                }
                AdvisoryOutcome::Analysis(analysis)
            }
            Ok(Err(err)) => {
                tracing::warn!(error = %err, symbol, "LLM market analysis call failed");
                AdvisoryOutcome::Unavailable { reason: err.to_string() }
            }
            Err(_) => {
                tracing::warn!(symbol, "LLM market analysis call timed out after {:?}", CALL_TIMEOUT);
                AdvisoryOutcome::Unavailable { reason: "LLM call timed out".to_string() }
            }
        };

        if let Err(err) = self.cache.release_lock(&lock_key, &self.worker_token).await {
            tracing::warn!(error = %err, symbol, "failed to release LLM lock");
        }

        outcome
    }

    async fn read_cached_analysis(&self, cache_key: &str) -> Option<MarketAnalysis> {
        match self.cache.get_json::<CachedAnalysis>(cache_key).await {
            Ok(Some(cached)) => Some(cached.into_analysis(true)),
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "failed to read LLM analysis cache");
                None
            }
        }
    }

    /// Asks the model for a recommended position size, expressed as a
    /// `[0, 1]` fraction of equity. Returns `None` on any failure so the
    /// caller (capital-management's `llm_hybrid` method) can fall back to
    /// its non-LLM sizing methods.
    pub async fn capital_advice(
        &self,
        context: &str,
        base_pct: Decimal,
        max_pct: Decimal,
        model_hint: Option<&str>,
    ) -> Option<Decimal> {
        let provider = LlmProvider::from_model_hint(model_hint);
        let prompt = prompt::capital_advice_prompt(context, base_pct, max_pct);
        let call = provider.complete(&self.client, &self.config, model_hint, prompt::CAPITAL_ADVICE_SYSTEM_PROMPT, &prompt);

        match tokio::time::timeout(CALL_TIMEOUT, call).await {
            Ok(Ok(raw)) => parse::parse_capital_advice(&raw),
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "LLM capital advice call failed");
                None
            }
            Err(_) => {
                tracing::warn!("LLM capital advice call timed out after {:?}", CALL_TIMEOUT);
                None
            }
        }
    }
}
