use serde::Deserialize;

/// The root configuration structure for the entire application, loaded from
/// `config.toml` and overridable via `ZENITH_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub notification: NotificationConfig,
    #[serde(default)]
    pub risk: RiskConfig,
}

/// Postgres connection settings for the `database` crate's pool.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Redis connection settings, backing the `cache` crate's distributed locks.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// S3-compatible object storage settings for versioned bot artifacts.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// API credentials for the three supported LLM advisory providers. All optional:
/// the advisory layer is skipped for a subscription that doesn't request it.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    pub anthropic_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    #[serde(default = "default_llm_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_llm_cache_ttl_secs() -> u64 {
    300
}

/// Core orchestrator/scheduler/reconciler tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Symmetric key (hex) used to encrypt exchange credentials at rest.
    pub encryption_key: String,
    #[serde(default = "default_network")]
    pub network_default: String,
    #[serde(default = "default_scheduler_interval")]
    pub scheduler_interval_secs: u64,
    #[serde(default = "default_reconciler_interval")]
    pub reconciler_interval_secs: u64,
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
    #[serde(default = "default_action_log_retention_days")]
    pub action_log_retention_days: u32,
}

fn default_network() -> String {
    "TESTNET".to_string()
}

fn default_scheduler_interval() -> u64 {
    60
}

fn default_reconciler_interval() -> u64 {
    60
}

fn default_maintenance_interval() -> u64 {
    300
}

fn default_action_log_retention_days() -> u32 {
    90
}

/// Logging sink configuration for `tracing-appender`.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub directory: Option<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: None,
        }
    }
}

/// Telegram alerting sink; absent credentials disable the alerter, not the engine.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TelegramConfig {
    pub bot_token: Option<String>,
    pub chat_id: Option<String>,
}

/// Generic webhook/email-gateway sink (§10.G), the port of the original
/// platform's Celery email-notification tasks. An absent `webhook_url`
/// disables this leg without disabling Telegram alerting.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct NotificationConfig {
    pub webhook_url: Option<String>,
}

/// Thresholds for the portfolio-level circuit breaker (`risk::GlobalRiskManager`).
#[derive(Debug, Clone, Deserialize)]
pub struct RiskConfig {
    #[serde(default = "default_max_consecutive_losses")]
    pub max_consecutive_losses: u32,
    #[serde(default = "default_bot_cooldown_hours")]
    pub bot_cooldown_hours: u64,
    #[serde(default = "default_max_daily_drawdown_pct")]
    pub max_daily_drawdown_pct: rust_decimal::Decimal,
}

fn default_max_consecutive_losses() -> u32 {
    3
}

fn default_bot_cooldown_hours() -> u64 {
    4
}

fn default_max_daily_drawdown_pct() -> rust_decimal::Decimal {
    rust_decimal::Decimal::new(15, 2) // 0.15
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_consecutive_losses: default_max_consecutive_losses(),
            bot_cooldown_hours: default_bot_cooldown_hours(),
            max_daily_drawdown_pct: default_max_daily_drawdown_pct(),
        }
    }
}
