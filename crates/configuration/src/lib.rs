use crate::error::ConfigError;
use crate::settings::Settings;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use settings::{
    DatabaseConfig, EngineConfig, LlmConfig, LoggingConfig, NotificationConfig, ObjectStoreConfig,
    RedisConfig, RiskConfig, Settings, TelegramConfig,
};

/// Loads application configuration from `config.toml`, overridden by any
/// `ZENITH_`-prefixed environment variable (e.g. `ZENITH_DATABASE__URL`).
///
/// `path` defaults to `config.toml` in the current working directory; pass an
/// explicit path for tests or non-standard deployments.
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let path = path.unwrap_or("config.toml");

    let builder = config::Config::builder()
        .add_source(config::File::with_name(path).required(true))
        .add_source(
            config::Environment::with_prefix("ZENITH")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let settings = builder.try_deserialize::<Settings>()?;

    Ok(settings)
}
