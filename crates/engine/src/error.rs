use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("exchange adapter error: {0}")]
    Adapter(#[from] exchange_adapters::AdapterError),

    #[error("database error: {0}")]
    Database(#[from] database::DbError),

    #[error("bot-loader error: {0}")]
    BotLoader(#[from] bot_loader::BotLoaderError),

    #[error("capital-management error: {0}")]
    Capital(#[from] capital_management::CapitalError),

    #[error("cache error: {0}")]
    Cache(#[from] cache::CacheError),

    #[error("object-store error: {0}")]
    ObjectStore(#[from] object_store::StoreError),

    #[error("subscription {0} is not ACTIVE")]
    SubscriptionNotActive(i64),

    #[error("subscription {0} references bot {1}, which was not found or is not APPROVED")]
    BotNotApproved(i64, i64),

    #[error("no active exchange credentials resolved for subscription {0}")]
    NoCredentials(i64),

    #[error("no bot-file of type '{0}' found for bot {1}")]
    BotFileNotFound(String, i64),

    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}
