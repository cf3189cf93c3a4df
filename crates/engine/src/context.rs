//! The shared runtime context every subcommand builds once and hands to
//! whichever loops it spawns (§10.B's "explicit runtime context" note —
//! no global statics). Everything here is cheaply `Clone`: `DbRepository`
//! wraps a `PgPool`, `RedisCache` wraps a `ConnectionManager`, and the rest
//! are `Arc`-backed.

use std::sync::Arc;

use cache::RedisCache;
use capital_management::CapitalManager;
use configuration::Settings;
use database::DbRepository;
use llm_advisory::LlmAdvisor;
use object_store::ObjectStore;
use risk::GlobalRiskManager;
use tokio::sync::broadcast;

use crate::error::EngineError;

#[derive(Clone)]
pub struct Context {
    pub db: DbRepository,
    pub cache: RedisCache,
    pub store: Arc<ObjectStore>,
    pub capital: Arc<CapitalManager>,
    pub risk: Arc<GlobalRiskManager>,
    /// `None` when no LLM provider key is configured; callers fall back to
    /// the non-LLM sizing path.
    pub llm: Option<Arc<LlmAdvisor>>,
    pub events: broadcast::Sender<events::WsMessage>,
    pub settings: Arc<Settings>,
}

impl Context {
    pub async fn build(settings: Settings) -> Result<Self, EngineError> {
        let db_pool = database::connect().await?;
        let db = DbRepository::new(db_pool);

        let cache = RedisCache::connect(&settings.redis.url)
            .await
            .map_err(EngineError::Cache)?;

        let store = ObjectStore::connect(
            &settings.object_store.bucket,
            settings.object_store.endpoint.as_deref(),
            &settings.object_store.region,
            None,
        )
        .await;

        let (events_tx, _rx) = broadcast::channel(1024);

        let capital = CapitalManager::new(capital_management::CapitalManagementConfig::default())
            .map_err(EngineError::Capital)?;

        let risk = GlobalRiskManager::new(settings.risk.clone(), events_tx.clone());

        let llm = if settings.llm.openai_api_key.is_some()
            || settings.llm.anthropic_api_key.is_some()
            || settings.llm.gemini_api_key.is_some()
        {
            Some(Arc::new(LlmAdvisor::new(settings.llm.clone(), cache.clone())))
        } else {
            None
        };

        Ok(Self {
            db,
            cache,
            store: Arc::new(store),
            capital: Arc::new(capital),
            risk: Arc::new(risk),
            llm,
            events: events_tx,
            settings: Arc::new(settings),
        })
    }
}
