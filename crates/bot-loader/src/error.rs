use thiserror::Error;

#[derive(Error, Debug)]
pub enum BotLoaderError {
    #[error("no file of type '{0}' is registered for bot {1} version {2}")]
    FileNotFound(String, i64, String),

    #[error("failed to fetch bot artifact from object storage: {0}")]
    ArtifactFetch(#[from] object_store::StoreError),

    #[error("failed to spawn strategy subprocess: {0}")]
    Spawn(std::io::Error),

    #[error("strategy subprocess IPC error: {0}")]
    Ipc(std::io::Error),

    #[error("strategy subprocess sent an unparseable IPC frame: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("strategy subprocess exited unexpectedly (code: {0:?})")]
    ProcessExited(Option<i32>),

    #[error("strategy reported an error: {0}")]
    StrategyError(String),
}
